//! Per-channel transcoding pipelines.
//!
//! ```text
//! camera (RTSP, tcp) ──► ffmpeg -c copy ──► <output_root>/channel_<id>/index.m3u8
//!                                                       └─ segment_%05d.ts (rolling)
//! ```

pub mod pipe;
#[cfg(test)]
pub mod testing;
pub mod types;
