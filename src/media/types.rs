use std::path::{Path, PathBuf};

use crate::{config::ReconcilerConfig, state::types::ChannelId};

pub const MANIFEST_NAME: &str = "index.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Settings shared by every transcoder invocation.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub ffmpeg_bin: String,
    pub output_root: PathBuf,
    // seconds per segment
    pub segment_secs: u32,
    // segments kept in the rolling manifest
    pub list_size: u32,
}

impl From<&ReconcilerConfig> for TranscodeSettings {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            output_root: config.output_root.clone(),
            segment_secs: config.segment_secs,
            list_size: config.list_size,
        }
    }
}

impl TranscodeSettings {
    pub fn channel_dir(&self, channel: ChannelId) -> PathBuf {
        channel_dir(&self.output_root, channel)
    }
}

pub fn channel_dir(output_root: &Path, channel: ChannelId) -> PathBuf {
    output_root.join(format!("channel_{}", channel))
}

/// Everything needed to start one channel's pipeline.
#[derive(Clone)]
pub struct LaunchRequest {
    pub channel: ChannelId,
    pub title: String,
    /// Input URL with credentials; never logged.
    pub url: String,
    /// `url` with credentials masked, safe for logs.
    pub masked_url: String,
}

impl std::fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("channel", &self.channel)
            .field("title", &self.title)
            .field("url", &self.masked_url)
            .finish()
    }
}

/// Transcoder arguments: reliable transport, stream copy, rolling HLS output.
pub fn transcode_args(settings: &TranscodeSettings, request: &LaunchRequest, url: &str) -> Vec<String> {
    let dir = settings.channel_dir(request.channel);
    let segment_path = dir.join(SEGMENT_PATTERN);
    let manifest_path = dir.join(MANIFEST_NAME);
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        "-i".into(),
        url.to_string(),
        "-c".into(),
        "copy".into(),
        "-metadata".into(),
        format!("title={}", request.title),
        "-metadata".into(),
        format!("comment=channel {}", request.channel),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        settings.segment_secs.to_string(),
        "-hls_list_size".into(),
        settings.list_size.to_string(),
        "-hls_flags".into(),
        "delete_segments".into(),
        "-hls_segment_filename".into(),
        segment_path.to_string_lossy().into_owned(),
        manifest_path.to_string_lossy().into_owned(),
    ]
}

/// Loggable command line; the input URL is replaced by its masked form.
pub fn display_command(settings: &TranscodeSettings, request: &LaunchRequest) -> String {
    let args = transcode_args(settings, request, &request.masked_url);
    format!("{} {}", settings.ffmpeg_bin, args.join(" "))
}
