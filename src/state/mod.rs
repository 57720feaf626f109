//! External desired/validation documents, read by polling.
//!
//! Neither producer notifies us, so every tick hashes both files and only
//! re-parses the ones whose content hash moved since the previous tick.

pub mod diff;
pub mod source;
pub mod types;
