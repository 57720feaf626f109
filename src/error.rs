use std::path::PathBuf;

use crate::state::types::ChannelId;

/// Credential sources are unset or decode to nothing usable.
/// Fatal to startup: no pipeline may start without credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential source {0} is not set")]
    Missing(&'static str),

    #[error("credential source {0} is not valid base64: {1}")]
    Decode(&'static str, base64::DecodeError),

    #[error("credential source {0} is not valid utf-8")]
    Utf8(&'static str),

    #[error("credential source {0} decodes to an empty string")]
    Empty(&'static str),
}

/// An input document could not be read or parsed. The last good snapshot stays in effect.
#[derive(Debug, thiserror::Error)]
pub enum DocumentReadError {
    #[error("document {} not found", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed document {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("failed to spawn transcoder for channel {channel}: {source}")]
    Spawn {
        channel: ChannelId,
        source: std::io::Error,
    },

    #[error("failed to prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transcoder for channel {0} did not exit within the grace period")]
    TerminationTimeout(ChannelId),
}
