use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{
    error::DocumentReadError,
    state::types::{
        ChannelValidation, DesiredStateSnapshot, Fingerprint, StreamSection, ValidationSnapshot,
    },
};

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    format!("{:x}", md5::compute(bytes))
}

/// Content hash of the file at `path`, `None` if it does not exist or cannot be read.
pub async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    tokio::fs::read(path)
        .await
        .ok()
        .map(|bytes| fingerprint_bytes(&bytes))
}

async fn read_document(path: &Path) -> Result<Vec<u8>, DocumentReadError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => DocumentReadError::NotFound {
            path: path.to_path_buf(),
        },
        _ => DocumentReadError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

pub fn parse_desired(
    path: &Path,
    section: &str,
    fingerprint: Fingerprint,
    bytes: &[u8],
) -> Result<DesiredStateSnapshot, DocumentReadError> {
    let malformed = |reason: String| DocumentReadError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let root: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
    let value = if let Some(v) = root.get(section) {
        v.clone()
    } else if root.get("channel_list").is_some() {
        // flat document, settings at the top level
        root
    } else {
        return Err(malformed(format!("missing section {:?}", section)));
    };
    let section: StreamSection =
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
    Ok(DesiredStateSnapshot::from_section(fingerprint, section))
}

pub fn parse_validation(
    path: &Path,
    fingerprint: Fingerprint,
    bytes: &[u8],
) -> Result<ValidationSnapshot, DocumentReadError> {
    let document: BTreeMap<String, ChannelValidation> =
        serde_json::from_slice(bytes).map_err(|e| DocumentReadError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(ValidationSnapshot::from_document(fingerprint, document))
}

/// Tracks one external document and the fingerprint last observed for it.
#[derive(Debug)]
struct WatchedDocument {
    path: PathBuf,
    last_fingerprint: Option<Fingerprint>,
}

impl WatchedDocument {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_fingerprint: None,
        }
    }

    /// Returns the document bytes and their hash only when the content changed.
    async fn read_if_changed(&mut self) -> Option<(Fingerprint, Vec<u8>)> {
        let bytes = match read_document(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("StateSource: {}", e);
                return None;
            }
        };
        let fingerprint = fingerprint_bytes(&bytes);
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return None;
        }
        // Recorded even if parsing fails, so a half-written document is looked at once.
        self.last_fingerprint = Some(fingerprint.clone());
        Some((fingerprint, bytes))
    }
}

/// Fingerprint-gated reader of the desired-state and validation documents.
#[derive(Debug)]
pub struct StateSource {
    resource: WatchedDocument,
    resource_section: String,
    validation: WatchedDocument,
}

impl StateSource {
    pub fn new(resource_path: PathBuf, resource_section: &str, validation_path: PathBuf) -> Self {
        Self {
            resource: WatchedDocument::new(resource_path),
            resource_section: resource_section.to_string(),
            validation: WatchedDocument::new(validation_path),
        }
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource.path
    }

    pub fn validation_path(&self) -> &Path {
        &self.validation.path
    }

    /// A freshly parsed desired-state snapshot, or `None` if unchanged, missing or malformed.
    pub async fn refresh_desired(&mut self) -> Option<DesiredStateSnapshot> {
        let (fingerprint, bytes) = self.resource.read_if_changed().await?;
        match parse_desired(&self.resource.path, &self.resource_section, fingerprint, &bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("StateSource: {}, keeping previous desired state", e);
                None
            }
        }
    }

    /// A freshly parsed validation snapshot, or `None` if unchanged, missing or malformed.
    pub async fn refresh_validation(&mut self) -> Option<ValidationSnapshot> {
        let (fingerprint, bytes) = self.validation.read_if_changed().await?;
        match parse_validation(&self.validation.path, fingerprint, &bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("StateSource: {}, keeping previous validation state", e);
                None
            }
        }
    }
}
