use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type ChannelId = u32;

/// Content hash of an input document.
pub type Fingerprint = String;

/// One entry of `channel_list`; producers write either numbers or numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawChannelId {
    Number(i64),
    Text(String),
}

impl RawChannelId {
    pub fn parse(&self) -> Option<ChannelId> {
        match self {
            RawChannelId::Number(n) => ChannelId::try_from(*n).ok(),
            RawChannelId::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// The stream settings section of the resource document.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    pub rtsp_ip: String,
    #[serde(default)]
    pub stream_title: String,
    #[serde(default = "default_test_channel")]
    pub test_channel: String,
    #[serde(default)]
    pub channel_count: Option<i64>,
    #[serde(default)]
    pub channel_list: Vec<RawChannelId>,
}

fn default_test_channel() -> String {
    "off".to_string()
}

/// Desired state as declared by the resource collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredStateSnapshot {
    pub fingerprint: Fingerprint,
    pub stream_title: String,
    pub default_host: String,
    /// Declared channels, in declaration order, without duplicates.
    pub channels: Vec<ChannelId>,
}

impl DesiredStateSnapshot {
    pub fn from_section(fingerprint: Fingerprint, section: StreamSection) -> Self {
        let test_channel = section.test_channel.trim();
        let candidates: Vec<RawChannelId> = if test_channel.eq_ignore_ascii_case("off") {
            section.channel_list
        } else {
            test_channel
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| RawChannelId::Text(s.to_string()))
                .collect()
        };

        let mut channels = Vec::with_capacity(candidates.len());
        for raw in &candidates {
            match raw.parse() {
                Some(id) if !channels.contains(&id) => channels.push(id),
                Some(_) => {}
                None => log::warn!("StateSource: skipping invalid channel id {:?}", raw),
            }
        }

        if test_channel.eq_ignore_ascii_case("off") {
            if let Some(count) = section.channel_count {
                if count != channels.len() as i64 {
                    log::warn!(
                        "StateSource: channel_count {} does not match channel_list length {}",
                        count,
                        channels.len()
                    );
                }
            }
        }

        Self {
            fingerprint,
            stream_title: section.stream_title,
            default_host: section.rtsp_ip,
            channels,
        }
    }
}

/// Per-channel status written by the validation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelValidation {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default, rename = "livestream_link")]
    pub override_link: Option<String>,
    #[serde(default)]
    pub black_ok: bool,
}

impl ChannelValidation {
    /// A non-empty error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error_msg
            .as_deref()
            .map(str::trim)
            .filter(|msg| !msg.is_empty())
    }

    pub fn override_link(&self) -> Option<&str> {
        self.override_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSnapshot {
    pub fingerprint: Fingerprint,
    pub entries: BTreeMap<ChannelId, ChannelValidation>,
}

impl ValidationSnapshot {
    pub fn from_document(
        fingerprint: Fingerprint,
        document: BTreeMap<String, ChannelValidation>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for (key, entry) in document {
            match key.trim().parse::<ChannelId>() {
                Ok(id) => {
                    entries.insert(id, entry);
                }
                Err(_) => log::warn!("StateSource: skipping validation entry {:?}", key),
            }
        }
        Self {
            fingerprint,
            entries,
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<&ChannelValidation> {
        self.entries.get(&channel)
    }
}
