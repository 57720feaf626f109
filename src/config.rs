use std::{path::PathBuf, str::FromStr, sync::LazyLock, time::Duration};

pub const USERNAME_SOURCE: &str = "RTSP_USERNAME_B64";
pub const PASSWORD_SOURCE: &str = "RTSP_PASSWORD_B64";

/// Environment-style controller configuration.
#[derive(Clone)]
pub struct ReconcilerConfig {
    pub resource_path: PathBuf,
    /// Key of the nested object in the resource document that holds stream settings.
    pub resource_section: String,
    pub validation_path: PathBuf,
    pub output_root: PathBuf,
    pub segment_secs: u32,
    pub list_size: u32,
    pub interval: Duration,
    pub stop_grace: Duration,
    pub ffmpeg_bin: String,
    pub rtsp_port: u16,
    pub rtsp_subtype: u32,
    pub username_b64: Option<String>,
    pub password_b64: Option<String>,
    pub api_addr: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resource_path: PathBuf::from("resource.json"),
            resource_section: "rtsp".to_string(),
            validation_path: PathBuf::from("channel_status.json"),
            output_root: PathBuf::from("hls"),
            segment_secs: 2,
            list_size: 10,
            interval: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            ffmpeg_bin: "ffmpeg".to_string(),
            rtsp_port: 554,
            rtsp_subtype: 0,
            username_b64: None,
            password_b64: None,
            api_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RESOURCE_FILE") {
            config.resource_path = PathBuf::from(v);
        }
        if let Some(v) = get("RESOURCE_SECTION") {
            config.resource_section = v;
        }
        if let Some(v) = get("VALIDATION_FILE") {
            config.validation_path = PathBuf::from(v);
        }
        if let Some(v) = get("OUTPUT_ROOT") {
            config.output_root = PathBuf::from(v);
        }
        if let Some(v) = get("FFMPEG_BIN") {
            config.ffmpeg_bin = v;
        }
        if let Some(v) = get("API_ADDR") {
            config.api_addr = v;
        }

        config.segment_secs = parse_or(get("HLS_TIME"), "HLS_TIME", config.segment_secs);
        config.list_size = parse_or(get("HLS_LIST_SIZE"), "HLS_LIST_SIZE", config.list_size);
        config.rtsp_port = parse_or(get("RTSP_PORT"), "RTSP_PORT", config.rtsp_port);
        config.rtsp_subtype = parse_or(get("RTSP_SUBTYPE"), "RTSP_SUBTYPE", config.rtsp_subtype);
        let interval = parse_or(
            get("RECONCILE_INTERVAL_SECS"),
            "RECONCILE_INTERVAL_SECS",
            config.interval.as_secs(),
        );
        if interval == 0 {
            log::warn!("Config: RECONCILE_INTERVAL_SECS must be positive, using default");
        } else {
            config.interval = Duration::from_secs(interval);
        }
        config.stop_grace = Duration::from_secs(parse_or(
            get("STOP_GRACE_SECS"),
            "STOP_GRACE_SECS",
            config.stop_grace.as_secs(),
        ));

        // Credential sources are kept raw here and decoded once by the vault.
        config.username_b64 = lookup(USERNAME_SOURCE);
        config.password_b64 = lookup(PASSWORD_SOURCE);
        config
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            log::warn!("Config: invalid {}={:?}, using default {}", key, v, default);
            default
        }),
        None => default,
    }
}

pub fn config() -> &'static ReconcilerConfig {
    static CONFIG: LazyLock<ReconcilerConfig> = LazyLock::new(ReconcilerConfig::from_env);
    &CONFIG
}
