//! Server configuration (spec §6 "Configuration (recognised keys)").
//!
//! Loaded once at startup from a JSON file and handed to the actors that
//! need it. Every recognised key can be overridden by an environment
//! variable named `ZGM_<KEY_UPPER_SNAKE>` (e.g. `ZGM_ROOM_SIZE`), following
//! `signal-fish-server`'s `clap { features = ["env"] }` convention but
//! expressed with plain `std::env::var` since this crate carries no
//! CLI-arg crate.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_server_name() -> String {
    "zgm server".into()
}
fn default_room_size() -> u8 {
    8
}
fn default_phira_api_url() -> String {
    "https://api.phira.cn".into()
}
fn default_avatar() -> String {
    String::new()
}
fn default_max_frame_bytes() -> u32 {
    1 << 20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub tcp: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { tcp: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_room_size")]
    pub room_size: u8,
    #[serde(default = "default_phira_api_url")]
    pub phira_api_url: String,
    #[serde(default = "default_avatar")]
    pub default_avatar: String,
    pub silent_phira_ids: HashSet<UserId>,
    pub ban_id_whitelist: HashSet<UserId>,
    pub ban_ip_whitelist: HashSet<String>,
    pub use_proxy_protocol: bool,
    pub enable_web_server: bool,
    pub enable_update_check: bool,
    pub server_announcement: Option<String>,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
    /// Bearer token the Admin HTTP surface requires (spec §6: "authorization
    /// required; 403 otherwise"). Not itself a named key in spec §6's
    /// recognised-keys list, since the spec treats admin authorization as an
    /// external contract; this is the concrete mechanism chosen for it.
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            room_size: default_room_size(),
            phira_api_url: default_phira_api_url(),
            default_avatar: default_avatar(),
            silent_phira_ids: HashSet::new(),
            ban_id_whitelist: HashSet::new(),
            ban_ip_whitelist: HashSet::new(),
            use_proxy_protocol: false,
            enable_web_server: true,
            enable_update_check: true,
            server_announcement: None,
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
            max_frame_bytes: default_max_frame_bytes(),
            admin_token: None,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults for
    /// any key the file omits, then applies `ZGM_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            log::warn!("no config file at {}; using defaults", path.display());
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_str("ZGM_HOST") {
            self.host = v;
        }
        if let Some(v) = env_parse::<u16>("ZGM_PORT") {
            self.port = v;
        }
        if let Some(v) = env_str("ZGM_SERVER_NAME") {
            self.server_name = v;
        }
        if let Some(v) = env_parse::<u8>("ZGM_ROOM_SIZE") {
            self.room_size = v;
        }
        if let Some(v) = env_str("ZGM_PHIRA_API_URL") {
            self.phira_api_url = v;
        }
        if let Some(v) = env_str("ZGM_DEFAULT_AVATAR") {
            self.default_avatar = v;
        }
        if let Some(v) = env_bool("ZGM_USE_PROXY_PROTOCOL") {
            self.use_proxy_protocol = v;
        }
        if let Some(v) = env_bool("ZGM_ENABLE_WEB_SERVER") {
            self.enable_web_server = v;
        }
        if let Some(v) = env_bool("ZGM_ENABLE_UPDATE_CHECK") {
            self.enable_update_check = v;
        }
        if let Some(v) = env_str("ZGM_SERVER_ANNOUNCEMENT") {
            self.server_announcement = Some(v);
        }
        if let Some(v) = env_bool("ZGM_PROTOCOL_TCP") {
            self.protocol.tcp = v;
        }
        if let Some(v) = env_str("ZGM_LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_str("ZGM_ADMIN_TOKEN") {
            self.admin_token = Some(v);
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.room_size, 8);
        assert!(config.protocol.tcp);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/zgm-config.json").unwrap();
        assert_eq!(config.server_name, default_server_name());
    }
}
