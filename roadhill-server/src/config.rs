//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use roadhill_core::{PlanError, PlaybackPlan, MAX_MESSAGE_LEN};

/// URL prefix the asset host serves `asset_root` under.
pub const FILES_PREFIX: &str = "/files";

/// Daemon configuration. File: ~/.config/roadhill/config.toml or /etc/roadhill/config.toml.
/// Env overrides: ROADHILL_TCP_BIND_HOST, ROADHILL_TCP_BIND_PORT, ROADHILL_HTTP_BIND_HOST,
/// ROADHILL_HTTP_BIND_PORT, ROADHILL_FIRMWARE_PATH, ROADHILL_ASSET_ROOT,
/// ROADHILL_ADVERTISED_BASE_URL, ROADHILL_MAX_CONNECTIONS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device protocol listen host (default 0.0.0.0).
    #[serde(default = "default_host")]
    pub tcp_bind_host: String,
    /// Device protocol listen port (default 8080).
    #[serde(default = "default_tcp_port")]
    pub tcp_bind_port: u16,
    /// Asset host listen host (default 0.0.0.0).
    #[serde(default = "default_host")]
    pub http_bind_host: String,
    /// Asset host listen port (default 80).
    #[serde(default = "default_http_port")]
    pub http_bind_port: u16,
    /// Firmware image offered for OTA; should live under `asset_root`.
    #[serde(default = "default_firmware_path")]
    pub firmware_path: PathBuf,
    /// Build output copied to `firmware_path` at startup, if set.
    #[serde(default)]
    pub firmware_source: Option<PathBuf>,
    /// Directory served under /files.
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    /// Base URL devices use to reach the asset host.
    #[serde(default = "default_advertised_base_url")]
    pub advertised_base_url: String,
    /// Concurrent device sessions; unlimited when unset.
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Largest inbound message kept while waiting for the rest of it.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    /// PLAY payload.
    #[serde(default)]
    pub playback: PlaybackPlan,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_tcp_port() -> u16 {
    8080
}
fn default_http_port() -> u16 {
    80
}
fn default_firmware_path() -> PathBuf {
    PathBuf::from("files/roadhill.bin")
}
fn default_asset_root() -> PathBuf {
    PathBuf::from("files")
}
fn default_advertised_base_url() -> String {
    "http://10.42.0.1".to_string()
}
fn default_max_message_len() -> usize {
    MAX_MESSAGE_LEN
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_bind_host: default_host(),
            tcp_bind_port: default_tcp_port(),
            http_bind_host: default_host(),
            http_bind_port: default_http_port(),
            firmware_path: default_firmware_path(),
            firmware_source: None,
            asset_root: default_asset_root(),
            advertised_base_url: default_advertised_base_url(),
            max_connections: None,
            max_message_len: default_max_message_len(),
            playback: PlaybackPlan::default(),
        }
    }
}

impl Config {
    pub fn tcp_bind(&self) -> String {
        format!("{}:{}", self.tcp_bind_host, self.tcp_bind_port)
    }

    pub fn http_bind(&self) -> String {
        format!("{}:{}", self.http_bind_host, self.http_bind_port)
    }

    fn base_url(&self) -> &str {
        self.advertised_base_url.trim_end_matches('/')
    }

    /// URL devices fetch the firmware from. Falls back to the bare file name
    /// when `firmware_path` is outside `asset_root` (see [`Config::firmware_is_served`]).
    pub fn firmware_url(&self) -> String {
        let rel = match self.firmware_relative_path() {
            Some(rel) => rel,
            None => self
                .firmware_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        format!("{}{}/{}", self.base_url(), FILES_PREFIX, rel)
    }

    pub fn tracks_url(&self) -> String {
        format!(
            "{}{}/{}",
            self.base_url(),
            FILES_PREFIX,
            self.playback.tracks_dir.trim_matches('/')
        )
    }

    /// Whether the asset host will actually serve `firmware_path`.
    pub fn firmware_is_served(&self) -> bool {
        self.firmware_relative_path().is_some()
    }

    fn firmware_relative_path(&self) -> Option<String> {
        let rel = self.firmware_path.strip_prefix(&self.asset_root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url();
        let http = url.starts_with("http://") || url.starts_with("https://");
        if !http || url.contains(char::is_whitespace) {
            return Err(ConfigError::BaseUrl(self.advertised_base_url.clone()));
        }
        if self.tcp_bind_port == 0 || self.http_bind_port == 0 {
            return Err(ConfigError::Port);
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::MaxMessageLen);
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::MaxConnections);
        }
        self.playback.validate()?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("advertised_base_url must be an http(s) URL, got {0:?}")]
    BaseUrl(String),
    #[error("bind ports must be non-zero")]
    Port,
    #[error("max_message_len must be positive")]
    MaxMessageLen,
    #[error("max_connections must be positive when set")]
    MaxConnections,
    #[error("invalid playback plan: {0}")]
    Playback(#[from] PlanError),
}

/// Load config: default, then config file (explicit path, or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok())?;
    c.validate()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/roadhill/config.toml"));
    }
    out.push(PathBuf::from("/etc/roadhill/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    fn port(name: &'static str, v: String) -> Result<u16, ConfigError> {
        v.parse().map_err(|_| ConfigError::Env { var: name, value: v })
    }
    if let Some(v) = var("ROADHILL_TCP_BIND_HOST") {
        c.tcp_bind_host = v;
    }
    if let Some(v) = var("ROADHILL_TCP_BIND_PORT") {
        c.tcp_bind_port = port("ROADHILL_TCP_BIND_PORT", v)?;
    }
    if let Some(v) = var("ROADHILL_HTTP_BIND_HOST") {
        c.http_bind_host = v;
    }
    if let Some(v) = var("ROADHILL_HTTP_BIND_PORT") {
        c.http_bind_port = port("ROADHILL_HTTP_BIND_PORT", v)?;
    }
    if let Some(v) = var("ROADHILL_FIRMWARE_PATH") {
        c.firmware_path = PathBuf::from(v);
    }
    if let Some(v) = var("ROADHILL_ASSET_ROOT") {
        c.asset_root = PathBuf::from(v);
    }
    if let Some(v) = var("ROADHILL_ADVERTISED_BASE_URL") {
        c.advertised_base_url = v;
    }
    if let Some(v) = var("ROADHILL_MAX_CONNECTIONS") {
        let n = v.parse().map_err(|_| ConfigError::Env {
            var: "ROADHILL_MAX_CONNECTIONS",
            value: v,
        })?;
        c.max_connections = Some(n);
    }
    Ok(())
}
