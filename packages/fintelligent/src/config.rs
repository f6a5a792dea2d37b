use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [backend]
//                    url = "wss://assistant.example.com/ws"
//
//   env var:         FINTEL_BACKEND__URL=wss://...   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Backend connection tunables (lives under `[backend]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Fixed delay before reconnecting after the socket closes.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

/// Session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Send an `excel_sync` snapshot right after every successful connect.
    #[serde(default)]
    pub sync_on_connect: bool,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            sync_on_connect: false,
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_backend_url() -> String {
    "ws://localhost:8000/ws".to_string()
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_command_buffer() -> usize {
    64
}

/// Default config directory: `~/.fintelligent`.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fintelligent")
}

/// Build a figment that layers: defaults → config.toml → FINTEL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `FINTEL_BACKEND__URL=ws://...`  →  `backend.url = "ws://..."`
///   `FINTEL_SESSION__SYNC_ON_CONNECT=true`  →  `session.sync_on_connect = true`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("FINTEL_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Resolved session configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub backend_url: String,
    pub reconnect_delay: Duration,
    pub sync_on_connect: bool,
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl SessionConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            backend_url: fc.backend.url.clone(),
            reconnect_delay: Duration::from_secs(fc.backend.reconnect_delay_secs),
            sync_on_connect: fc.session.sync_on_connect,
            command_buffer: fc.session.command_buffer.max(1),
        }
    }

    /// Load from `config_dir/config.toml` and the environment.
    pub fn load(config_dir: &Path) -> Result<Self, figment::Error> {
        let fc: FileConfig = load_config(config_dir).extract()?;
        Ok(Self::from_file(&fc))
    }
}
