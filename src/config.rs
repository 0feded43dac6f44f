use std::path::Path;

use serde::Deserialize;

/// Application configuration, loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seeds the hash chain: the first entry's prev_hash is derived from
    /// it. Opaque; never logged.
    #[serde(default)]
    pub genesis_seed: String,
}

/// A named upstream the proxy will forward to. The first URL path
/// segment of an inbound request selects the endpoint by name.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Journal file path (JSON Lines).
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Largest response body the audit mirror will hold, in bytes.
    /// Larger bodies are forwarded in full but truncated in the journal.
    #[serde(default = "default_max_audit_body_size")]
    pub max_audit_body_size: u64,
    /// Seconds before an open stream is force-finalized with
    /// STREAM_TIMEOUT.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: u64,
    /// Sequence-based reordering for streams that complete out of order.
    #[serde(default = "default_true")]
    pub enable_sequence_tracking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_true")]
    pub enable_extraction: bool,
    /// Base64 images whose decoded size is below this stay inline.
    #[serde(default = "default_min_size_kb")]
    pub min_size_kb: u64,
    #[serde(default = "default_media_path")]
    pub storage_path: String,
}

fn default_port() -> u16 {
    8080
}
fn default_storage_path() -> String {
    "./logs/audit.jsonl".into()
}
fn default_max_audit_body_size() -> u64 {
    10 * 1024 * 1024
}
fn default_stream_timeout() -> u64 {
    300
}
fn default_min_size_kb() -> u64 {
    100
}
fn default_media_path() -> String {
    "./logs/media".into()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            genesis_seed: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_audit_body_size: default_max_audit_body_size(),
            stream_timeout: default_stream_timeout(),
            enable_sequence_tracking: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enable_extraction: true,
            min_size_kb: default_min_size_kb(),
            storage_path: default_media_path(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a YAML file. `AITRAIL_PORT`
    /// overrides the configured port when set.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("failed to read config {}: {e}", path.as_ref().display())
        })?;
        let mut cfg: Config = serde_yaml::from_str(&raw)?;

        if let Ok(port) = std::env::var("AITRAIL_PORT") {
            cfg.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid AITRAIL_PORT: {port}"))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("invalid server port: {}", self.server.port);
        }
        if self.server.genesis_seed.is_empty() {
            anyhow::bail!("server.genesis_seed cannot be empty");
        }
        if self.endpoints.is_empty() {
            anyhow::bail!("at least one endpoint must be defined");
        }

        let mut names = std::collections::HashSet::new();
        for ep in &self.endpoints {
            if ep.name.is_empty() {
                anyhow::bail!("endpoint name cannot be empty");
            }
            if ep.target.is_empty() {
                anyhow::bail!("endpoint target cannot be empty for: {}", ep.name);
            }
            if !names.insert(ep.name.as_str()) {
                anyhow::bail!("duplicate endpoint name: {}", ep.name);
            }
        }

        if self.storage.path.is_empty() {
            anyhow::bail!("storage.path cannot be empty");
        }
        if self.streaming.max_audit_body_size == 0 {
            anyhow::bail!("streaming.max_audit_body_size must be positive");
        }
        if self.streaming.stream_timeout == 0 {
            anyhow::bail!("streaming.stream_timeout must be positive");
        }
        Ok(())
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|ep| ep.name == name)
    }
}
