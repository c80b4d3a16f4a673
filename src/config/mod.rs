//! Layered configuration with TOML support
//!
//! Provides unified configuration for every component: the engine, the
//! reputation ledger, the golden ticket engine, the control-plane client
//! and the checkpoint manager, plus the ambient server/logging settings —
//! with environment variable override and validation, same layering as the
//! teacher's `ProductionConfig`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::model::config::{KvCacheQuantization, RopeScalingType};

/// Complete process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShardConfig {
    pub server: ServerConfig,
    pub model: ModelSettings,
    pub golden_ticket: GoldenTicketSettings,
    pub control_plane: ControlPlaneSettings,
    pub checkpoint: CheckpointSettings,
    pub logging: LoggingConfig,
}

impl ShardConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        toml::from_str(&contents).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Load from the file named by `SHARD_CONFIG`, or defaults, then apply
    /// per-field environment overrides.
    pub fn load() -> Self {
        let mut config = if let Ok(path) = std::env::var("SHARD_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    info!("Loaded config from {}", path);
                    cfg
                }
                Err(e) => {
                    warn!("Failed to load config: {}, using defaults", e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(path) = std::env::var("SHARD_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }

        if let Ok(rate) = std::env::var("SHARD_GOLDEN_TICKET_RATE") {
            if let Ok(v) = rate.parse() {
                self.golden_ticket.injection_rate = v;
            }
        }
        if let Ok(v) = std::env::var("SHARD_REPUTATION_THRESHOLD") {
            if let Ok(v) = v.parse() {
                self.golden_ticket.reputation_threshold = v;
            }
        }
        if let Ok(v) = std::env::var("SHARD_MIN_ATTEMPTS_BEFORE_BAN") {
            if let Ok(v) = v.parse() {
                self.golden_ticket.min_attempts_before_ban = v;
            }
        }
        if let Ok(v) = std::env::var("SHARD_BAN_DURATION_HOURS") {
            if let Ok(v) = v.parse() {
                self.golden_ticket.ban_duration_hours = v;
            }
        }

        if let Ok(v) = std::env::var("SHARD_SCOUT_TIMEOUT_MS") {
            if let Ok(v) = v.parse() {
                self.control_plane.scout_result_timeout_ms = v;
            }
        }
        if let Ok(v) = std::env::var("SHARD_RUST_URL") {
            self.control_plane.base_url = v;
        }

        if let Ok(v) = std::env::var("SHARD_CHECKPOINT_EVERY_N") {
            if let Ok(v) = v.parse() {
                self.checkpoint.every_n_tokens = v;
            }
        }
    }

    /// Validate configuration, returning every problem found (not just the first).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.golden_ticket.injection_rate) {
            errors.push("golden_ticket.injection_rate must be within [0.0, 1.0]".to_string());
        }
        if !(0.0..=1.0).contains(&self.golden_ticket.reputation_threshold) {
            errors.push("golden_ticket.reputation_threshold must be within [0.0, 1.0]".to_string());
        }
        if self.golden_ticket.min_attempts_before_ban == 0 {
            errors.push("golden_ticket.min_attempts_before_ban must be at least 1".to_string());
        }

        if self.control_plane.scout_result_timeout_ms == 0 {
            errors.push("control_plane.scout_result_timeout_ms must be greater than 0".to_string());
        }
        if self.control_plane.broadcast_timeout_ms == 0 {
            errors.push("control_plane.broadcast_timeout_ms must be greater than 0".to_string());
        }

        if self.checkpoint.every_n_tokens == 0 {
            errors.push("checkpoint.every_n_tokens must be at least 1".to_string());
        }
        if self.checkpoint.tail_len < 16 {
            errors.push("checkpoint.tail_len must be at least 16".to_string());
        }

        if self.model.n_ctx < 512 {
            errors.push("model.n_ctx must be at least 512".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))
    }
}

/// Ambient HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub rate_limit: crate::utils::config::RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_enabled: true,
            rate_limit: crate::utils::config::RateLimitConfig::default(),
        }
    }
}

/// Heavy-model loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub gpu_layers: u32,
    pub threads: u32,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub kv_cache_type: KvCacheQuantization,
    pub rope_scaling: RopeScalingType,
    pub rope_scale_factor: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/model.gguf"),
            gpu_layers: 0,
            threads: num_cpus::get() as u32,
            n_ctx: 4096,
            n_batch: 512,
            use_mmap: true,
            use_mlock: false,
            kv_cache_type: KvCacheQuantization::F16,
            rope_scaling: RopeScalingType::None,
            rope_scale_factor: 1.0,
        }
    }
}

/// Golden Ticket / reputation settings (C2 + C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldenTicketSettings {
    pub injection_rate: f64,
    pub reputation_threshold: f64,
    pub min_attempts_before_ban: u32,
    pub ban_duration_hours: f64,
    pub reputation_db_path: Option<PathBuf>,
}

impl Default for GoldenTicketSettings {
    fn default() -> Self {
        Self {
            injection_rate: crate::golden_ticket::DEFAULT_INJECTION_RATE,
            reputation_threshold: crate::reputation::DEFAULT_REPUTATION_THRESHOLD,
            min_attempts_before_ban: crate::reputation::DEFAULT_MIN_ATTEMPTS_BEFORE_BAN,
            ban_duration_hours: crate::reputation::DEFAULT_BAN_DURATION_HOURS,
            reputation_db_path: None,
        }
    }
}

/// Control-plane client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    pub base_url: String,
    pub scout_result_timeout_ms: u64,
    pub broadcast_timeout_ms: u64,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7700".to_string(),
            scout_result_timeout_ms: (crate::control_plane::DEFAULT_SCOUT_RESULT_TIMEOUT_S
                * 1000.0) as u64,
            broadcast_timeout_ms: (crate::control_plane::DEFAULT_BROADCAST_TIMEOUT_S * 1000.0)
                as u64,
        }
    }
}

/// KV checkpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub every_n_tokens: usize,
    pub tail_len: usize,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            every_n_tokens: crate::checkpoint::DEFAULT_CHECKPOINT_EVERY_N_TOKENS,
            tail_len: crate::checkpoint::DEFAULT_CHECKPOINT_TAIL_LEN,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            timestamps: true,
        }
    }
}

/// Generate an example configuration file's contents.
pub fn generate_example_config() -> String {
    ShardConfig::default()
        .to_toml()
        .unwrap_or_else(|_| "# Failed to generate".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShardConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_injection_rate() {
        let mut config = ShardConfig::default();
        config.golden_ticket.injection_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_small_context() {
        let mut config = ShardConfig::default();
        config.model.n_ctx = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ShardConfig::default();
        let toml = config.to_toml().unwrap();
        assert!(!toml.is_empty());
        let parsed: ShardConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("SHARD_GOLDEN_TICKET_RATE", "0.25");
        let mut config = ShardConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.golden_ticket.injection_rate, 0.25);
        std::env::remove_var("SHARD_GOLDEN_TICKET_RATE");
    }
}
