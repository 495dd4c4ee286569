//! Engine configuration loading
//!
//! Every tunable of the engine lives here with its compiled default.
//! Resolution priority order:
//! 1. Explicit path (highest priority)
//! 2. `TONBEAT_CONFIG` environment variable
//! 3. Platform config dir (`<config>/tonbeat/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A partial TOML file works; omitted fields keep their defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TONBEAT_CONFIG";

/// Music source cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum live entries before oldest-first eviction
    pub max_entries: usize,
    /// Entry lifetime in seconds
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_age_secs: 30 * 60,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Session expiry sweep policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Music source resolution timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Foreground generation request bound in seconds
    pub timeout_secs: u64,
    /// Background preload bound in seconds
    pub preload_timeout_secs: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            preload_timeout_secs: 45,
        }
    }
}

impl ResolveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_secs(self.preload_timeout_secs)
    }
}

/// Counted-listen threshold policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Absolute elapsed-time threshold in seconds
    pub min_listen_time_secs: f64,
    /// Fractional-duration threshold (0.0..=1.0)
    pub min_listen_percentage: f64,
    /// Per-track cooldown between recordings, in seconds
    pub cooldown_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            min_listen_time_secs: 30.0,
            min_listen_percentage: 0.8,
            cooldown_secs: 30,
        }
    }
}

impl ListenConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Effective threshold in seconds for a track of the given duration
    pub fn threshold_secs(&self, duration: f64) -> f64 {
        self.min_listen_time_secs
            .min(duration * self.min_listen_percentage)
    }
}

/// Listen delivery and retry-queue policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-attempt bound in seconds
    pub timeout_secs: u64,
    /// Attempts before the record is queued
    pub max_attempts: u32,
    /// Backoff between attempts is `base × attempt`
    pub backoff_base_millis: u64,
    /// Retry-queue sweep cadence in seconds
    pub sweep_interval_secs: u64,
    /// Queued records older than this are dropped, in seconds
    pub queue_max_age_secs: u64,
    /// Inter-request delay for batch delivery, in milliseconds
    pub batch_delay_millis: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_attempts: 3,
            backoff_base_millis: 1000,
            sweep_interval_secs: 30,
            queue_max_age_secs: 5 * 60,
            batch_delay_millis: 300,
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_millis * attempt as u64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn queue_max_age(&self) -> Duration {
        Duration::from_secs(self.queue_max_age_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_millis)
    }
}

/// Playback controller timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Progress clock tick in milliseconds
    pub tick_interval_millis: u64,
    /// Assumed duration in seconds when the output has not reported one
    pub default_duration_secs: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tick_interval_millis: 1000,
            default_duration_secs: 180.0,
        }
    }
}

impl PlayerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub resolve: ResolveConfig,
    pub listen: ListenConfig,
    pub delivery: DeliveryConfig,
    pub player: PlayerConfig,
}

impl EngineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Load following the priority order documented at module level
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            info!(path = %path.display(), "loading config from explicit path");
            let text = std::fs::read_to_string(path)?;
            return Self::from_toml_str(&text);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!(path, "loading config from {}", CONFIG_ENV_VAR);
            let text = std::fs::read_to_string(&path)?;
            return Self::from_toml_str(&text);
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                info!(path = %path.display(), "loading config from platform dir");
                let text = std::fs::read_to_string(&path)?;
                return Self::from_toml_str(&text);
            }
        }

        debug!("no config file found; using compiled defaults");
        Ok(Self::default())
    }
}

/// Platform config file location (`<config>/tonbeat/config.toml`)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tonbeat").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_compiled_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.max_age(), Duration::from_secs(1800));
        assert_eq!(config.session.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.resolve.timeout(), Duration::from_secs(30));
        assert_eq!(config.resolve.preload_timeout(), Duration::from_secs(45));
        assert_eq!(config.listen.min_listen_time_secs, 30.0);
        assert_eq!(config.listen.min_listen_percentage, 0.8);
        assert_eq!(config.delivery.timeout(), Duration::from_secs(5));
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.queue_max_age(), Duration::from_secs(300));
        assert_eq!(config.player.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_threshold_uses_minimum() {
        let listen = ListenConfig::default();
        // Short track: 0.8 × 20 = 16 wins over the absolute 30
        assert_eq!(listen.threshold_secs(20.0), 16.0);
        // Long track: the absolute 30 wins over 0.8 × 300 = 240
        assert_eq!(listen.threshold_secs(300.0), 30.0);
    }

    #[test]
    fn test_backoff_scales_with_attempt() {
        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.backoff(1), Duration::from_millis(1000));
        assert_eq!(delivery.backoff(2), Duration::from_millis(2000));
        assert_eq!(delivery.backoff(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            max_entries = 10

            [listen]
            min_listen_percentage = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 10);
        // Untouched fields keep their defaults
        assert_eq!(config.cache.max_age_secs, 1800);
        assert_eq!(config.listen.min_listen_percentage, 0.5);
        assert_eq!(config.listen.min_listen_time_secs, 30.0);
        assert_eq!(config.delivery.max_attempts, 3);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("cache = \"not a table\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[delivery]\nmax_attempts = 5").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.cache.max_entries, 50);
    }

    #[test]
    fn test_config_round_trip() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.cache.max_entries, config.cache.max_entries);
        assert_eq!(parsed.delivery.backoff_base_millis, config.delivery.backoff_base_millis);
    }
}
