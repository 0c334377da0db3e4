//! TOML configuration for the gatewatch service.
//!
//! Layered: an explicit path wins, then the `GATEWATCH_CONFIG` environment
//! variable, then the system location, then compiled-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::aggregator::StatusLabels;
use crate::analysis::decompose::StlParams;
use crate::analysis::model::FitOptions;

pub const CONFIG_ENV: &str = "GATEWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/gatewatch/gatewatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the gatewatch process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub decomposition: StlParams,
    #[serde(default)]
    pub estimator: FitOptions,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded gatewatch configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the env var and
    /// system locations fall through to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "GATEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings the analytics core cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.decomposition;
        if d.period < 2 {
            bail!("decomposition.period must be at least 2, got {}", d.period);
        }
        if d.seasonal < 3 || d.seasonal % 2 == 0 {
            bail!("decomposition.seasonal must be odd and at least 3, got {}", d.seasonal);
        }
        if let Some(trend) = d.trend {
            if trend % 2 == 0 || trend <= d.period {
                bail!(
                    "decomposition.trend must be odd and greater than the period, got {}",
                    trend
                );
            }
        }
        if let Some(low_pass) = d.low_pass {
            if low_pass % 2 == 0 || low_pass <= d.period {
                bail!(
                    "decomposition.low_pass must be odd and greater than the period, got {}",
                    low_pass
                );
            }
        }
        if d.seasonal_degree > 1 || d.trend_degree > 1 || d.low_pass_degree > 1 {
            bail!("decomposition degrees must be 0 or 1");
        }

        let e = &self.estimator;
        if e.inverse_regularization.is_nan() || e.inverse_regularization <= 0.0 {
            bail!("estimator.inverse_regularization must be positive");
        }
        if e.max_iterations == 0 {
            bail!("estimator.max_iterations must be at least 1");
        }

        self.analytics.offset()?;
        if self.analytics.granted_label.is_empty() || self.analytics.denied_label.is_empty() {
            bail!("analytics status labels must not be empty");
        }
        if self.analytics.granted_label == self.analytics.denied_label {
            bail!("analytics.granted_label and analytics.denied_label must differ");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding the `access_events` table.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/gatewatch.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Offset of the site's local time from UTC. Default is UTC-05:00 (Lima).
    pub utc_offset_minutes: i32,
    pub granted_label: String,
    pub denied_label: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        let labels = StatusLabels::default();
        Self {
            utc_offset_minutes: -300,
            granted_label: labels.granted,
            denied_label: labels.denied,
        }
    }
}

impl AnalyticsConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        match self
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
        {
            Some(offset) => Ok(offset),
            None => bail!(
                "analytics.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ),
        }
    }

    pub fn labels(&self) -> StatusLabels {
        StatusLabels {
            granted: self.granted_label.clone(),
            denied: self.denied_label.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = GatewatchConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:5000");
        assert_eq!(cfg.database.path, PathBuf::from("data/gatewatch.db"));
        assert_eq!(cfg.analytics.utc_offset_minutes, -300);
        assert_eq!(cfg.analytics.granted_label, "Acceso permitido");
        assert_eq!(cfg.analytics.denied_label, "Acceso denegado");
        assert_eq!(cfg.decomposition.period, 365);
        assert_eq!(cfg.decomposition.seasonal, 7);
        assert!(!cfg.decomposition.robust);
        assert_eq!(cfg.estimator.max_iterations, 100);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);

        cfg.validate().unwrap();
        assert_eq!(
            cfg.analytics.offset().unwrap(),
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"

[database]
path = "/var/lib/gatewatch/events.db"

[analytics]
utc_offset_minutes = 60
granted_label = "Access granted"
denied_label = "Access denied"

[decomposition]
period = 24
seasonal = 9
robust = true

[estimator]
inverse_regularization = 0.5
max_iterations = 50
tolerance = 1e-6

[logging]
level = "debug"
json = true
"#;

        let cfg: GatewatchConfig = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.database.path, PathBuf::from("/var/lib/gatewatch/events.db"));
        assert_eq!(cfg.analytics.labels().granted, "Access granted");
        assert_eq!(cfg.analytics.offset().unwrap().local_minus_utc(), 3600);
        assert_eq!(cfg.decomposition.period, 24);
        assert_eq!(cfg.decomposition.seasonal, 9);
        assert!(cfg.decomposition.robust);
        assert_eq!(cfg.decomposition.trend_degree, 1);
        assert_eq!(cfg.estimator.inverse_regularization, 0.5);
        assert_eq!(cfg.estimator.max_iterations, 50);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[decomposition]
period = 7
"#;
        let cfg: GatewatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.decomposition.period, 7);
        assert_eq!(cfg.decomposition.seasonal, 7);
        assert_eq!(cfg.server.bind, "0.0.0.0:5000");
        assert_eq!(cfg.estimator.tolerance, 1e-8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = GatewatchConfig::default();
        cfg.decomposition.period = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewatchConfig::default();
        cfg.decomposition.seasonal = 8;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewatchConfig::default();
        cfg.decomposition.trend = Some(101);
        assert!(cfg.validate().is_err());

        let mut cfg = GatewatchConfig::default();
        cfg.analytics.utc_offset_minutes = 24 * 60;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewatchConfig::default();
        cfg.analytics.denied_label = cfg.analytics.granted_label.clone();
        assert!(cfg.validate().is_err());

        let mut cfg = GatewatchConfig::default();
        cfg.estimator.inverse_regularization = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatewatch.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:7000\"\n").unwrap();

        let cfg = GatewatchConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7000");

        let missing = dir.path().join("missing.toml");
        assert!(GatewatchConfig::resolve(Some(&missing)).is_err());
    }
}
