//! TOML configuration for slawatch.
//!
//! Layered: compiled-in defaults, then a TOML file located via
//! `SLAWATCH_CONFIG` or `/etc/slawatch/slawatch.toml`, then secrets and alert
//! recipients from the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ml::fallback::FallbackConfig;
use crate::ml::ScoringConfig;

pub const CONFIG_ENV: &str = "SLAWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/slawatch/slawatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: `SLAWATCH_CONFIG`, the system path, compiled-in
    /// defaults. Environment secrets are applied on top in every case.
    pub fn load_or_default() -> Self {
        let mut cfg = Self::from_files();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn from_files() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SLAWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
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
        Self::default()
    }

    /// Overlay alert credentials and recipients from `lookup` (normally the
    /// process environment). Unset or empty variables leave the value alone.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let a = &mut self.alerts;

        if let Some(v) = get("SMTP_SERVER") {
            a.smtp_server = v;
        }
        if let Some(v) = get("SMTP_PORT") {
            match v.parse() {
                Ok(port) => a.smtp_port = port,
                Err(_) => warn!(value = %v, "ignoring invalid SMTP_PORT"),
            }
        }
        if let Some(v) = get("SMTP_USERNAME") {
            a.smtp_username = Some(v);
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            a.smtp_password = Some(v);
        }
        if let Some(v) = get("FROM_EMAIL") {
            a.from_email = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            a.telegram_bot_token = Some(v);
        }
        if let Some(v) = get("DEFAULT_ALERT_EMAIL") {
            a.default_email = Some(v);
        }
        if let Some(v) = get("DEFAULT_TELEGRAM_CHAT_ID") {
            a.default_telegram_chat_id = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins; `*` allows any.
    pub cors_allow_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            cors_allow_origins: vec!["*".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/slawatch.db"),
            pool_size: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding the trained artifacts.
    pub dir: PathBuf,
    pub scoring: ScoringConfig,
    pub fallback: FallbackConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            scoring: ScoringConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    /// Sender address; defaults to the SMTP username.
    pub from_email: Option<String>,
    #[serde(skip_serializing)]
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
    /// Recipient of automatic high-risk alerts.
    pub default_email: Option<String>,
    pub default_telegram_chat_id: Option<String>,
    /// Violation probability above which predict-and-store raises an alert.
    pub high_risk_threshold: f64,
    pub timeout_sec: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_email: None,
            telegram_bot_token: None,
            telegram_api_base: "https://api.telegram.org".to_string(),
            default_email: None,
            default_telegram_chat_id: None,
            high_risk_threshold: 0.75,
            timeout_sec: 10,
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
