//! Alert delivery over email and Telegram.

pub mod email;
pub mod telegram;
pub mod templates;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AlertsConfig;

pub use self::templates::RenderedAlert;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),

    #[error("failed to render alert: {0}")]
    Template(#[from] askama::Error),

    #[error("invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("smtp delivery failed: {0}")]
    Smtp(String),

    #[error("telegram API returned {status}: {body}")]
    Telegram { status: u16, body: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SlaViolation,
    Anomaly,
    System,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SlaViolation => "sla_violation",
            AlertKind::Anomaly => "anomaly",
            AlertKind::System => "system",
        }
    }

    /// Unknown kinds render with the system template.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "sla_violation" => AlertKind::SlaViolation,
            "anomaly" => AlertKind::Anomaly,
            _ => AlertKind::System,
        }
    }
}

/// Free-form alert fields; templates substitute placeholders for missing ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertData {
    pub source: Option<String>,
    pub target: Option<String>,
    pub severity: Option<String>,
    pub risk_score: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub explanation: Option<String>,
    pub latency: Option<f64>,
    pub packet_loss: Option<f64>,
    pub jitter: Option<f64>,
    pub congestion: Option<f64>,
    pub telemetry_id: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub data: AlertData,
}

/// One delivery channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, recipient: &str, alert: &RenderedAlert) -> Result<(), AlertError>;
}

/// Fans an alert out to the configured channels.
#[derive(Clone, Default)]
pub struct AlertService {
    email: Option<Arc<dyn Notifier>>,
    telegram: Option<Arc<dyn Notifier>>,
    /// Recipients for automatic alerts.
    pub default_email: Option<String>,
    pub default_telegram_chat_id: Option<String>,
}

impl AlertService {
    pub fn from_config(cfg: &AlertsConfig) -> Self {
        let email: Option<Arc<dyn Notifier>> = match email::EmailNotifier::from_config(cfg) {
            Ok(Some(n)) => Some(Arc::new(n)),
            Ok(None) => {
                warn!("SMTP credentials not configured, email alerts disabled");
                None
            }
            Err(e) => {
                warn!(error = %e, "invalid SMTP settings, email alerts disabled");
                None
            }
        };
        let telegram: Option<Arc<dyn Notifier>> = match telegram::TelegramNotifier::from_config(cfg) {
            Ok(Some(n)) => Some(Arc::new(n)),
            Ok(None) => {
                warn!("Telegram bot token not configured, telegram alerts disabled");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to build telegram client, telegram alerts disabled");
                None
            }
        };
        Self {
            email,
            telegram,
            default_email: cfg.default_email.clone(),
            default_telegram_chat_id: cfg.default_telegram_chat_id.clone(),
        }
    }

    pub fn with_notifiers(email: Option<Arc<dyn Notifier>>, telegram: Option<Arc<dyn Notifier>>) -> Self {
        Self {
            email,
            telegram,
            default_email: None,
            default_telegram_chat_id: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.email.is_some() || self.telegram.is_some()
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.email
            .iter()
            .chain(self.telegram.iter())
            .map(|n| n.channel())
            .collect()
    }

    /// Send to every channel that has a recipient. The result maps channel
    /// name to delivery success; channels without a recipient are absent.
    pub async fn send_multi_channel(
        &self,
        alert: &Alert,
        email: Option<&str>,
        telegram_chat_id: Option<&str>,
    ) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        let rendered = match templates::render(alert, Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                warn!(kind = alert.kind.as_str(), error = %e, "failed to render alert");
                if email.is_some() {
                    results.insert("email".to_string(), false);
                }
                if telegram_chat_id.is_some() {
                    results.insert("telegram".to_string(), false);
                }
                return results;
            }
        };

        for (channel, notifier, recipient) in [
            ("email", &self.email, email),
            ("telegram", &self.telegram, telegram_chat_id),
        ] {
            let Some(recipient) = recipient.filter(|r| !r.trim().is_empty()) else {
                continue;
            };
            let ok = match notifier {
                Some(n) => match n.send(recipient, &rendered).await {
                    Ok(()) => {
                        info!(channel, recipient, kind = alert.kind.as_str(), "alert sent");
                        true
                    }
                    Err(e) => {
                        warn!(channel, recipient, error = %e, "alert delivery failed");
                        false
                    }
                },
                None => {
                    warn!(channel, "{}", AlertError::NotConfigured(channel));
                    false
                }
            };
            results.insert(channel.to_string(), ok);
        }
        results
    }

    /// Alert the default recipients.
    pub async fn send_default(&self, alert: &Alert) -> BTreeMap<String, bool> {
        self.send_multi_channel(
            alert,
            self.default_email.as_deref(),
            self.default_telegram_chat_id.as_deref(),
        )
        .await
    }
}
