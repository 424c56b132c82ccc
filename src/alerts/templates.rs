//! Alert message bodies rendered with askama.

use askama::Template;
use chrono::{DateTime, Utc};

use crate::alerts::{Alert, AlertError, AlertKind};

const NOT_AVAILABLE: &str = "N/A";

/// Display-ready alert fields shared by every template.
#[derive(Debug, Clone)]
pub struct AlertView {
    pub kind: String,
    pub source: String,
    pub target: String,
    pub risk_pct: String,
    pub anomaly_pct: String,
    pub explanation: String,
    pub latency: String,
    pub packet_loss: String,
    pub jitter: String,
    pub congestion: String,
    pub title: String,
    pub message: String,
    pub telemetry_ref: String,
    pub timestamp: String,
    pub time: String,
    pub version: &'static str,
}

fn metric(v: Option<f64>) -> String {
    v.map(|x| format!("{}", x)).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn pct(v: Option<f64>) -> String {
    format!("{:.1}", v.unwrap_or(0.0) * 100.0)
}

impl AlertView {
    pub fn new(alert: &Alert, now: DateTime<Utc>) -> Self {
        let d = &alert.data;
        let or_unknown = |s: &Option<String>| s.clone().unwrap_or_else(|| "Unknown".to_string());
        Self {
            kind: alert.kind.as_str().to_string(),
            source: or_unknown(&d.source),
            target: or_unknown(&d.target),
            risk_pct: pct(d.risk_score),
            anomaly_pct: pct(d.anomaly_score),
            explanation: d
                .explanation
                .clone()
                .unwrap_or_else(|| "Unusual pattern detected".to_string()),
            latency: metric(d.latency),
            packet_loss: metric(d.packet_loss),
            jitter: metric(d.jitter),
            congestion: metric(d.congestion),
            title: d.title.clone().unwrap_or_else(|| "System Notification".to_string()),
            message: d
                .message
                .clone()
                .unwrap_or_else(|| "A system event has occurred.".to_string()),
            telemetry_ref: d.telemetry_id.map(|id| id.to_string()).unwrap_or_default(),
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Template)]
#[template(path = "alerts/sla_violation_email.html")]
struct SlaViolationEmail<'a> {
    v: &'a AlertView,
}

#[derive(Template)]
#[template(path = "alerts/anomaly_email.html")]
struct AnomalyEmail<'a> {
    v: &'a AlertView,
}

#[derive(Template)]
#[template(path = "alerts/system_email.html")]
struct SystemEmail<'a> {
    v: &'a AlertView,
}

#[derive(Template)]
#[template(path = "alerts/sla_violation_telegram.html")]
struct SlaViolationTelegram<'a> {
    v: &'a AlertView,
}

#[derive(Template)]
#[template(path = "alerts/anomaly_telegram.html")]
struct AnomalyTelegram<'a> {
    v: &'a AlertView,
}

#[derive(Template)]
#[template(path = "alerts/system_telegram.html")]
struct SystemTelegram<'a> {
    v: &'a AlertView,
}

/// One alert rendered for every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAlert {
    pub kind: AlertKind,
    pub subject: String,
    pub html: String,
    pub telegram: String,
}

pub fn render(alert: &Alert, now: DateTime<Utc>) -> Result<RenderedAlert, AlertError> {
    let v = AlertView::new(alert, now);
    let (subject, html, telegram) = match alert.kind {
        AlertKind::SlaViolation => (
            format!("🚨 SLA Violation Alert - {} → {}", v.source, v.target),
            SlaViolationEmail { v: &v }.render()?,
            SlaViolationTelegram { v: &v }.render()?,
        ),
        AlertKind::Anomaly => (
            format!("⚠️ Network Anomaly Detected - {} → {}", v.source, v.target),
            AnomalyEmail { v: &v }.render()?,
            AnomalyTelegram { v: &v }.render()?,
        ),
        AlertKind::System => (
            format!("🔔 System Alert - {}", v.title),
            SystemEmail { v: &v }.render()?,
            SystemTelegram { v: &v }.render()?,
        ),
    };
    Ok(RenderedAlert {
        kind: alert.kind,
        subject,
        html,
        telegram: telegram.trim().to_string(),
    })
}
