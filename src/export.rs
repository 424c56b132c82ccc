//! CSV and JSON renderings of stored telemetry.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::telemetry::{round2, TelemetryRecord};

/// Rows exported when no time window is given.
pub const DEFAULT_EXPORT_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => bail!("unsupported export format '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    SlaMetrics,
    BandwidthUsage,
}

impl ExportKind {
    pub fn file_stem(&self) -> &'static str {
        match self {
            ExportKind::SlaMetrics => "sla_metrics",
            ExportKind::BandwidthUsage => "bandwidth_usage",
        }
    }
}

impl FromStr for ExportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sla-metrics" | "sla_metrics" => Ok(ExportKind::SlaMetrics),
            "bandwidth-usage" | "bandwidth_usage" => Ok(ExportKind::BandwidthUsage),
            other => bail!("unknown export '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaMetricsRow {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub latency: f64,
    pub packet_loss: f64,
    pub sla_violation: Option<bool>,
    pub throughput: f64,
    pub bandwidth: f64,
}

impl From<&TelemetryRecord> for SlaMetricsRow {
    fn from(r: &TelemetryRecord) -> Self {
        Self {
            timestamp: r.timestamp,
            source: r.network_measure.clone(),
            target: r.network_target.clone(),
            latency: r.latency,
            packet_loss: r.packet_loss,
            sla_violation: r.sla_violation,
            throughput: r.throughput,
            bandwidth: r.bandwidth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthUsageRow {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub bandwidth: f64,
    pub throughput: f64,
    pub utilization_percent: f64,
}

impl From<&TelemetryRecord> for BandwidthUsageRow {
    fn from(r: &TelemetryRecord) -> Self {
        let utilization = if r.bandwidth > 0.0 {
            r.throughput / r.bandwidth * 100.0
        } else {
            0.0
        };
        Self {
            timestamp: r.timestamp,
            source: r.network_measure.clone(),
            target: r.network_target.clone(),
            bandwidth: r.bandwidth,
            throughput: r.throughput,
            utilization_percent: round2(utilization),
        }
    }
}

/// Rendered export.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Csv { filename: String, data: String },
    Json(serde_json::Value),
}

pub fn export_filename(kind: ExportKind, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", kind.file_stem(), now.format("%Y%m%d_%H%M%S"))
}

pub fn render(
    kind: ExportKind,
    format: ExportFormat,
    records: &[TelemetryRecord],
    now: DateTime<Utc>,
) -> Result<Rendered> {
    match (kind, format) {
        (ExportKind::SlaMetrics, f) => {
            let rows: Vec<SlaMetricsRow> = records.iter().map(SlaMetricsRow::from).collect();
            finish(kind, f, &rows, now)
        }
        (ExportKind::BandwidthUsage, f) => {
            let rows: Vec<BandwidthUsageRow> = records.iter().map(BandwidthUsageRow::from).collect();
            finish(kind, f, &rows, now)
        }
    }
}

fn finish<T: Serialize>(
    kind: ExportKind,
    format: ExportFormat,
    rows: &[T],
    now: DateTime<Utc>,
) -> Result<Rendered> {
    match format {
        ExportFormat::Json => Ok(Rendered::Json(serde_json::to_value(rows)?)),
        ExportFormat::Csv => Ok(Rendered::Csv {
            filename: export_filename(kind, now),
            data: to_csv(rows)?,
        }),
    }
}

/// Header row plus one line per record. An empty slice renders as an empty string.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row).context("failed to encode CSV row")?;
    }
    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
