//! Telemetry records: CRUD and aggregate queries.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

/// Latency (ms) above which a recent record counts toward `anomaly_count`.
pub const STATS_ANOMALY_LATENCY_MS: f64 = 15.0;

/// Telemetry sample as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTelemetry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub bandwidth: f64,
    pub throughput: f64,
    pub congestion: f64,
    pub packet_loss: f64,
    pub latency: f64,
    pub jitter: f64,
    #[serde(default)]
    pub routers: Option<String>,
    #[serde(default)]
    pub planned_route: Option<String>,
    /// Source node.
    pub network_measure: String,
    /// Target node.
    pub network_target: String,
    #[serde(default)]
    pub video_target: Option<String>,
    #[serde(default)]
    pub percentage_video_occupancy: Option<f64>,
    #[serde(default)]
    pub bitrate_video: Option<f64>,
    #[serde(default)]
    pub number_videos: Option<i64>,
    #[serde(default)]
    pub sla_violation: Option<bool>,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl NewTelemetry {
    pub fn features(&self) -> FeatureVector {
        FeatureVector::new(
            self.bandwidth,
            self.throughput,
            self.congestion,
            self.packet_loss,
            self.latency,
            self.jitter,
        )
    }

    /// Range checks beyond the feature contract.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.features().validate().map_err(|e| e.to_string())?;
        if self.network_measure.trim().is_empty() || self.network_target.trim().is_empty() {
            return Err("network_measure and network_target are required".to_string());
        }
        if let Some(p) = self.percentage_video_occupancy {
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentage_video_occupancy out of range: {}", p));
            }
        }
        if self.bitrate_video.is_some_and(|b| b < 0.0 || !b.is_finite()) {
            return Err("bitrate_video must be non-negative".to_string());
        }
        if self.number_videos.is_some_and(|n| n < 0) {
            return Err("number_videos must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Stored telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub bandwidth: f64,
    pub throughput: f64,
    pub congestion: f64,
    pub packet_loss: f64,
    pub latency: f64,
    pub jitter: f64,
    pub routers: Option<String>,
    pub planned_route: Option<String>,
    pub network_measure: String,
    pub network_target: String,
    pub video_target: Option<String>,
    pub percentage_video_occupancy: Option<f64>,
    pub bitrate_video: Option<f64>,
    pub number_videos: Option<i64>,
    pub sla_violation: Option<bool>,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn features(&self) -> FeatureVector {
        FeatureVector::new(
            self.bandwidth,
            self.throughput,
            self.congestion,
            self.packet_loss,
            self.latency,
            self.jitter,
        )
    }
}

/// Query options for [`list`]. Every filter is optional; results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryFilter {
    #[serde(default)]
    pub skip: u32,
    #[serde(default)]
    pub limit: Option<u32>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub total_records: i64,
    pub sla_violations: i64,
    /// Percentage, rounded to 2 places.
    pub violation_rate: f64,
    /// Over the last 24 hours.
    pub avg_latency: f64,
    pub avg_throughput: f64,
    pub anomaly_count: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub source: String,
    pub target: String,
    pub record_count: i64,
    pub avg_latency: f64,
    pub avg_throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub connections: Vec<RouteSummary>,
    pub total_connections: usize,
}

/// Fixed-width UTC rendering so stored timestamps compare lexicographically.
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

const COLUMNS: &str = "id, timestamp, bandwidth, throughput, congestion, packet_loss, latency, jitter,
    routers, planned_route, network_measure, network_target, video_target,
    percentage_video_occupancy, bitrate_video, number_videos, sla_violation, model_version,
    created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    let timestamp: String = row.get(1)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;
    Ok(TelemetryRecord {
        id: row.get(0)?,
        timestamp: parse_ts(&timestamp)?,
        bandwidth: row.get(2)?,
        throughput: row.get(3)?,
        congestion: row.get(4)?,
        packet_loss: row.get(5)?,
        latency: row.get(6)?,
        jitter: row.get(7)?,
        routers: row.get(8)?,
        planned_route: row.get(9)?,
        network_measure: row.get(10)?,
        network_target: row.get(11)?,
        video_target: row.get(12)?,
        percentage_video_occupancy: row.get(13)?,
        bitrate_video: row.get(14)?,
        number_videos: row.get(15)?,
        sla_violation: row.get(16)?,
        model_version: row.get(17)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn insert(conn: &Connection, t: &NewTelemetry) -> Result<TelemetryRecord> {
    insert_at(conn, t, Utc::now())
}

/// Insert with an explicit clock; `timestamp` defaults to `now`.
pub fn insert_at(conn: &Connection, t: &NewTelemetry, now: DateTime<Utc>) -> Result<TelemetryRecord> {
    let timestamp = t.timestamp.unwrap_or(now);
    conn.execute(
        "INSERT INTO telemetry (timestamp, bandwidth, throughput, congestion, packet_loss, latency, jitter,
            routers, planned_route, network_measure, network_target, video_target,
            percentage_video_occupancy, bitrate_video, number_videos, sla_violation, model_version,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
        params![
            ts(&timestamp),
            t.bandwidth,
            t.throughput,
            t.congestion,
            t.packet_loss,
            t.latency,
            t.jitter,
            t.routers,
            t.planned_route,
            t.network_measure,
            t.network_target,
            t.video_target,
            t.percentage_video_occupancy,
            t.bitrate_video,
            t.number_videos,
            t.sla_violation,
            t.model_version,
            ts(&now),
        ],
    )
    .context("failed to insert telemetry")?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.with_context(|| format!("telemetry {} vanished after insert", id))
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<TelemetryRecord>> {
    let sql = format!("SELECT {} FROM telemetry WHERE id = ?1", COLUMNS);
    let record = conn.query_row(&sql, params![id], from_row).optional()?;
    Ok(record)
}

/// Filtered listing, newest first. Source and target filter independently.
pub fn list(conn: &Connection, filter: &TelemetryFilter) -> Result<Vec<TelemetryRecord>> {
    let mut clauses = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    if let Some(source) = &filter.source {
        args.push(Value::Text(source.clone()));
        clauses.push(format!("network_measure = ?{}", args.len()));
    }
    if let Some(target) = &filter.target {
        args.push(Value::Text(target.clone()));
        clauses.push(format!("network_target = ?{}", args.len()));
    }
    if let Some(start) = &filter.start_time {
        args.push(Value::Text(ts(start)));
        clauses.push(format!("timestamp >= ?{}", args.len()));
    }
    if let Some(end) = &filter.end_time {
        args.push(Value::Text(ts(end)));
        clauses.push(format!("timestamp <= ?{}", args.len()));
    }

    let mut sql = format!("SELECT {} FROM telemetry", COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    // SQLite needs a LIMIT before OFFSET; -1 means unbounded
    args.push(Value::Integer(filter.limit.map_or(-1, i64::from)));
    sql.push_str(&format!(" ORDER BY timestamp DESC, id DESC LIMIT ?{}", args.len()));
    args.push(Value::Integer(i64::from(filter.skip)));
    sql.push_str(&format!(" OFFSET ?{}", args.len()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_violations(conn: &Connection, limit: u32) -> Result<Vec<TelemetryRecord>> {
    let sql = format!(
        "SELECT {} FROM telemetry WHERE sla_violation = 1 ORDER BY timestamp DESC, id DESC LIMIT ?1",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Records with latency above `threshold_ms`, worst first.
pub fn list_high_latency(conn: &Connection, threshold_ms: f64, limit: u32) -> Result<Vec<TelemetryRecord>> {
    let sql = format!(
        "SELECT {} FROM telemetry WHERE latency > ?1 ORDER BY latency DESC, id DESC LIMIT ?2",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![threshold_ms, limit], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn stats(conn: &Connection, now: DateTime<Utc>) -> Result<TelemetryStats> {
    let (total_records, sla_violations): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN sla_violation = 1 THEN 1 ELSE 0 END), 0) FROM telemetry",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let since = ts(&(now - Duration::hours(24)));
    let (avg_latency, avg_throughput, anomaly_count): (Option<f64>, Option<f64>, i64) = conn.query_row(
        "SELECT AVG(latency), AVG(throughput),
                COALESCE(SUM(CASE WHEN latency > ?2 THEN 1 ELSE 0 END), 0)
         FROM telemetry WHERE timestamp >= ?1",
        params![since, STATS_ANOMALY_LATENCY_MS],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let violation_rate = if total_records > 0 {
        sla_violations as f64 / total_records as f64 * 100.0
    } else {
        0.0
    };

    Ok(TelemetryStats {
        total_records,
        sla_violations,
        violation_rate: round2(violation_rate),
        avg_latency: round2(avg_latency.unwrap_or(0.0)),
        avg_throughput: round2(avg_throughput.unwrap_or(0.0)),
        anomaly_count,
        last_updated: now,
    })
}

/// Per source/target pair aggregates.
pub fn network_summary(conn: &Connection) -> Result<NetworkSummary> {
    let mut stmt = conn.prepare(
        "SELECT network_measure, network_target, COUNT(id), AVG(latency), AVG(throughput)
         FROM telemetry
         GROUP BY network_measure, network_target
         ORDER BY network_measure, network_target",
    )?;
    let connections = stmt
        .query_map([], |row| {
            Ok(RouteSummary {
                source: row.get(0)?,
                target: row.get(1)?,
                record_count: row.get(2)?,
                avg_latency: round2(row.get::<_, f64>(3)?),
                avg_throughput: round2(row.get::<_, f64>(4)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(NetworkSummary {
        total_connections: connections.len(),
        connections,
    })
}

/// Delete records whose timestamp is older than `days` before `now`.
pub fn delete_older_than(conn: &Connection, days: u32, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = ts(&(now - Duration::days(i64::from(days))));
    let deleted = conn.execute("DELETE FROM telemetry WHERE timestamp < ?1", params![cutoff])?;
    Ok(deleted)
}
