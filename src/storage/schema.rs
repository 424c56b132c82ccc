//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 2;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY,
            timestamp TEXT NOT NULL,
            bandwidth REAL NOT NULL,
            throughput REAL NOT NULL,
            congestion REAL NOT NULL,
            packet_loss REAL NOT NULL,
            latency REAL NOT NULL,
            jitter REAL NOT NULL,
            routers TEXT,
            planned_route TEXT,
            network_measure TEXT NOT NULL,
            network_target TEXT NOT NULL,
            video_target TEXT,
            percentage_video_occupancy REAL,
            bitrate_video REAL,
            number_videos INTEGER,
            sla_violation INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_timestamp ON telemetry(timestamp);
        CREATE INDEX IF NOT EXISTS idx_telemetry_route ON telemetry(network_measure, network_target);
        CREATE INDEX IF NOT EXISTS idx_telemetry_violation ON telemetry(sla_violation);",
    )?;

    // Migration: prediction provenance on stored rows
    let has_model_version: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('telemetry') WHERE name='model_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    if has_model_version == 0 {
        conn.execute("ALTER TABLE telemetry ADD COLUMN model_version TEXT", [])?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error

        let columns: i64 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('telemetry') WHERE name='model_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(columns, 1);
    }
}
