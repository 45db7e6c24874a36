//! Ordered, idempotent schema migrations (§4.4 "A lightweight
//! schema-migration mechanism: ordered, idempotent migration steps applied
//! at startup; version recorded in the database").

use rusqlite::Connection;

use crate::Error;

/// One migration step, applied in order exactly once. Steps must be
/// idempotent against a partially-migrated database (e.g. `CREATE TABLE IF
/// NOT EXISTS`) since a crash between a step's statements and the version
/// bump is possible.
struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "
            CREATE TABLE IF NOT EXISTS plc_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                value REAL NOT NULL,
                quality_flag TEXT NOT NULL,
                ring_number INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_plc_samples_timestamp ON plc_samples (timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_plc_samples_tag_timestamp ON plc_samples (tag, timestamp_ms);

            CREATE TABLE IF NOT EXISTS attitude_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                value REAL NOT NULL,
                quality_flag TEXT NOT NULL,
                ring_number INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_attitude_samples_timestamp ON attitude_samples (timestamp_ms);

            CREATE TABLE IF NOT EXISTS monitoring_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                value REAL NOT NULL,
                quality_flag TEXT NOT NULL,
                ring_number INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_monitoring_samples_timestamp ON monitoring_samples (timestamp_ms);

            CREATE TABLE IF NOT EXISTS ring_summary (
                ring_number INTEGER PRIMARY KEY,
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                aggregate_indicators TEXT NOT NULL,
                attitude_indicators TEXT NOT NULL,
                settlement_value REAL,
                displacement_value REAL,
                derived_indicators TEXT NOT NULL,
                geology_zone TEXT,
                data_completeness_flag TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced_to_cloud INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ring_summary_ring_number ON ring_summary (ring_number);
        ",
    },
];

/// Applies every migration whose version is greater than the database's
/// current recorded version, each inside its own transaction, bumping
/// `user_version` as it goes.
pub(crate) fn apply(conn: &mut Connection) -> Result<(), Error> {
    let current_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        tracing::info!(version = migration.version, "applied store migration");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply(&mut conn).unwrap();
        apply(&mut conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }
}
