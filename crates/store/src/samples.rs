//! Persistence for the three raw sample tables (§3 "PLC Sample / Attitude
//! Sample / Monitoring Sample").

use rusqlite::{params, Connection, OptionalExtension};

use ringcore_model::{QualityFlag, Sample, Table};

use crate::Error;

fn table_name(table: Table) -> &'static str {
    match table {
        Table::Plc => "plc_samples",
        Table::Attitude => "attitude_samples",
        Table::Monitoring => "monitoring_samples",
    }
}

fn flag_to_str(flag: QualityFlag) -> &'static str {
    match flag {
        QualityFlag::Good => "good",
        QualityFlag::Interpolated => "interpolated",
        QualityFlag::OutOfRange => "out_of_range",
        QualityFlag::PhysicallyImplausible => "physically_implausible",
        QualityFlag::Missing => "missing",
    }
}

fn flag_from_str(s: &str) -> Result<QualityFlag, Error> {
    Ok(match s {
        "good" => QualityFlag::Good,
        "interpolated" => QualityFlag::Interpolated,
        "out_of_range" => QualityFlag::OutOfRange,
        "physically_implausible" => QualityFlag::PhysicallyImplausible,
        "missing" => QualityFlag::Missing,
        other => {
            return Err(Error::CorruptRow {
                reason: format!("unknown quality_flag '{other}'"),
            })
        }
    })
}

/// Inserts every row of `samples` into `table` inside a single transaction.
/// Per (I1), callers must not pass samples flagged [`QualityFlag::Missing`];
/// this is a store-level invariant, not something the store itself filters.
pub(crate) fn insert_samples(conn: &mut Connection, table: Table, samples: &[Sample]) -> Result<(), Error> {
    if samples.is_empty() {
        return Ok(());
    }
    let tx = conn.transaction()?;
    {
        let sql = format!(
            "INSERT INTO {} (source_id, tag, timestamp_ms, value, quality_flag, ring_number) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table_name(table)
        );
        let mut stmt = tx.prepare(&sql)?;
        for sample in samples {
            debug_assert!(sample.quality != QualityFlag::Missing, "missing samples must not reach the store (I1)");
            let _ = stmt.execute(params![
                sample.source_id,
                sample.tag,
                sample.timestamp_ms,
                sample.value,
                flag_to_str(sample.quality),
                sample.ring_number,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Inserts rows into more than one table inside a single transaction (§6
/// `submit_manual_logs`: "atomic insert into the corresponding tables").
/// Tables with an empty slice are skipped; an empty `batches` is a no-op.
pub(crate) fn insert_samples_multi_table(conn: &mut Connection, batches: &[(Table, &[Sample])]) -> Result<(), Error> {
    if batches.iter().all(|(_, samples)| samples.is_empty()) {
        return Ok(());
    }
    let tx = conn.transaction()?;
    for (table, samples) in batches {
        if samples.is_empty() {
            continue;
        }
        let sql = format!(
            "INSERT INTO {} (source_id, tag, timestamp_ms, value, quality_flag, ring_number) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table_name(*table)
        );
        let mut stmt = tx.prepare(&sql)?;
        for sample in *samples {
            debug_assert!(sample.quality != QualityFlag::Missing, "missing samples must not reach the store (I1)");
            let _ = stmt.execute(params![
                sample.source_id,
                sample.tag,
                sample.timestamp_ms,
                sample.value,
                flag_to_str(sample.quality),
                sample.ring_number,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn row_to_sample(table: Table, row: &rusqlite::Row) -> rusqlite::Result<Sample> {
    let source_id: String = row.get(0)?;
    let tag: String = row.get(1)?;
    let timestamp_ms: i64 = row.get(2)?;
    let value: f64 = row.get(3)?;
    let flag_str: String = row.get(4)?;
    let ring_number: Option<i64> = row.get(5)?;
    let quality = flag_from_str(&flag_str).unwrap_or(QualityFlag::Good);
    let mut sample = Sample::new(source_id, tag, table, timestamp_ms, value);
    sample.quality = quality;
    sample.ring_number = ring_number;
    Ok(sample)
}

/// Returns every sample in `table` with `start_ts <= timestamp_ms < end_ts`
/// (half-open, per I2/P2), ordered by timestamp.
pub(crate) fn samples_in_range(conn: &Connection, table: Table, start_ts: i64, end_ts: i64) -> Result<Vec<Sample>, Error> {
    let sql = format!(
        "SELECT source_id, tag, timestamp_ms, value, quality_flag, ring_number FROM {} WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2 ORDER BY timestamp_ms ASC",
        table_name(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![start_ts, end_ts], |row| row_to_sample(table, row))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Returns the maximum `ring_number` recorded in `table`, or `None` if the
/// table has no samples with a ring number stamped yet.
pub(crate) fn max_ring_number(conn: &Connection, table: Table) -> Result<Option<i64>, Error> {
    let sql = format!("SELECT MAX(ring_number) FROM {}", table_name(table));
    Ok(conn.query_row(&sql, [], |row| row.get(0)).optional()?.flatten())
}

/// Returns the earliest timestamp at which `ring_number` was observed in
/// `table`, the anchor for that ring's `start_ts` (§4.5 step 2).
pub(crate) fn min_timestamp_for_ring(conn: &Connection, table: Table, ring_number: i64) -> Result<Option<i64>, Error> {
    let sql = format!("SELECT MIN(timestamp_ms) FROM {} WHERE ring_number = ?1", table_name(table));
    Ok(conn.query_row(&sql, params![ring_number], |row| row.get(0)).optional()?.flatten())
}

/// Returns the number of rows in `table` with `timestamp_ms` in `[start_ts,
/// end_ts)`, used by `get_ring(..., include_raw_counts = true)` (§6).
pub(crate) fn count_in_range(conn: &Connection, table: Table, start_ts: i64, end_ts: i64) -> Result<u64, Error> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2", table_name(table));
    let count: i64 = conn.query_row(&sql, params![start_ts, end_ts], |row| row.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Store;
    use ringcore_config::StoreConfig;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.db");
        let store = Store::open(&StoreConfig { path: path.to_string_lossy().to_string(), retention_days: Default::default() }).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_and_range_query_round_trips() {
        let (_dir, store) = test_store();
        let mut a = Sample::new("plc-1", "thrust_total", Table::Plc, 0, 10_000.0);
        a.ring_number = Some(100);
        let mut b = Sample::new("plc-1", "thrust_total", Table::Plc, 1_000, 10_100.0);
        b.ring_number = Some(100);
        store.insert_samples(Table::Plc, &[a, b]).unwrap();

        let rows = store.samples_in_range(Table::Plc, 0, 2_000).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 10_000.0);
        assert_eq!(rows[0].ring_number, Some(100));

        let rows = store.samples_in_range(Table::Plc, 0, 1_000).unwrap();
        assert_eq!(rows.len(), 1, "range is half-open: end_ts excluded");
    }

    #[test]
    fn max_ring_number_reflects_stamped_rows() {
        let (_dir, store) = test_store();
        assert_eq!(store.max_ring_number(Table::Plc).unwrap(), None);

        let mut s = Sample::new("plc-1", "ring_number", Table::Plc, 0, 100.0);
        s.ring_number = Some(100);
        store.insert_samples(Table::Plc, &[s]).unwrap();
        assert_eq!(store.max_ring_number(Table::Plc).unwrap(), Some(100));
    }
}
