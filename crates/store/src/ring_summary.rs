//! Persistence for the ring summary table (§3 "RingSummary", §6
//! `list_rings`/`get_ring`).

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use ringcore_model::{DataCompletenessFlag, IndicatorStats, RingSummary};

use crate::Error;

fn completeness_to_str(flag: DataCompletenessFlag) -> &'static str {
    match flag {
        DataCompletenessFlag::Complete => "complete",
        DataCompletenessFlag::MissingPlc => "missing_plc",
        DataCompletenessFlag::PartialPlc => "partial_plc",
        DataCompletenessFlag::PartialAttitude => "partial_attitude",
        DataCompletenessFlag::MissingMonitoring => "missing_monitoring",
    }
}

fn completeness_from_str(s: &str) -> Result<DataCompletenessFlag, Error> {
    Ok(match s {
        "complete" => DataCompletenessFlag::Complete,
        "missing_plc" => DataCompletenessFlag::MissingPlc,
        "partial_plc" => DataCompletenessFlag::PartialPlc,
        "partial_attitude" => DataCompletenessFlag::PartialAttitude,
        "missing_monitoring" => DataCompletenessFlag::MissingMonitoring,
        other => return Err(Error::CorruptRow { reason: format!("unknown data_completeness_flag '{other}'") }),
    })
}

/// A subset of [`RingSummary`] fields to filter `list_rings` by (§6).
#[derive(Debug, Clone, Default)]
pub struct RingSummaryFilter {
    /// Inclusive lower bound on `ring_number`.
    pub ring_number_from: Option<i64>,
    /// Inclusive upper bound on `ring_number`.
    pub ring_number_to: Option<i64>,
    /// Restrict to rows with this exact completeness flag.
    pub completeness: Option<DataCompletenessFlag>,
    /// Restrict to rows with this exact `synced_to_cloud` value.
    pub synced_to_cloud: Option<bool>,
    /// Maximum number of rows to return, ordered by `ring_number` ascending.
    pub limit: u32,
    /// Number of matching rows to skip before `limit` is applied.
    pub offset: u32,
}

pub(crate) fn upsert(conn: &Connection, summary: &RingSummary) -> Result<(), Error> {
    let aggregate_json = serde_json::to_string(&summary.aggregate_indicators)?;
    let attitude_json = serde_json::to_string(&summary.attitude_indicators)?;
    let derived_json = serde_json::to_string(&summary.derived_indicators)?;
    conn.execute(
        "INSERT INTO ring_summary (
            ring_number, start_ts, end_ts, aggregate_indicators, attitude_indicators,
            settlement_value, displacement_value, derived_indicators, geology_zone,
            data_completeness_flag, created_at, synced_to_cloud
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(ring_number) DO UPDATE SET
            start_ts = excluded.start_ts,
            end_ts = excluded.end_ts,
            aggregate_indicators = excluded.aggregate_indicators,
            attitude_indicators = excluded.attitude_indicators,
            settlement_value = excluded.settlement_value,
            displacement_value = excluded.displacement_value,
            derived_indicators = excluded.derived_indicators,
            geology_zone = excluded.geology_zone,
            data_completeness_flag = excluded.data_completeness_flag",
        params![
            summary.ring_number,
            summary.start_ts,
            summary.end_ts,
            aggregate_json,
            attitude_json,
            summary.settlement_value,
            summary.displacement_value,
            derived_json,
            summary.geology_zone,
            completeness_to_str(summary.data_completeness_flag),
            summary.created_at,
            summary.synced_to_cloud as i64,
        ],
    )?;
    Ok(())
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<RingSummary> {
    let aggregate_json: String = row.get(3)?;
    let attitude_json: String = row.get(4)?;
    let derived_json: String = row.get(7)?;
    let completeness_str: String = row.get(9)?;
    let synced: i64 = row.get(11)?;

    let aggregate_indicators: BTreeMap<String, IndicatorStats> = serde_json::from_str(&aggregate_json).unwrap_or_default();
    let attitude_indicators: BTreeMap<String, IndicatorStats> = serde_json::from_str(&attitude_json).unwrap_or_default();
    let derived_indicators: BTreeMap<String, Option<f64>> = serde_json::from_str(&derived_json).unwrap_or_default();
    let data_completeness_flag = completeness_from_str(&completeness_str).unwrap_or(DataCompletenessFlag::MissingPlc);

    Ok(RingSummary {
        ring_number: row.get(0)?,
        start_ts: row.get(1)?,
        end_ts: row.get(2)?,
        aggregate_indicators,
        attitude_indicators,
        settlement_value: row.get(5)?,
        displacement_value: row.get(6)?,
        derived_indicators,
        geology_zone: row.get(8)?,
        data_completeness_flag,
        created_at: row.get(10)?,
        synced_to_cloud: synced != 0,
    })
}

const SELECT_COLUMNS: &str = "ring_number, start_ts, end_ts, aggregate_indicators, attitude_indicators, \
     settlement_value, displacement_value, derived_indicators, geology_zone, data_completeness_flag, created_at, synced_to_cloud";

pub(crate) fn get(conn: &Connection, ring_number: i64) -> Result<Option<RingSummary>, Error> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM ring_summary WHERE ring_number = ?1");
    Ok(conn.query_row(&sql, params![ring_number], row_to_summary).optional()?)
}

pub(crate) fn max_summarized_ring(conn: &Connection) -> Result<Option<i64>, Error> {
    Ok(conn.query_row("SELECT MAX(ring_number) FROM ring_summary", [], |row| row.get(0)).optional()?.flatten())
}

pub(crate) fn list(conn: &Connection, filter: &RingSummaryFilter) -> Result<Vec<RingSummary>, Error> {
    let mut sql = format!("SELECT {SELECT_COLUMNS} FROM ring_summary WHERE 1=1");
    if filter.ring_number_from.is_some() {
        sql.push_str(" AND ring_number >= :from");
    }
    if filter.ring_number_to.is_some() {
        sql.push_str(" AND ring_number <= :to");
    }
    if filter.completeness.is_some() {
        sql.push_str(" AND data_completeness_flag = :completeness");
    }
    if filter.synced_to_cloud.is_some() {
        sql.push_str(" AND synced_to_cloud = :synced");
    }
    sql.push_str(" ORDER BY ring_number ASC LIMIT :limit OFFSET :offset");

    let mut stmt = conn.prepare(&sql)?;
    let limit = if filter.limit == 0 { 100 } else { filter.limit };

    let completeness_str = filter.completeness.map(completeness_to_str);
    let mut params: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
    if let Some(from) = filter.ring_number_from.as_ref() {
        params.push((":from", from));
    }
    if let Some(to) = filter.ring_number_to.as_ref() {
        params.push((":to", to));
    }
    if let Some(completeness) = completeness_str.as_ref() {
        params.push((":completeness", completeness));
    }
    let synced_i64 = filter.synced_to_cloud.map(|b| b as i64);
    if let Some(synced) = synced_i64.as_ref() {
        params.push((":synced", synced));
    }
    params.push((":limit", &limit));
    params.push((":offset", &filter.offset));

    let rows = stmt.query_map(params.as_slice(), row_to_summary)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;
    use crate::Store;
    use ringcore_config::StoreConfig;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.db");
        let store = Store::open(&StoreConfig { path: path.to_string_lossy().to_string(), retention_days: Default::default() }).unwrap();
        (dir, store)
    }

    fn sample_summary(ring_number: i64) -> RingSummary {
        RingSummary {
            ring_number,
            start_ts: ring_number * 1000,
            end_ts: ring_number * 1000 + 1000,
            aggregate_indicators: BTreeMap::new(),
            attitude_indicators: BTreeMap::new(),
            settlement_value: None,
            displacement_value: None,
            derived_indicators: BTreeMap::new(),
            geology_zone: None,
            data_completeness_flag: DataCompletenessFlag::MissingMonitoring,
            created_at: 0,
            synced_to_cloud: false,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (_dir, store) = test_store();
        store.upsert_ring_summary(&sample_summary(100)).unwrap();
        let fetched = store.get_ring_summary(100).unwrap().unwrap();
        assert_eq!(fetched.ring_number, 100);
        assert_eq!(fetched.data_completeness_flag, DataCompletenessFlag::MissingMonitoring);
    }

    #[test]
    fn upsert_is_update_in_place_not_append() {
        let (_dir, store) = test_store();
        store.upsert_ring_summary(&sample_summary(200)).unwrap();
        let mut updated = sample_summary(200);
        updated.settlement_value = Some(2.7);
        updated.data_completeness_flag = DataCompletenessFlag::Complete;
        store.upsert_ring_summary(&updated).unwrap();

        let fetched = store.get_ring_summary(200).unwrap().unwrap();
        assert_eq!(fetched.settlement_value, Some(2.7));
        assert_eq!(fetched.data_completeness_flag, DataCompletenessFlag::Complete);
        assert_eq!(store.list_ring_summaries(&RingSummaryFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn list_respects_completeness_filter() {
        let (_dir, store) = test_store();
        store.upsert_ring_summary(&sample_summary(1)).unwrap();
        let mut complete = sample_summary(2);
        complete.data_completeness_flag = DataCompletenessFlag::Complete;
        store.upsert_ring_summary(&complete).unwrap();

        let filter = RingSummaryFilter { completeness: Some(DataCompletenessFlag::Complete), ..Default::default() };
        let rows = store.list_ring_summaries(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ring_number, 2);
    }
}
