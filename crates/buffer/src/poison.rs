//! Sidecar fallback for batches the store repeatedly refuses (§4.3
//! "a destination table that fails to flush after its retries... is
//! written to a poison sidecar instead of being dropped silently").

use std::io::Write;
use std::path::{Path, PathBuf};

use ringcore_model::{Sample, Table};

/// Writes `samples` as newline-delimited JSON into a fresh file under
/// `poison_dir`, named `<table>-<now_ms>.jsonl`. Returns the path written.
pub(crate) fn write(poison_dir: &Path, table: Table, now_ms: i64, samples: &[Sample]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(poison_dir)?;
    let path = poison_dir.join(format!("{}-{now_ms}.jsonl", table.as_str()));
    let mut file = std::fs::File::create(&path)?;
    for sample in samples {
        let line = serde_json::to_string(sample).unwrap_or_else(|e| format!("{{\"serialize_error\":\"{e}\"}}"));
        writeln!(file, "{line}")?;
    }
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_one_line_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![Sample::new("src-1", "thrust_total", Table::Plc, 0, 1.0), Sample::new("src-1", "thrust_total", Table::Plc, 1000, 2.0)];
        let path = write(dir.path(), Table::Plc, 42, &samples).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
