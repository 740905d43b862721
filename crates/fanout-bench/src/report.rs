//! Writing, reading and summarizing report files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::BenchError;
use crate::stats::{Results, overall};

/// Write `results` as pretty JSON to `dir/file_name`, creating `dir` if needed.
pub fn write_report(dir: &Path, file_name: &str, results: &Results) -> Result<PathBuf, BenchError> {
    std::fs::create_dir_all(dir).map_err(|source| BenchError::Io {
        action: "failed to create output directory",
        path: dir.to_path_buf(),
        source,
    })?;
    let encoded = serde_json::to_string_pretty(results)?;
    let path = dir.join(file_name);
    std::fs::write(&path, encoded).map_err(|source| BenchError::Io {
        action: "failed to write report",
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Load a report written by [`write_report`].
pub fn read_report(path: &Path) -> Result<Results, BenchError> {
    let content = std::fs::read_to_string(path).map_err(|source| BenchError::Io {
        action: "failed to read report",
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Per-client table followed by the overall figures.
pub fn render_summary(results: &Results) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>8} {:>12} {:>12} {:>12}",
        "client", "messages", "avg (ms)", "min (ms)", "max (ms)"
    );
    for report in results.values() {
        let _ = writeln!(
            out,
            "{:<16} {:>8} {:>12.3} {:>12.3} {:>12.3}",
            report.client_id,
            report.messages_timings.len(),
            report.avg,
            report.min,
            report.max
        );
    }
    let summary = overall(results);
    let _ = writeln!(
        out,
        "\n{} clients, {} timings: mean avg {:.3} ms, min {:.3} ms, max {:.3} ms",
        summary.clients, summary.messages, summary.mean_avg, summary.min, summary.max
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ClientReport, Timing};
    use assert_matches::assert_matches;

    fn sample() -> Results {
        let timings = vec![
            Timing {
                message_id: "a".into(),
                time: 1.0,
                client_id: "Client_1".into(),
            },
            Timing {
                message_id: "b".into(),
                time: 3.0,
                client_id: "Client_1".into(),
            },
        ];
        let mut results = Results::new();
        let _ = results.insert(
            "Client_1".into(),
            ClientReport::from_timings("Client_1", timings),
        );
        results
    }

    #[test]
    fn write_creates_directory_and_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("metrics");
        let path = write_report(&dir, "results.json", &sample()).unwrap();

        assert_eq!(path, dir.join("results.json"));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["Client_1"]["min"], 1.0);
        assert_eq!(raw["Client_1"]["max"], 3.0);
        assert_eq!(raw["Client_1"]["avg"], 2.0);
        assert_eq!(raw["Client_1"]["messages_timings"].as_array().unwrap().len(), 2);

        assert_eq!(read_report(&path).unwrap(), sample());
    }

    #[test]
    fn write_into_a_file_path_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        assert_matches!(
            write_report(&blocker, "results.json", &sample()),
            Err(BenchError::Io { .. })
        );
    }

    #[test]
    fn read_missing_or_invalid_report_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert_matches!(
            read_report(&tmp.path().join("missing.json")),
            Err(BenchError::Io { .. })
        );

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert_matches!(read_report(&bad), Err(BenchError::Json(_)));
    }

    #[test]
    fn summary_lists_clients_and_overall() {
        let text = render_summary(&sample());
        assert!(text.contains("Client_1"));
        assert!(text.contains("1 clients, 2 timings"));
        assert!(text.contains("mean avg 2.000 ms"));
    }
}
