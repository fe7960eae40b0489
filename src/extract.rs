//! Scraper that turns a data-sink log listing into the work-item artifact.
//!
//! The listing is plain text: blocks separated by `----` lines, each block
//! carrying an absolute file path line and a `Code summary:` line. Blocks
//! missing either field are dropped.

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::model::WorkItem;
use crate::util;

const SUMMARY_PREFIX: &str = "Code summary:";

/// Parse the raw listing into work items.
///
/// When `marker` is set, absolute paths are rebased to be relative to the
/// last occurrence of that directory, so the corpus root can be supplied
/// independently at annotation time.
pub fn parse_listing(text: &str, marker: Option<&str>) -> Vec<WorkItem> {
    let mut entries = Vec::new();
    let mut filename: Option<String> = None;
    let mut summary: Option<String> = None;

    let mut flush = |filename: &mut Option<String>, summary: &mut Option<String>| {
        if let (Some(name), Some(text)) = (filename.take(), summary.take()) {
            entries.push(WorkItem {
                filename: name,
                code_summary: Some(text),
            });
        }
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("----") {
            flush(&mut filename, &mut summary);
            continue;
        }

        if line.starts_with('/') {
            filename = Some(rebase_path(line, marker));
        } else if let Some(rest) = line.strip_prefix(SUMMARY_PREFIX) {
            summary = Some(rest.trim().to_string());
        }
    }
    flush(&mut filename, &mut summary);

    entries
}

/// Strip everything up to and including the marker directory from an
/// absolute path. Without a marker (or when it does not occur) the path is
/// kept as written.
fn rebase_path(path: &str, marker: Option<&str>) -> String {
    let Some(marker) = marker else {
        return path.to_string();
    };
    let needle = format!("/{}/", marker);
    match path.rfind(&needle) {
        Some(idx) => path[idx + needle.len()..].to_string(),
        None => path.to_string(),
    }
}

/// Scrape `input` and write the work-item artifact to `output`.
/// Returns the number of entries written.
pub fn run(input: &Path, output: &Path, marker: Option<&str>) -> anyhow::Result<usize> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read listing {}", input.display()))?;
    let entries = parse_listing(&text, marker);
    let json = serde_json::to_string_pretty(&entries)?;
    util::write_atomic(output, &json)?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
/home/user/corpus/app/src/db.ts
Code summary: writes user rows to postgres
--------
/home/user/corpus/app/src/log.ts
Code summary: ships events to a logging service
--------
/home/user/corpus/app/src/incomplete.ts
--------
";

    #[test]
    fn test_parse_listing_pairs_path_and_summary() {
        let items = parse_listing(LISTING, None);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].filename, "/home/user/corpus/app/src/db.ts");
        assert_eq!(
            items[0].code_summary.as_deref(),
            Some("writes user rows to postgres")
        );
        assert_eq!(items[1].filename, "/home/user/corpus/app/src/log.ts");
    }

    #[test]
    fn test_incomplete_block_dropped() {
        let items = parse_listing(LISTING, None);
        assert!(items.iter().all(|i| !i.filename.contains("incomplete")));
    }

    #[test]
    fn test_marker_rebases_paths() {
        let items = parse_listing(LISTING, Some("corpus"));
        assert_eq!(items[0].filename, "app/src/db.ts");
        assert_eq!(items[1].filename, "app/src/log.ts");
    }

    #[test]
    fn test_marker_absent_from_path_keeps_path() {
        let items = parse_listing(LISTING, Some("elsewhere"));
        assert_eq!(items[0].filename, "/home/user/corpus/app/src/db.ts");
    }

    #[test]
    fn test_run_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data_sinks.txt");
        let output = dir.path().join("sink_files.json");
        fs::write(&input, LISTING).unwrap();

        let count = run(&input, &output, Some("corpus")).unwrap();
        assert_eq!(count, 2);

        let written: Vec<WorkItem> =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written[0].filename, "app/src/db.ts");
    }

    #[test]
    fn test_trailing_block_without_separator_flushed() {
        let text = "/a/b/c.ts\nCode summary: tail entry";
        let items = parse_listing(text, None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code_summary.as_deref(), Some("tail entry"));
    }
}
