//! Work-item artifact loading and per-item content reads.

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::model::WorkItem;

/// Load the complete ordered work-item sequence from the extraction artifact.
///
/// A missing or malformed artifact aborts the whole run; there is nothing
/// sensible to analyze without it.
pub fn load_work_items(path: &Path) -> anyhow::Result<Vec<WorkItem>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read work-item artifact {}", path.display()))?;
    let items: Vec<WorkItem> = serde_json::from_str(&content).with_context(|| {
        format!(
            "Work-item artifact {} is not a JSON array of work items",
            path.display()
        )
    })?;
    Ok(items)
}

/// Read one work item's file content from the corpus root.
///
/// `None` is the expected per-item not-found case; an unreadable file is
/// treated the same way since the item cannot be analyzed either way.
pub fn read_item_content(root: &Path, filename: &str) -> Option<String> {
    fs::read_to_string(root.join(filename)).ok()
}
