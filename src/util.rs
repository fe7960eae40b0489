use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

/// Truncate a string to at most `max` characters, appending `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Write a file atomically: write to a sibling temp file, then rename over
/// the destination. Readers never observe a partially written artifact.
pub fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}
