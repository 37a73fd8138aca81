// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Whole-output line cap.
pub const MAX_OUTPUT_LINES: usize = 2_000;
/// Whole-output byte cap.
pub const MAX_OUTPUT_BYTES: usize = 51_200;
/// Any single line longer than this is clamped, truncated output or not.
pub const MAX_LINE_LENGTH: usize = 2_000;

const LINE_CLAMP_SUFFIX: &str = "… (line truncated)";

/// Per-tool character cap for the content kept in context.
pub fn tool_char_cap(tool: &str) -> usize {
    match tool {
        "read" => 100_000,
        "bash" => 50_000,
        "grep" => 30_000,
        "glob" => 20_000,
        "webfetch" => 50_000,
        "websearch" => 20_000,
        "list" => 10_000,
        _ => 50_000,
    }
}

/// What L1 did to one tool output.
#[derive(Debug, Clone)]
pub struct TruncationResult {
    /// Content handed to the model (truncation notice included when it fired).
    pub output: String,
    pub was_truncated: bool,
    pub original_lines: usize,
    pub original_bytes: usize,
    pub truncated_lines: usize,
    /// Bytes of kept content, excluding the appended notice.
    pub truncated_bytes: usize,
    pub spill_path: Option<PathBuf>,
    pub truncation_message: Option<String>,
}

/// Truncate one tool output, spilling the full text to disk when any cap is
/// exceeded.
///
/// Overlong individual lines are clamped first and unconditionally.  When a
/// whole-output cap (lines, bytes, or the per-tool character cap) trips, the
/// original untruncated output is written to
/// `spill_dir/<yyyyMMdd>_<random>.txt` (or `requested_path`) and a notice
/// pointing at the spill file is appended to the kept prefix.
pub fn truncate_tool_output(
    raw: &str,
    tool: &str,
    spill_dir: &Path,
    requested_path: Option<&Path>,
) -> anyhow::Result<TruncationResult> {
    let clamped = clamp_long_lines(raw);
    let original_lines = count_lines(&clamped);
    let original_bytes = clamped.len();
    let char_cap = tool_char_cap(tool);

    let needs_truncation = original_lines > MAX_OUTPUT_LINES
        || original_bytes > MAX_OUTPUT_BYTES
        || clamped.chars().count() > char_cap;

    if !needs_truncation {
        return Ok(TruncationResult {
            output: clamped.clone(),
            was_truncated: false,
            original_lines,
            original_bytes,
            truncated_lines: original_lines,
            truncated_bytes: original_bytes,
            spill_path: None,
            truncation_message: None,
        });
    }

    let spill_path = write_spill(raw, spill_dir, requested_path)?;

    // Keep leading lines until either the line cap or the byte cap would be
    // exceeded, then apply the per-tool character cap on top.
    let mut kept = String::new();
    let mut kept_lines = 0usize;
    for line in clamped.lines() {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept_lines + 1 > MAX_OUTPUT_LINES || kept.len() + needed > MAX_OUTPUT_BYTES {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_lines += 1;
    }
    if kept.chars().count() > char_cap {
        kept = kept.chars().take(char_cap).collect();
        kept_lines = count_lines(&kept);
    }

    let truncated_bytes = kept.len();
    let message = format!(
        "---\n[Output truncated: {original_lines}\u{2192}{kept_lines} lines, \
         {original_bytes}\u{2192}{truncated_bytes} bytes]\n\
         [Full output saved to: {}]\n\
         [Use 'read' tool with the path above to see full content]",
        spill_path.display()
    );
    debug!(
        tool,
        original_bytes, truncated_bytes, spill = %spill_path.display(),
        "tool output truncated"
    );

    Ok(TruncationResult {
        output: format!("{kept}\n{message}"),
        was_truncated: true,
        original_lines,
        original_bytes,
        truncated_lines: kept_lines,
        truncated_bytes,
        spill_path: Some(spill_path),
        truncation_message: Some(message),
    })
}

/// Delete spill files older than `max_age`.  Returns how many were removed.
/// Exposed as a maintenance operation; never runs at write time.
pub fn cleanup_spill_older_than(spill_dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(spill_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|age| age > max_age)
            .unwrap_or(false);
        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove spill file"),
            }
        }
    }
    removed
}

fn clamp_long_lines(raw: &str) -> String {
    if raw.lines().all(|l| l.chars().count() <= MAX_LINE_LENGTH) {
        return raw.to_string();
    }
    let clamped: Vec<String> = raw
        .lines()
        .map(|line| {
            if line.chars().count() > MAX_LINE_LENGTH {
                let head: String = line.chars().take(MAX_LINE_LENGTH).collect();
                format!("{head}{LINE_CLAMP_SUFFIX}")
            } else {
                line.to_string()
            }
        })
        .collect();
    clamped.join("\n")
}

fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.lines().count()
    }
}

fn write_spill(raw: &str, spill_dir: &Path, requested_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = match requested_path {
        Some(p) => p.to_path_buf(),
        None => {
            std::fs::create_dir_all(spill_dir)?;
            spill_dir.join(format!(
                "{}_{}.txt",
                Utc::now().format("%Y%m%d"),
                Uuid::new_v4().simple()
            ))
        }
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, raw)?;
    Ok(path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn small_output_passes_through() {
        let tmp = TempDir::new().unwrap();
        let r = truncate_tool_output("a\nb\n", "bash", tmp.path(), None).unwrap();
        assert!(!r.was_truncated);
        assert_eq!(r.output, "a\nb\n");
        assert!(r.spill_path.is_none());
        // nothing was spilled
        assert_eq!(std::fs::read_dir(tmp.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[test]
    fn line_cap_triggers_truncation_and_spill() {
        let tmp = TempDir::new().unwrap();
        let raw = lines(MAX_OUTPUT_LINES + 100);
        let r = truncate_tool_output(&raw, "bash", tmp.path(), None).unwrap();
        assert!(r.was_truncated);
        assert!(r.truncated_lines <= MAX_OUTPUT_LINES);
        assert!(r.output.contains("[Output truncated:"));
        assert!(r.output.contains("[Full output saved to:"));

        // spill file holds the byte-exact original
        let spill = std::fs::read_to_string(r.spill_path.unwrap()).unwrap();
        assert_eq!(spill, raw);
    }

    #[test]
    fn byte_cap_triggers_truncation() {
        let tmp = TempDir::new().unwrap();
        // 100 lines of 1000 bytes: under the line cap, over the byte cap
        let raw = (0..100).map(|_| "x".repeat(1000)).collect::<Vec<_>>().join("\n");
        let r = truncate_tool_output(&raw, "bash", tmp.path(), None).unwrap();
        assert!(r.was_truncated);
        assert!(r.truncated_bytes <= MAX_OUTPUT_BYTES);
    }

    #[test]
    fn per_tool_char_cap_applies() {
        let tmp = TempDir::new().unwrap();
        // list caps at 10 000 chars; stay under the line/byte caps
        let raw = (0..20).map(|_| "y".repeat(1500)).collect::<Vec<_>>().join("\n");
        assert!(raw.len() <= MAX_OUTPUT_BYTES);
        let r = truncate_tool_output(&raw, "list", tmp.path(), None).unwrap();
        assert!(r.was_truncated);
        assert!(r.truncated_bytes <= tool_char_cap("list"));
    }

    #[test]
    fn unknown_tool_uses_default_cap() {
        assert_eq!(tool_char_cap("mystery"), 50_000);
        assert_eq!(tool_char_cap("read"), 100_000);
        assert_eq!(tool_char_cap("grep"), 30_000);
    }

    #[test]
    fn overlong_line_is_clamped_even_without_truncation() {
        let tmp = TempDir::new().unwrap();
        let raw = format!("short\n{}", "z".repeat(MAX_LINE_LENGTH + 50));
        let r = truncate_tool_output(&raw, "bash", tmp.path(), None).unwrap();
        assert!(!r.was_truncated);
        assert!(r.output.contains(LINE_CLAMP_SUFFIX));
        assert!(r.output.lines().all(|l| l.chars().count() <= MAX_LINE_LENGTH + LINE_CLAMP_SUFFIX.chars().count()));
    }

    #[test]
    fn requested_spill_path_is_honoured() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("custom/spot.txt");
        let raw = lines(MAX_OUTPUT_LINES + 1);
        let r = truncate_tool_output(&raw, "bash", tmp.path(), Some(&target)).unwrap();
        assert_eq!(r.spill_path.as_deref(), Some(target.as_path()));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), raw);
    }

    #[test]
    fn spill_cleanup_removes_only_old_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("fresh.txt"), "x").unwrap();
        // zero max age removes everything with a measurable age
        std::thread::sleep(Duration::from_millis(20));
        let removed = cleanup_spill_older_than(tmp.path(), Duration::from_millis(1));
        assert_eq!(removed, 1);

        std::fs::write(tmp.path().join("kept.txt"), "x").unwrap();
        let removed = cleanup_spill_older_than(tmp.path(), Duration::from_secs(3600));
        assert_eq!(removed, 0);
    }

    #[test]
    fn cleanup_on_missing_dir_is_a_noop() {
        assert_eq!(
            cleanup_spill_older_than(Path::new("/nonexistent/spill"), Duration::from_secs(1)),
            0
        );
    }
}
