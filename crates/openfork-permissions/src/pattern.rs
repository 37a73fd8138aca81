// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

/// Compile a `category:resource` glob pattern to a case-insensitive [`Regex`].
/// Only `*` (match any sequence) and `?` (match one char) are special.
pub fn compile_pattern(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Map a tool name to its permission category.
///
/// The file-mutation tools share one `edit` category so a single rule covers
/// them; every other tool is its own category.
pub fn permission_category(tool: &str) -> &str {
    match tool {
        "edit" | "multiedit" | "write" => "edit",
        other => other,
    }
}

/// Extract the resource string a permission pattern is matched against.
///
/// Unknown tools and missing arguments fall back to `*` so a category-wide
/// rule still applies.
pub fn extract_resource(tool: &str, args: &serde_json::Value) -> String {
    let field = match tool {
        "bash" => "command",
        "read" | "edit" | "multiedit" | "write" => "path",
        "task" => "subagent_type",
        _ => return "*".to_string(),
    };
    args.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or("*")
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
