use regex::Regex;
use std::sync::OnceLock;

use crate::chunk::UNKNOWN;

/// Known `tech-` prefix families (spec §4.2, supplemented from the original
/// Python implementation's `TECH_PREFIXES`; see SPEC_FULL §11).
const TECH_PREFIXES: &[&str] = &["django-", "drf-", "psycopg-", "nuxt-", "redis-"];

/// Exact-match reserved tech names that don't follow the `prefix-` shape.
const TECH_RESERVED: &[&str] = &["django", "drf", "psycopg", "nuxt", "redis", "architecture"];

/// Directory names that never qualify as `component` (spec §4.2: "not the
/// documentation root").
const NON_COMPONENT_DIRS: &[&str] = &["docs", "doc", "documentation", "."];

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+(\.\d+)?").unwrap())
}

fn is_purely_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Extracted provenance for one source file (spec §4.2). A pure function of
/// `source_path` and the first ~20 lines of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    pub tech: String,
    pub component: String,
    pub version: String,
    pub topic: String,
}

/// Derive `(tech, component, version, topic)` from a repo-relative path and
/// file content (spec §4.2).
pub fn extract_metadata(rel_path: &std::path::Path, content: &str) -> ExtractedMetadata {
    let segments: Vec<String> = rel_path
        .components()
        .filter_map(|c| c.as_os_str().to_str().map(|s| s.to_ascii_lowercase()))
        .collect();

    let (tech, tech_segment_idx) = find_tech(&segments);
    let version = tech_segment_idx
        .and_then(|idx| version_re().find(&segments[idx]).map(|m| m.as_str().to_string()))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let component = find_component(&segments, &tech);
    let first_lines: String = content.lines().take(20).collect::<Vec<_>>().join("\n");
    let topic = find_topic(&first_lines, rel_path);

    ExtractedMetadata {
        tech,
        component,
        version,
        topic,
    }
}

/// Find the first path segment matching a known prefix family or the
/// reserved exact set; returns the tech name and the matched segment's index.
fn find_tech(segments: &[String]) -> (String, Option<usize>) {
    for (idx, seg) in segments.iter().enumerate() {
        if let Some(prefix) = TECH_PREFIXES.iter().find(|p| seg.starts_with(**p)) {
            return (prefix.trim_end_matches('-').to_string(), Some(idx));
        }
        if TECH_RESERVED.contains(&seg.as_str()) {
            return (seg.clone(), Some(idx));
        }
    }
    (UNKNOWN.to_string(), None)
}

/// Nearest ancestor directory that is not the tech name, not the
/// documentation root, and not purely numeric (spec §4.2).
fn find_component(segments: &[String], tech: &str) -> String {
    // Exclude the filename itself (last segment); walk directories nearest-first.
    let dirs = if segments.is_empty() {
        &segments[..]
    } else {
        &segments[..segments.len() - 1]
    };

    for seg in dirs.iter().rev() {
        if seg == tech {
            continue;
        }
        if NON_COMPONENT_DIRS.contains(&seg.as_str()) {
            continue;
        }
        if is_purely_numeric(seg) {
            continue;
        }
        return seg.clone();
    }
    UNKNOWN.to_string()
}

/// First markdown heading in `first_lines`, else a humanized filename stem
/// (spec §4.2).
fn find_topic(first_lines: &str, rel_path: &std::path::Path) -> String {
    for line in first_lines.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let stripped = trimmed.trim_start_matches('#').trim();
            if !stripped.is_empty() {
                return clip(stripped, 100);
            }
        }
    }

    let stem = rel_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    clip(&humanize(stem), 100)
}

fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Replace `-`/`_` delimiters with spaces and title-case each word.
fn humanize(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
