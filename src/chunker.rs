use regex::Regex;
use std::sync::OnceLock;

/// One emitted chunk: a non-empty content fragment plus its line offsets
/// (spec §4.1). `start_line` is the count of `\n` preceding the chunk's first
/// character; `end_line = start_line + newline_count(chunk)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Markup,
    Code,
    PlainText,
    Unknown,
}

fn classify(file_type: &str) -> FileKind {
    let ext = file_type.trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "md" | "rst" | "html" | "htm" => FileKind::Markup,
        "py" | "rs" | "go" | "js" | "ts" | "tsx" | "jsx" | "java" | "rb" | "php" | "c" | "h"
        | "cpp" | "hpp" | "cs" | "sh" | "sql" => FileKind::Code,
        "txt" | "json" | "yaml" | "yml" | "toml" => FileKind::PlainText,
        _ => FileKind::Unknown,
    }
}

fn code_boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?(export\s+)?(default\s+)?(fn|func|function|def|class|struct|impl|interface|trait)\b",
        )
        .unwrap()
    })
}

fn newline_count(s: &str) -> u32 {
    s.matches('\n').count() as u32
}

/// Character-window fallback: slice contiguous `capacity`-character windows.
/// Used when the file type is unknown, or when format-aware splitting
/// degenerates (spec §4.1, §9 "Weak inputs").
fn char_window_chunks(content: &str, capacity: usize) -> Vec<ChunkSpan> {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return vec![];
    }

    let mut out = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let end = (i + capacity).min(chars.len());
        let text: String = chars[i..end].iter().collect();
        if !text.trim().is_empty() {
            let prefix: String = chars[..i].iter().collect();
            let start_line = newline_count(&prefix);
            let end_line = start_line + newline_count(&text);
            out.push(ChunkSpan {
                content: text,
                start_line,
                end_line,
            });
        }
        i = end;
    }
    out
}

/// Group line-index ranges `[start, end)` into boundary segments using the
/// supplied boundary predicate: a line at index `i` starts a new segment when
/// `is_boundary(lines, i)` is true, or `i == 0`.
fn segment_lines<'a>(lines: &[&'a str], is_boundary: impl Fn(&[&'a str], usize) -> bool) -> Vec<(usize, usize)> {
    if lines.is_empty() {
        return vec![];
    }
    let mut segments = Vec::new();
    let mut seg_start = 0usize;
    for i in 1..lines.len() {
        if is_boundary(lines, i) {
            segments.push((seg_start, i));
            seg_start = i;
        }
    }
    segments.push((seg_start, lines.len()));
    segments
}

fn markup_boundary(lines: &[&str], i: usize) -> bool {
    let line = lines[i].trim_start();
    if line.starts_with('#') {
        return true;
    }
    if line.starts_with("```") {
        return true;
    }
    // Paragraph start: previous line blank, this line non-blank.
    if lines[i - 1].trim().is_empty() && !line.trim().is_empty() {
        return true;
    }
    false
}

fn code_boundary(lines: &[&str], i: usize) -> bool {
    if code_boundary_re().is_match(lines[i]) {
        return true;
    }
    lines[i - 1].trim().is_empty() && !lines[i].trim().is_empty()
}

fn plain_text_boundary(lines: &[&str], i: usize) -> bool {
    lines[i - 1].trim().is_empty() && !lines[i].trim().is_empty()
}

/// Greedily pack line segments into chunks up to `capacity` characters,
/// tracking exact line offsets throughout (so there is no substring search —
/// and therefore no possibility of the "weak input" miss spec §9 warns
/// about: chunk text is always a verbatim join of the source lines it claims
/// to span).
fn pack_segments(lines: &[&str], segments: &[(usize, usize)], capacity: usize) -> Vec<ChunkSpan> {
    let mut out = Vec::new();
    let mut group_start = 0usize;
    let mut group_end = 0usize;
    let mut group_len = 0usize;

    let mut flush = |start: usize, end: usize, out: &mut Vec<ChunkSpan>| {
        if start >= end {
            return;
        }
        let text = lines[start..end].join("\n");
        if text.trim().is_empty() {
            return;
        }
        out.push(ChunkSpan {
            content: text.clone(),
            start_line: start as u32,
            end_line: start as u32 + newline_count(&text),
        });
    };

    for &(seg_start, seg_end) in segments {
        let seg_len: usize = lines[seg_start..seg_end].iter().map(|l| l.len() + 1).sum();

        if group_len == 0 {
            group_start = seg_start;
            group_end = seg_end;
            group_len = seg_len;
            continue;
        }

        if group_len + seg_len > capacity {
            flush(group_start, group_end, &mut out);
            group_start = seg_start;
            group_end = seg_end;
            group_len = seg_len;
        } else {
            group_end = seg_end;
            group_len += seg_len;
        }
    }
    flush(group_start, group_end, &mut out);

    out
}

/// Split `content` into an ordered sequence of non-empty chunks (spec §4.1).
///
/// `capacity_chars` is the target chunk size `C`; code files use a larger
/// effective capacity (~6x) to keep functions/classes intact.
pub fn chunk_content(content: &str, file_type: &str, capacity_chars: usize) -> Vec<ChunkSpan> {
    if content.trim().is_empty() {
        return vec![];
    }

    let kind = classify(file_type);
    let lines: Vec<&str> = content.split('\n').collect();

    let spans = match kind {
        FileKind::Markup => {
            let segments = segment_lines(&lines, markup_boundary);
            pack_segments(&lines, &segments, capacity_chars.max(1))
        }
        FileKind::Code => {
            let segments = segment_lines(&lines, code_boundary);
            pack_segments(&lines, &segments, (capacity_chars * 6).max(1))
        }
        FileKind::PlainText => {
            let segments = segment_lines(&lines, plain_text_boundary);
            pack_segments(&lines, &segments, capacity_chars.max(1))
        }
        FileKind::Unknown => vec![],
    };

    if !spans.is_empty() {
        return spans;
    }

    // Format-aware splitting produced nothing useful (unknown file type, or
    // every segment degenerated to whitespace). Fall back to character
    // windows; if even that collapses, emit the whole file as one chunk.
    let fallback = char_window_chunks(content, capacity_chars.max(1));
    if !fallback.is_empty() {
        return fallback;
    }

    vec![ChunkSpan {
        content: content.to_string(),
        start_line: 0,
        end_line: newline_count(content),
    }]
}
