use regex::Regex;
use std::sync::OnceLock;

/// Adapter-level query expansion (spec §4.5): `X vs Y`, `X versus Y`,
/// `difference between X and Y`, `X compared to Y` are rewritten to
/// `X OR Y` before reaching the planner. Specified at the core layer for
/// completeness even though the rewrite itself runs in the CLI/MCP adapters.
pub fn expand_query(query: &str) -> String {
    for re in [vs_re(), versus_re(), difference_re(), compared_re()] {
        if let Some(caps) = re.captures(query) {
            let x = caps.get(1).unwrap().as_str().trim();
            let y = caps.get(2).unwrap().as_str().trim();
            return format!("{x} OR {y}");
        }
    }
    query.to_string()
}

fn vs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+vs\.?\s+(.+)$").unwrap())
}

fn versus_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+versus\s+(.+)$").unwrap())
}

fn difference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^difference between\s+(.+?)\s+and\s+(.+)$").unwrap())
}

fn compared_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s+compared to\s+(.+)$").unwrap())
}
