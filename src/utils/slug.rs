// backuptool/src/utils/slug.rs
use regex::Regex;
use std::sync::OnceLock;

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static regex"))
}

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-\s]+").expect("static regex"))
}

/// Lowercases, drops anything that is not a word character, whitespace or
/// hyphen, and collapses runs of whitespace/hyphens into a single hyphen.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    let cleaned = disallowed().replace_all(&lowered, "");
    let collapsed = separators().replace_all(cleaned.trim(), "-");
    collapsed.trim_matches(|c| c == '-' || c == '_').to_string()
}
