//! Topic Parser (C4): derives an ordered folder path (`root` → leaf) from a
//! channel message caption. Pure function, no I/O.

use regex::Regex;
use std::sync::LazyLock;

static BATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^.*batch\s*:\s*(.+?)\s*$").unwrap());
static TOPIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^.*topic\s*:\s*(.+?)\s*$").unwrap());

/// Parses a caption into an ordered list of folder names, or `None` if the
/// caption carries neither a `Batch:` nor a non-empty `Topic:` line.
///
/// Rules (applied in order):
/// 1. A `Batch: <name>` line contributes `<name>` as the first element.
/// 2. A `Topic: a -> b -> c` line is split on `->`, trimmed, empties dropped;
///    a leading segment case-insensitively equal to `home` is dropped too.
/// 3. The two lists are concatenated; an empty result is `None`.
pub fn parse_topic_path(caption: &str) -> Option<Vec<String>> {
    let mut path = Vec::new();

    if let Some(caps) = BATCH_RE.captures(caption) {
        let name = caps[1].trim();
        if !name.is_empty() {
            path.push(name.to_string());
        }
    }

    if let Some(caps) = TOPIC_RE.captures(caption) {
        let mut segments: Vec<&str> = caps[1].split("->").map(str::trim).filter(|s| !s.is_empty()).collect();
        if segments
            .first()
            .map(|s| s.eq_ignore_ascii_case("home"))
            .unwrap_or(false)
        {
            segments.remove(0);
        }
        path.extend(segments.into_iter().map(String::from));
    }

    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_and_topic_concatenate() {
        let path = parse_topic_path("Batch: X\nTopic: Home -> A -> B").unwrap();
        assert_eq!(path, vec!["X", "A", "B"]);
    }

    #[test]
    fn topic_only_home_yields_none() {
        assert_eq!(parse_topic_path("Topic: Home"), None);
    }

    #[test]
    fn topic_without_home_prefix_is_kept_in_full() {
        let path = parse_topic_path("Topic: Algebra -> Chapter 1").unwrap();
        assert_eq!(path, vec!["Algebra", "Chapter 1"]);
    }

    #[test]
    fn caption_with_neither_field_is_none() {
        assert_eq!(parse_topic_path("just a regular caption"), None);
    }

    #[test]
    fn case_insensitive_labels() {
        let path = parse_topic_path("batch: Y\ntopic: home -> Z").unwrap();
        assert_eq!(path, vec!["Y", "Z"]);
    }
}
