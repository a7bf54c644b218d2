// Aggressive cleanup: repair heading markers that recognition glued to text

use regex::Regex;
use std::sync::LazyLock;

static LEADING_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(#{1,6})\s*(\S.*)$").expect("valid leading heading regex"));
static INLINE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(#{1,6})\s*(\S.*)$").expect("valid inline heading regex"));

/// Normalize `##Title` to `## Title` and split `text ##Title` into two lines.
///
/// Lines without a `#` run followed by text are returned unchanged.
pub fn apply(lines: &[String]) -> Vec<String> {
    let mut cleaned = Vec::with_capacity(lines.len());

    for line in lines {
        if let Some(caps) = LEADING_HEADING.captures(line) {
            cleaned.push(format!("{}{} {}", &caps[1], &caps[2], caps[3].trim()));
            continue;
        }

        if let Some(caps) = INLINE_HEADING.captures(line) {
            let hash_pos = caps.get(1).map_or(0, |m| m.start());
            let prefix = &line[..hash_pos];
            if hash_pos > 0 && !prefix.trim().is_empty() {
                cleaned.push(prefix.trim_end().to_string());
                cleaned.push(format!("{} {}", &caps[1], caps[2].trim()));
                continue;
            }
        }

        cleaned.push(line.clone());
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflow::reflow;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_heading_spacing_normalized() {
        assert_eq!(apply(&lines(&["##Subheading"])), lines(&["## Subheading"]));
        assert_eq!(apply(&lines(&["#   Spaced  "])), lines(&["# Spaced"]));
    }

    #[test]
    fn test_inline_heading_split() {
        assert_eq!(
            apply(&lines(&["second bullets ##Subheading"])),
            lines(&["second bullets", "## Subheading"])
        );
        assert_eq!(
            apply(&lines(&["- Item one ### Next part"])),
            lines(&["- Item one", "### Next part"])
        );
    }

    #[test]
    fn test_inline_split_uses_first_hash_run() {
        assert_eq!(
            apply(&lines(&["see #tag and ##Head"])),
            lines(&["see", "# tag and ##Head"])
        );
    }

    #[test]
    fn test_lines_without_markers_untouched() {
        let input = lines(&["plain text", "", "- Bullet", "trailing #"]);
        assert_eq!(apply(&input), input);
    }

    #[test]
    fn test_reflow_runs_cleanup_only_when_aggressive() {
        let raw = "notes ##Later";
        assert_eq!(reflow(raw, false), "notes ##Later\n");
        assert_eq!(reflow(raw, true), "notes\n## Later\n");
    }
}
