// Line reflow engine: raw recognized text -> canonical structured text
//
// Pass 1 merges soft-wrapped continuation lines. Pass 2 classifies each merged
// line through an ordered rule table. An optional cleanup pass (see
// `cleanup`) repairs heading markers afterwards.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::cleanup;

/// Glyphs recognized as a bullet marker at line start.
pub const BULLET_GLYPHS: &str = "•–—*-+·►";

/// Raw lines after a heading during which an uppercase start is a new block.
const HEADING_WINDOW: usize = 5;

/// One indentation unit per nesting level beyond the first.
const INDENT_UNIT: &str = "    ";

static BULLET_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*(?:[{}]|\[[ xX]\])\s+", regex::escape(BULLET_GLYPHS))).expect("valid bullet regex")
});
static NEST_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*-{1,6}\s+").expect("valid nest regex"));
static NUMBERED_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+").expect("valid numbered regex"));
static HEADING_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+").expect("valid heading regex"));
static TASKISH_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\(\]|I\]|1\]|l\]|\|\]|☐|☑|☒|\[×\])").expect("valid taskish regex"));
static WRAP_HYPHEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\s-]-$").expect("valid hyphen regex"));

static MID_NESTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(.*\S)\s+-\s+(-{1,6})\s*(.*)$").expect("valid mid-line regex"));
static LEADING_NESTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)-\s+(-{1,6})\s*(.*)$").expect("valid leading nested regex"));
static EXPLICIT_NEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(-{1,6})\s+(.*)$").expect("valid nesting regex"));
static CHECKLIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)\[( |x|X)\]\s+(.*)$").expect("valid checklist regex"));
static GLYPH_BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(\s*)(?:[{}]|\[[ xX]\])\s+", regex::escape(BULLET_GLYPHS))).expect("valid glyph regex")
});
static GLYPH_NESTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(-{1,6})\s+(.*)$").expect("valid regex"));
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\s*)(\d+)[.)]\s+").expect("valid regex"));

/// Checkbox and bracket look-alikes produced by handwriting recognition,
/// applied in order before any checklist matching.
const GLYPH_FIXES: &[(&str, &str)] = &[
    ("☐", "[ ]"),
    ("☑", "[x]"),
    ("☒", "[x]"),
    ("[×]", "[x]"),
    ("［", "["),
    ("【", "["),
    ("〖", "["),
    ("『", "["),
    ("］", "]"),
    ("】", "]"),
    ("〗", "]"),
    ("』", "]"),
    ("(]", "[ ]"),
    ("I]", "[ ]"),
    ("1]", "[ ]"),
    ("l]", "[ ]"),
    ("|]", "[ ]"),
];

/// One classified output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralLine {
    /// Heading lines pass through verbatim; `text` holds the whole line.
    Heading { level: usize, text: String },
    Bullet { indent: String, depth: usize, text: String },
    NumberedItem { indent: String, number: String, text: String },
    ChecklistItem { indent: String, depth: usize, done: bool, text: String },
    Plain { text: String },
    Blank,
}

impl fmt::Display for StructuralLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralLine::Heading { text, .. } | StructuralLine::Plain { text } => write!(f, "{}", text),
            StructuralLine::Bullet { indent, depth, text } => {
                write!(f, "{}{}- {}", indent, nesting_indent(*depth), text)
            }
            StructuralLine::NumberedItem { indent, number, text } => write!(f, "{}{}. {}", indent, number, text),
            StructuralLine::ChecklistItem {
                indent,
                depth,
                done,
                text,
            } => {
                let mark = if *done { 'x' } else { ' ' };
                write!(f, "{}{}- [{}] {}", indent, nesting_indent(*depth), mark, text)
            }
            StructuralLine::Blank => Ok(()),
        }
    }
}

fn nesting_indent(depth: usize) -> String {
    INDENT_UNIT.repeat(depth.saturating_sub(1))
}

/// A pass-2 rule: returns the lines it produces, or `None` to fall through.
type Rule = fn(&str) -> Option<Vec<StructuralLine>>;

/// Pass-2 rules, evaluated top to bottom; the first match wins.
/// Glyph normalization runs between `passthrough` and `mid_line_nested`.
const RULES: &[(&str, Rule)] = &[
    ("mid_line_nested", mid_line_nested),
    ("leading_nested", leading_nested),
    ("explicit_nesting", explicit_nesting),
    ("checklist", checklist),
    ("glyph_bullet", glyph_bullet),
    ("numbered", numbered),
];

/// Reflow raw recognized text into canonical structured text.
///
/// Never fails: anything the rules do not recognize becomes a plain line.
/// The output always ends with exactly one newline.
pub fn reflow(text: &str, aggressive: bool) -> String {
    let merged = merge_continuations(text);
    let lines: Vec<String> = classify(&merged).iter().map(ToString::to_string).collect();

    let lines = if aggressive { cleanup::apply(&lines) } else { lines };

    format!("{}\n", lines.join("\n").trim())
}

/// Pass 1: join soft-wrapped lines into logical lines.
pub fn merge_continuations(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<String> = Vec::new();
    let mut last_heading: Option<usize> = None;

    for (i, line) in normalized.split('\n').enumerate() {
        let Some(prev) = out.last_mut() else {
            if HEADING_START.is_match(line) {
                last_heading = Some(i);
            }
            out.push(line.to_string());
            continue;
        };

        if starts_new_block(line) || is_hard_boundary(prev, line, i, last_heading) {
            if HEADING_START.is_match(line) {
                last_heading = Some(i);
            }
            out.push(line.to_string());
        } else if WRAP_HYPHEN.is_match(prev) {
            prev.pop();
            prev.push_str(line.trim_start());
        } else {
            let joined = format!("{} {}", prev.trim_end(), line.trim_start());
            *prev = joined;
        }
    }

    out
}

fn starts_new_block(line: &str) -> bool {
    line.trim().is_empty()
        || BULLET_START.is_match(line)
        || NEST_START.is_match(line)
        || NUMBERED_START.is_match(line)
        || HEADING_START.is_match(line)
        || TASKISH_START.is_match(line)
}

fn is_hard_boundary(prev: &str, line: &str, index: usize, last_heading: Option<usize>) -> bool {
    if prev.trim().is_empty() || prev.ends_with("  ") || HEADING_START.is_match(prev) {
        return true;
    }

    // Recognition tends to drop list markers right below a heading.
    let near_heading = last_heading.is_some_and(|h| index - h <= HEADING_WINDOW);
    near_heading && line.trim_start().chars().next().is_some_and(char::is_uppercase)
}

/// Pass 2: classify every merged line.
pub fn classify(lines: &[String]) -> Vec<StructuralLine> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        out.extend(classify_line(line));
    }
    out
}

/// Classify a single merged line. May produce two lines (mid-line split).
pub fn classify_line(line: &str) -> Vec<StructuralLine> {
    if let Some(passed) = passthrough(line) {
        return vec![passed];
    }

    let line = normalize_glyphs(line);

    for (_name, rule) in RULES {
        if let Some(produced) = rule(&line) {
            return produced;
        }
    }

    vec![StructuralLine::Plain {
        text: line.trim_end().to_string(),
    }]
}

fn passthrough(line: &str) -> Option<StructuralLine> {
    if line.trim().is_empty() {
        return Some(StructuralLine::Blank);
    }
    if HEADING_START.is_match(line) {
        let level = line.trim_start().chars().take_while(|c| *c == '#').count();
        return Some(StructuralLine::Heading {
            level,
            text: line.trim_end().to_string(),
        });
    }
    None
}

/// Replace checkbox and bracket look-alikes with canonical `[ ]` / `[x]`.
pub fn normalize_glyphs(line: &str) -> String {
    GLYPH_FIXES
        .iter()
        .fold(line.to_string(), |acc, (from, to)| acc.replace(from, to))
}

fn mid_line_nested(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = MID_NESTED.captures(line)?;
    let indent = &caps[1];
    let parent = format!("{}{}", indent, caps[2].trim_end());
    Some(vec![
        StructuralLine::Plain { text: parent },
        bullet(indent, 1 + caps[3].len(), &caps[4]),
    ])
}

fn leading_nested(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = LEADING_NESTED.captures(line)?;
    Some(vec![bullet(&caps[1], 1 + caps[2].len(), &caps[3])])
}

fn explicit_nesting(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = EXPLICIT_NEST.captures(line)?;
    Some(vec![bullet(&caps[1], caps[2].len(), &caps[3])])
}

fn checklist(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = CHECKLIST.captures(line)?;
    Some(vec![StructuralLine::ChecklistItem {
        indent: caps[1].to_string(),
        depth: 1,
        done: caps[2].eq_ignore_ascii_case("x"),
        text: capitalize_first_letter(caps[3].trim_end()),
    }])
}

fn glyph_bullet(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = GLYPH_BULLET.captures(line)?;
    let indent = &caps[1];
    let content = line[caps[0].len()..].trim_end();

    if let Some(nested) = GLYPH_NESTED.captures(content) {
        return Some(vec![bullet(indent, nested[1].len(), &nested[2])]);
    }
    Some(vec![bullet(indent, 1, content)])
}

fn numbered(line: &str) -> Option<Vec<StructuralLine>> {
    let caps = NUMBERED.captures(line)?;
    let content = line[caps[0].len()..].trim_end();
    Some(vec![StructuralLine::NumberedItem {
        indent: caps[1].to_string(),
        number: caps[2].to_string(),
        text: capitalize_first_letter(content),
    }])
}

fn bullet(indent: &str, depth: usize, content: &str) -> StructuralLine {
    StructuralLine::Bullet {
        indent: indent.to_string(),
        depth,
        text: capitalize_first_letter(content.trim_end()),
    }
}

/// Uppercase the first alphabetic character, leaving everything else alone.
pub fn capitalize_first_letter(s: &str) -> String {
    match s.char_indices().find(|(_, c)| c.is_alphabetic()) {
        Some((i, c)) => {
            let mut out = String::with_capacity(s.len());
            out.push_str(&s[..i]);
            out.extend(c.to_uppercase());
            out.push_str(&s[i + c.len_utf8()..]);
            out
        }
        None => s.to_string(),
    }
}
