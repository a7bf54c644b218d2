// Checklist extraction from finalized structured text

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::model::Task;

static TASK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-\s\[( |x|X)\]\s+(.*)$").expect("valid task line regex"));

/// Where a note lives, for building task identities.
#[derive(Debug, Clone)]
pub struct NoteIdentity<'a> {
    pub bridge_name: &'a str,
    pub vault_name: &'a str,
    /// Note path relative to the vault root, `/`-separated.
    pub note_path: &'a str,
}

/// Find every canonical checklist line and turn it into a `Task`.
///
/// Line numbers are 1-based positions in `structured`. Items with an empty
/// title are dropped.
pub fn extract_tasks(structured: &str, note: &NoteIdentity<'_>) -> Vec<Task> {
    let tasks: Vec<Task> = structured
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = TASK_LINE.captures(line)?;
            let title = caps[2].trim();
            if title.is_empty() {
                return None;
            }

            let line_no = (idx + 1) as i64;
            Some(Task {
                local_id: Task::local_id_for(note.bridge_name, note.note_path, line_no),
                bridge_name: note.bridge_name.to_string(),
                vault_name: note.vault_name.to_string(),
                note_path: note.note_path.to_string(),
                line_no,
                title: title.to_string(),
                completed: caps[1].eq_ignore_ascii_case("x"),
            })
        })
        .collect();

    if !tasks.is_empty() {
        debug!(bridge = note.bridge_name, note = note.note_path, count = tasks.len(), "Detected tasks");
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn identity() -> NoteIdentity<'static> {
        NoteIdentity {
            bridge_name: "work",
            vault_name: "Work",
            note_path: "Meetings/Standup.md",
        }
    }

    #[test]
    fn test_extracts_open_and_completed() {
        let text = "# Standup\n- [ ] Send notes\n- [x] Book room\n- [X] Order lunch\n";
        let tasks = extract_tasks(text, &identity());

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].title, "Send notes");
        assert_eq!(tasks[0].line_no, 2);
        assert!(!tasks[0].completed);
        assert_eq!(tasks[0].local_id, "work:Meetings/Standup.md:2");
        assert!(tasks[1].completed);
        assert!(tasks[2].completed);
        assert_eq!(tasks[2].vault_name, "Work");
    }

    #[test]
    fn test_indented_items_are_candidates() {
        let tasks = extract_tasks("- Parent\n    - [ ] Nested task\n", &identity());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].line_no, 2);
    }

    #[test]
    fn test_empty_titles_dropped() {
        let tasks = extract_tasks("- [ ]    \n- [ ] Real\n", &identity());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Real");
        assert_eq!(tasks[0].line_no, 2);
    }

    #[test]
    fn test_non_canonical_forms_ignored() {
        let text = "[ ] bare\n* [ ] star\n-[ ] tight\n- [y] other\n";
        assert!(extract_tasks(text, &identity()).is_empty());
    }

    #[test]
    fn test_identity_stable_across_calls() {
        let text = "- [ ] One\ntext\n- [ ] Two\n";
        let first: HashSet<String> = extract_tasks(text, &identity()).into_iter().map(|t| t.local_id).collect();
        let second: HashSet<String> = extract_tasks(text, &identity()).into_iter().map(|t| t.local_id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_identity_follows_line_position() {
        let before = extract_tasks("- [ ] Task\n", &identity());
        let after = extract_tasks("New first line\n- [ ] Task\n", &identity());
        assert_ne!(before[0].local_id, after[0].local_id);
    }
}
