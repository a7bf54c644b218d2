// External recognition tool invocation with capped backoff

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TOOL: &str = "supernote-tool";
pub const DEFAULT_RETRIES: u32 = 2;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(4);

const TRANSIENT_SIGNATURES: &[&str] = &["Resource deadlock avoided", "[Errno 11]"];

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("recognition tool not found: {0}")]
    ToolMissing(String),

    #[error("recognition tool failed: {0}")]
    ToolFailed(String),

    #[error("I/O error around recognition tool: {0}")]
    Io(#[from] io::Error),
}

pub type RecognizeResult<T> = Result<T, RecognizeError>;

/// Turns a note file into recognized text and page images.
pub trait Recognizer {
    /// Recognized text, or `None` when the note has no text.
    fn extract_text(&self, note: &Path) -> RecognizeResult<Option<String>>;

    /// Render every page as PNG into `out_dir`, returning the files sorted by name.
    fn export_images(&self, note: &Path, out_dir: &Path) -> RecognizeResult<Vec<PathBuf>>;
}

/// Failures worth retrying: file-sync clients briefly holding a lock.
pub fn is_transient(message: &str) -> bool {
    TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig))
}

/// Runs `<tool> convert -t <txt|png> -a <note> <out>`.
#[derive(Debug, Clone)]
pub struct ToolRecognizer {
    program: String,
    prefix_args: Vec<String>,
    retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ToolRecognizer {
    /// `command` may carry leading arguments, split on whitespace.
    pub fn new(command: &str, retries: u32) -> Self {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_else(|| DEFAULT_TOOL.to_string());
        Self {
            program,
            prefix_args: parts.collect(),
            retries,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    fn convert(&self, format: &str, note: &Path, out: &Path) -> RecognizeResult<Output> {
        let mut backoff = self.initial_backoff;

        for attempt in 0..=self.retries {
            let output = Command::new(&self.program)
                .args(&self.prefix_args)
                .args(["convert", "-t", format, "-a"])
                .arg(note)
                .arg(out)
                .output();

            let output = match output {
                Ok(o) => o,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(RecognizeError::ToolMissing(self.program.clone()));
                }
                Err(e) => return Err(RecognizeError::ToolFailed(e.to_string())),
            };

            if output.status.success() {
                return Ok(output);
            }

            let message = failure_message(&output);
            if is_transient(&message) && attempt < self.retries {
                warn!(
                    note = %note.display(),
                    attempt = attempt + 1,
                    retries = self.retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Recognition tool hit a transient lock, retrying"
                );
                thread::sleep(backoff);
                backoff = (backoff * 2).min(self.max_backoff);
                continue;
            }

            return Err(RecognizeError::ToolFailed(message));
        }

        Err(RecognizeError::ToolFailed("retries exhausted".to_string()))
    }
}

impl Recognizer for ToolRecognizer {
    fn extract_text(&self, note: &Path) -> RecognizeResult<Option<String>> {
        let out = tempfile::Builder::new().prefix("inkbridge-").suffix(".txt").tempfile()?;

        self.convert("txt", note, out.path())?;

        let text = fs::read_to_string(out.path())?;
        let text = text.trim();
        debug!(note = %note.display(), chars = text.len(), "Extracted text");

        if text.is_empty() { Ok(None) } else { Ok(Some(text.to_string())) }
    }

    fn export_images(&self, note: &Path, out_dir: &Path) -> RecognizeResult<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;

        let stem = note.file_stem().and_then(|s| s.to_str()).unwrap_or("note");
        let prefix = out_dir.join(format!("{}.png", stem));
        self.convert("png", note, &prefix)?;

        list_pngs(out_dir)
    }
}

/// PNG files directly inside `dir`, sorted by path.
pub fn list_pngs(dir: &Path) -> RecognizeResult<Vec<PathBuf>> {
    let mut pngs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    pngs.sort();
    Ok(pngs)
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        format!("exited with {}", output.status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Scripts run through `sh` so the test never execs a file it just wrote.
    fn fake_tool(dir: &Path, body: &str) -> ToolRecognizer {
        let script = dir.join("fake-tool.sh");
        fs::write(&script, format!("count_file=\"{}\"\n{}", dir.join("count").display(), body)).unwrap();
        ToolRecognizer::new(&format!("sh {}", script.display()), 2)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
    }

    const COUNT: &str = "n=$(cat \"$count_file\" 2>/dev/null || echo 0)\nn=$((n+1))\necho $n > \"$count_file\"\n";

    fn calls(dir: &Path) -> u32 {
        fs::read_to_string(dir.join("count")).unwrap().trim().parse().unwrap()
    }

    #[test]
    fn test_transient_detection() {
        assert!(is_transient("OSError: [Errno 11] Resource temporarily unavailable"));
        assert!(is_transient("Resource deadlock avoided"));
        assert!(!is_transient("No such file or directory"));
    }

    #[test]
    fn test_extract_text_reads_output_file() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), &format!("{}printf '  Line one\\nthat wraps\\n\\n' > \"$6\"\n", COUNT));

        let text = tool.extract_text(&temp.path().join("a.note")).unwrap();
        assert_eq!(text.as_deref(), Some("Line one\nthat wraps"));
        assert_eq!(calls(temp.path()), 1);
    }

    #[test]
    fn test_extract_text_empty_is_none() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), "printf '   \\n' > \"$6\"\n");

        assert_eq!(tool.extract_text(&temp.path().join("a.note")).unwrap(), None);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let temp = TempDir::new().unwrap();
        let body = format!(
            "{}if [ \"$n\" -lt 2 ]; then echo 'OSError: Resource deadlock avoided' >&2; exit 1; fi\nprintf 'ok' > \"$6\"\n",
            COUNT
        );
        let tool = fake_tool(temp.path(), &body);

        let text = tool.extract_text(&temp.path().join("a.note")).unwrap();
        assert_eq!(text.as_deref(), Some("ok"));
        assert_eq!(calls(temp.path()), 2);
    }

    #[test]
    fn test_transient_failure_gives_up_after_retries() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), &format!("{}echo '[Errno 11] busy' >&2\nexit 1\n", COUNT));

        let err = tool.extract_text(&temp.path().join("a.note")).unwrap_err();
        assert!(matches!(err, RecognizeError::ToolFailed(ref m) if m.contains("[Errno 11]")));
        assert_eq!(calls(temp.path()), 3);
    }

    #[test]
    fn test_other_failure_is_not_retried() {
        let temp = TempDir::new().unwrap();
        let tool = fake_tool(temp.path(), &format!("{}echo 'corrupt note' >&2\nexit 2\n", COUNT));

        let err = tool.extract_text(&temp.path().join("a.note")).unwrap_err();
        assert!(matches!(err, RecognizeError::ToolFailed(ref m) if m == "corrupt note"));
        assert_eq!(calls(temp.path()), 1);
    }

    #[test]
    fn test_missing_tool() {
        let tool = ToolRecognizer::new("/nonexistent/inkbridge-recognizer", 2);
        let err = tool.extract_text(Path::new("a.note")).unwrap_err();
        assert!(matches!(err, RecognizeError::ToolMissing(_)));
    }

    #[test]
    fn test_export_images_lists_pages() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("assets/work/Meeting");
        let body = "dir=$(dirname \"$6\")\ntouch \"$dir/Meeting-2.png\" \"$dir/Meeting-1.png\" \"$dir/notes.txt\"\n";
        let tool = fake_tool(temp.path(), body);

        let pngs = tool.export_images(&temp.path().join("Meeting.note"), &out_dir).unwrap();
        let names: Vec<String> = pngs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Meeting-1.png", "Meeting-2.png"]);
    }
}
