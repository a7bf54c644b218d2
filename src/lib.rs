// Inkbridge - recognized handwriting to structured notes, checklist items synced exactly once

pub mod checklist;
pub mod cleanup;
pub mod config;
pub mod healthcheck;
pub mod journal;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod recognizer;
pub mod reflow;
pub mod replace;

// Re-export main types for convenience
pub use checklist::{NoteIdentity, extract_tasks};
pub use config::{Bridge, Config, NotifyMode};
pub use ledger::{Ledger, TaskCounts, TaskFilter};
pub use model::{RunRecord, RunStats, SyncRecord, SyncResult, SyncStatus, Task, now_ms, now_rfc3339};
pub use pipeline::{BridgeReport, NoteOutcome, RunContext};
pub use recognizer::{RecognizeError, Recognizer, ToolRecognizer};
pub use reflow::{StructuralLine, reflow};
