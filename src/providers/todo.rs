// Task providers: where unseen open checklist items get created

use reqwest::blocking::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TodoistConfig;
use crate::model::{SyncResult, SyncStatus, Task};

const TODOIST_TIMEOUT: Duration = Duration::from_secs(10);
const PRODUCT_LABEL: &str = "inkbridge";

/// Bridge and vault the tasks came from.
pub struct TodoContext<'a> {
    pub bridge_name: &'a str,
    pub vault_name: &'a str,
    pub vault_path: &'a Path,
    /// Builds an app URL for a vault-relative note path without extension.
    pub note_url: &'a dyn Fn(&str) -> String,
}

/// Creates tasks in an external tracker.
///
/// Must return exactly one result per input task and never fail as a whole;
/// per-task problems become `SyncStatus::Failed`.
pub trait TaskProvider {
    fn name(&self) -> &str;

    fn sync_tasks(&self, tasks: &[Task], ctx: &TodoContext<'_>) -> Vec<SyncResult>;
}

/// Accepts everything and creates nothing.
#[derive(Debug, Default)]
pub struct NoopTaskProvider;

impl TaskProvider for NoopTaskProvider {
    fn name(&self) -> &str {
        "noop"
    }

    fn sync_tasks(&self, tasks: &[Task], _ctx: &TodoContext<'_>) -> Vec<SyncResult> {
        tasks
            .iter()
            .map(|t| SyncResult {
                local_id: t.local_id.clone(),
                provider: self.name().to_string(),
                external_id: None,
                status: SyncStatus::Skipped,
                error: None,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct NewTodoistTask<'a> {
    content: &'a str,
    description: String,
    labels: Vec<String>,
}

/// Todoist REST: one `POST /tasks` per task.
#[derive(Debug, Clone)]
pub struct TodoistProvider {
    token: Option<String>,
    base_url: String,
}

impl TodoistProvider {
    pub fn new(config: &TodoistConfig) -> Self {
        Self {
            token: config
                .api_token
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn description(task: &Task, ctx: &TodoContext<'_>) -> String {
        let note_path = strip_md_extension(&task.note_path);
        [
            "From Inkbridge".to_string(),
            String::new(),
            format!("Vault: {}", ctx.vault_name),
            format!("Note: {}", task.note_path),
            format!("Line: {}", task.line_no),
            format!("Local ID: {}", task.local_id),
            String::new(),
            format!("Note URL: {}", (ctx.note_url)(note_path)),
        ]
        .join("\n")
    }

    fn labels(ctx: &TodoContext<'_>) -> Vec<String> {
        vec![PRODUCT_LABEL.to_string(), format!("vault:{}", ctx.vault_name)]
    }

    fn create(&self, client: &Client, token: &str, task: &Task, ctx: &TodoContext<'_>) -> SyncResult {
        let body = NewTodoistTask {
            content: &task.title,
            description: Self::description(task, ctx),
            labels: Self::labels(ctx),
        };

        let response = client
            .post(format!("{}/tasks", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send();

        let response = match response {
            Ok(r) => r,
            Err(e) => return SyncResult::failed(task, self.name(), format!("URLError: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            return SyncResult::failed(task, self.name(), format!("HTTPError {}: {}", status.as_u16(), reason));
        }

        let external_id = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|v| v.get("id").cloned())
            .and_then(|id| match id {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            });

        debug!(local_id = %task.local_id, external_id = ?external_id, "Created Todoist task");
        SyncResult {
            local_id: task.local_id.clone(),
            provider: self.name().to_string(),
            external_id,
            status: SyncStatus::Created,
            error: None,
        }
    }
}

impl TaskProvider for TodoistProvider {
    fn name(&self) -> &str {
        "todoist"
    }

    fn sync_tasks(&self, tasks: &[Task], ctx: &TodoContext<'_>) -> Vec<SyncResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let Some(token) = self.token.as_deref() else {
            warn!(bridge = ctx.bridge_name, count = tasks.len(), "Todoist API token is not set");
            return tasks
                .iter()
                .map(|t| SyncResult::failed(t, self.name(), "Todoist API token is not set"))
                .collect();
        };

        let client = match Client::builder().timeout(TODOIST_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                let msg = format!("Failed to build HTTP client: {}", e);
                return tasks.iter().map(|t| SyncResult::failed(t, self.name(), &msg)).collect();
            }
        };

        let results: Vec<SyncResult> = tasks.iter().map(|t| self.create(&client, token, t, ctx)).collect();

        let created = results.iter().filter(|r| r.status == SyncStatus::Created).count();
        info!(
            bridge = ctx.bridge_name,
            created,
            failed = results.len() - created,
            "Synced tasks to Todoist"
        );
        results
    }
}

fn strip_md_extension(path: &str) -> &str {
    let cut = path.len().saturating_sub(3);
    match path.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".md") => &path[..cut],
        _ => path,
    }
}
