//! A queued prompt execution against a workspace (§3, §4.7).

use crate::WorkspaceId;
use crate::PromptTaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTask {
    pub id: PromptTaskId,
    pub workspace_id: WorkspaceId,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub working_dir: String,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    pub priority: i32,
    pub status: PromptTaskStatus,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PromptTask {
    pub fn new(workspace_id: WorkspaceId, prompt: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            id: PromptTaskId::new(),
            workspace_id,
            prompt: prompt.into(),
            system_prompt: None,
            working_dir: working_dir.into(),
            env_vars: HashMap::new(),
            priority: 0,
            status: PromptTaskStatus::Pending,
            exit_code: None,
            stdout: None,
            stderr: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Shell-escapes a prompt for embedding inside a single-quoted guest
/// command string: `'` becomes `'\''`, per the open question in spec §9(b).
pub fn shell_escape_single_quoted(input: &str) -> String {
    input.replace('\'', r#"'\''"#)
}

/// Builds the exact guest command line for §4.7's prompt-execute step.
pub fn build_prompt_command(assistant: crate::environment::AiAssistant, working_dir: &str, prompt: &str) -> String {
    use crate::environment::AiAssistant;
    let escaped = shell_escape_single_quoted(prompt);
    match assistant {
        AiAssistant::ClaudeCode => format!(
            "cd {working_dir} && claude-code --dangerously-skip-permissions '{escaped}'"
        ),
        AiAssistant::Ampcode => format!("cd {working_dir} && amp '{escaped}'"),
    }
}
