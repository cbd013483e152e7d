//! Ordered preparation actions run against a workspace's VM (§3, §4.7).

use crate::{PrepStepId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum PrepStepKind {
    GitClone {
        url: String,
        #[serde(default)]
        branch: Option<String>,
        dest: String,
    },
    Script {
        #[serde(default = "default_interpreter")]
        interpreter: String,
        content: String,
    },
    EnvVar {
        key: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        secret_name: Option<String>,
        #[serde(default)]
        is_secret: bool,
    },
}

fn default_interpreter() -> String {
    "bash".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepStepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepStep {
    pub id: PrepStepId,
    pub workspace_id: WorkspaceId,
    pub order: i32,
    pub kind: PrepStepKind,
    pub status: PrepStepStatus,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: Option<i64>,
}

impl PrepStep {
    pub fn new(workspace_id: WorkspaceId, order: i32, kind: PrepStepKind) -> Self {
        Self {
            id: PrepStepId::new(),
            workspace_id,
            order,
            kind,
            status: PrepStepStatus::Pending,
            exit_code: None,
            stdout: None,
            stderr: None,
            duration_ms: None,
        }
    }
}

/// The engine executes steps in ascending `order` and never re-runs a
/// Completed one — verify the ordering invariant directly on a slice.
pub fn is_strictly_ordered(steps: &[PrepStep]) -> bool {
    steps.windows(2).all(|w| w[0].order < w[1].order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: i32) -> PrepStep {
        PrepStep::new(
            WorkspaceId::new(),
            order,
            PrepStepKind::Script {
                interpreter: "bash".into(),
                content: "true".into(),
            },
        )
    }

    #[test]
    fn strictly_ordered_steps_pass() {
        let steps = vec![step(0), step(1), step(2)];
        assert!(is_strictly_ordered(&steps));
    }

    #[test]
    fn duplicate_order_fails_the_check() {
        let steps = vec![step(0), step(0)];
        assert!(!is_strictly_ordered(&steps));
    }

    #[test]
    fn git_clone_variant_roundtrips() {
        let kind = PrepStepKind::GitClone {
            url: "https://github.com/example/repo".into(),
            branch: Some("main".into()),
            dest: "/root/workspace".into(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"step_type\":\"git_clone\""));
        let back: PrepStepKind = serde_json::from_str(&json).unwrap();
        match back {
            PrepStepKind::GitClone { url, branch, .. } => {
                assert_eq!(url, "https://github.com/example/repo");
                assert_eq!(branch.as_deref(), Some("main"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
