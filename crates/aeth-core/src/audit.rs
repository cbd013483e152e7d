//! Append-only record of privileged actions: VM create/delete, secret
//! reads, proxy whitelist changes. Not a spec entity, carried as the
//! natural companion to the `SecurityPolicy` error kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub at: DateTime<Utc>,
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_event_carries_actor_action_target() {
        let event = AuditEvent::new("operator", "secret.read", "workspace:abc");
        assert_eq!(event.actor, "operator");
        assert_eq!(event.action, "secret.read");
        assert_eq!(event.target, "workspace:abc");
    }
}
