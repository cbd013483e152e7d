//! The default tool set every workspace gets regardless of what it asks
//! for, and the merge rule that adds the workspace's AI-assistant tool.

use aeth_core::environment::AiAssistant;
use std::collections::BTreeMap;

/// Tools every workspace needs for routine coding-assistant work, installed
/// even if the caller didn't ask for them.
pub const DEFAULT_TOOLS: &[(&str, &str)] = &[("git", "latest"), ("ripgrep", "latest")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub name: String,
    pub version: String,
}

pub fn default_tool_set() -> Vec<ToolRequest> {
    DEFAULT_TOOLS
        .iter()
        .map(|(name, version)| ToolRequest {
            name: (*name).to_string(),
            version: (*version).to_string(),
        })
        .collect()
}

/// Merges the default set, the caller's requested set, and the workspace's
/// AI-assistant tool into one deduplicated list. Later entries win on a
/// name collision — a caller-requested version overrides the default.
pub fn merge_tool_sets(requested: &[ToolRequest], assistant: AiAssistant) -> Vec<ToolRequest> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for tool in default_tool_set() {
        merged.insert(tool.name, tool.version);
    }
    for tool in requested {
        merged.insert(tool.name.clone(), tool.version.clone());
    }
    merged
        .entry(assistant.tool_id().to_string())
        .or_insert_with(|| "latest".to_string());

    merged
        .into_iter()
        .map(|(name, version)| ToolRequest { name, version })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_defaults_and_the_assistant_tool_without_duplicates() {
        let requested = vec![ToolRequest {
            name: "node".into(),
            version: "20".into(),
        }];
        let merged = merge_tool_sets(&requested, AiAssistant::ClaudeCode);
        let names: Vec<&str> = merged.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"git"));
        assert!(names.contains(&"ripgrep"));
        assert!(names.contains(&"node"));
        assert!(names.contains(&"claude-code"));
        assert_eq!(names.len(), names.iter().collect::<std::collections::HashSet<_>>().len());
    }

    #[test]
    fn caller_requested_version_overrides_the_default() {
        let requested = vec![ToolRequest {
            name: "git".into(),
            version: "2.44.0".into(),
        }];
        let merged = merge_tool_sets(&requested, AiAssistant::Ampcode);
        let git = merged.iter().find(|t| t.name == "git").unwrap();
        assert_eq!(git.version, "2.44.0");
    }
}
