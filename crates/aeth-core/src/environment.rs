//! Reusable workspace templates (§3).

use crate::EnvironmentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiAssistant {
    ClaudeCode,
    Ampcode,
}

impl Default for AiAssistant {
    fn default() -> Self {
        Self::ClaudeCode
    }
}

impl AiAssistant {
    /// The mise tool id that provides this assistant's CLI.
    pub fn tool_id(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Ampcode => "ampcode",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpServer {
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        name: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl McpServer {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } => name,
            Self::Http { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u32,
    pub git_repo_url: Option<String>,
    pub git_branch: Option<String>,
    pub working_dir: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
    #[serde(default)]
    pub ai_assistant: AiAssistant,
    pub idle_timeout_seconds: u64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            id: EnvironmentId::new(),
            name: String::new(),
            vcpus: 1,
            memory_mb: 512,
            git_repo_url: None,
            git_branch: None,
            working_dir: "/root/workspace".into(),
            tools: Vec::new(),
            env_vars: HashMap::new(),
            mcp_servers: Vec::new(),
            ai_assistant: AiAssistant::ClaudeCode,
            idle_timeout_seconds: 1800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_timeout_is_thirty_minutes() {
        assert_eq!(Environment::default().idle_timeout_seconds, 1800);
    }

    #[test]
    fn json_roundtrip_preserves_tools_env_vars_and_mcp_servers() {
        let mut env = Environment::default();
        env.tools = vec!["ripgrep".into(), "fd".into()];
        env.env_vars.insert("NODE_ENV".into(), "development".into());
        env.mcp_servers.push(McpServer::Stdio {
            name: "filesystem".into(),
            command: "mcp-server-filesystem".into(),
            args: vec!["/root/workspace".into()],
            env: HashMap::new(),
        });
        env.mcp_servers.push(McpServer::Http {
            name: "search".into(),
            url: "https://example.com/mcp".into(),
            headers: HashMap::new(),
        });

        let json = serde_json::to_string(&env).unwrap();
        let back: Environment = serde_json::from_str(&json).unwrap();

        assert_eq!(back.tools, env.tools);
        assert_eq!(back.env_vars, env.env_vars);
        assert_eq!(back.mcp_servers.len(), 2);
        assert_eq!(back.mcp_servers[0].name(), "filesystem");
        assert_eq!(back.mcp_servers[1].name(), "search");
    }
}
