//! LLM Client — role-aware HTTP chat-completions call against one of
//! openai/lmstudio/ollama, response parsing into file writes, and the
//! structured JSON extraction used for PRD/subtask-split calls.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::config::{LlmClientConfig, Provider};
use crate::workspace::Workspace;

use super::extract::extract_file_blocks;
use super::prompt::Role;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LLM response had no usable content")]
    EmptyResponse,
}

/// Abstraction over the HTTP backend so the pipeline can be driven by a
/// fake client in tests without a live LLM endpoint.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, role: Role, prompt: String) -> Result<String, LlmError>;
}

pub struct HttpLlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        match self.config.provider {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions".to_string(),
            Provider::LmStudio => {
                let base = self.config.lmstudio_api_base.as_deref().unwrap_or("http://localhost:1234");
                format!("{base}/v1/chat/completions")
            }
            Provider::Ollama => {
                let base = self.config.ollama_api_base.as_deref().unwrap_or("http://localhost:11434");
                format!("{base}/api/chat")
            }
        }
    }

    fn extract_content(&self, body: &serde_json::Value) -> Option<String> {
        match self.config.provider {
            Provider::Ollama => body
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(str::to_string),
            _ => body
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl LlmBackend for HttpLlmClient {
    async fn complete(&self, _role: Role, prompt: String) -> Result<String, LlmError> {
        let mut request = self.http.post(self.endpoint()).json(&json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
        }));

        if matches!(self.config.provider, Provider::OpenAi)
            && let Some(key) = &self.config.openai_api_key
        {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let body: serde_json::Value = response.json().await?;
        self.extract_content(&body).ok_or(LlmError::EmptyResponse)
    }
}

/// Apply every file block in `response` under `workspace`, skipping (and
/// logging) any block whose path would escape the project root. Returns
/// the list of paths actually written.
pub fn apply_file_blocks(workspace: &Workspace, response: &str) -> Vec<String> {
    let mut applied = Vec::new();
    for block in extract_file_blocks(response) {
        match workspace.write(&block.path, &block.content) {
            Ok(()) => applied.push(block.path),
            Err(e) => warn!("failed to apply file block {}: {e}", block.path),
        }
    }
    applied
}

/// `REVIEW_PASSED` begins the reviewer's response on success.
pub fn reviewer_passed(response: &str) -> bool {
    response.trim_start().starts_with("REVIEW_PASSED")
}

/// `PROMISE_MET` is the developer's success sentinel, written into
/// progress.txt via a file block and therefore present in the raw response.
pub fn promise_met(response: &str) -> bool {
    response.contains("PROMISE_MET")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn apply_file_blocks_writes_contained_paths() {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(dir.path().to_path_buf());
        let response = "### FILE: progress.txt\n```\nPROMISE_MET\n```";
        let applied = apply_file_blocks(&ws, response);
        assert_eq!(applied, vec!["progress.txt".to_string()]);
        assert_eq!(ws.read_to_string("progress.txt").unwrap().trim(), "PROMISE_MET");
    }

    #[test]
    fn apply_file_blocks_skips_traversal_attempt() {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(dir.path().to_path_buf());
        let response = "### FILE: ../../etc/passwd\n```\nroot:x\n```\n### FILE: ok.txt\n```\nfine\n```";
        let applied = apply_file_blocks(&ws, response);
        assert_eq!(applied, vec!["ok.txt".to_string()]);
    }

    #[test]
    fn reviewer_passed_requires_leading_sentinel() {
        assert!(reviewer_passed("REVIEW_PASSED looks good"));
        assert!(!reviewer_passed("looks good, REVIEW_PASSED"));
    }

    #[test]
    fn promise_met_detected_anywhere_in_response() {
        assert!(promise_met("### FILE: progress.txt\n```\nPROMISE_MET\n```"));
        assert!(!promise_met("still working"));
    }
}
