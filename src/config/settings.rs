use serde::{Deserialize, Serialize};

/// Global, persisted pipeline settings. The recognised override set is
/// closed: `deny_unknown_fields` rejects unrecognised keys at
/// deserialization rather than silently dropping them, both when loading
/// the persisted document and when `PUT /api/settings` replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_retries_per_task")]
    pub max_retries_per_task: u32,
    #[serde(default = "default_base_sleep_time")]
    pub base_sleep_time: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub use_reviewer_agent: bool,
    #[serde(default)]
    pub auto_test: bool,
    #[serde(default)]
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub use_human_review: bool,
}

fn default_max_iterations() -> u32 {
    50
}
fn default_max_retries_per_task() -> u32 {
    3
}
fn default_base_sleep_time() -> u64 {
    5_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries_per_task: default_max_retries_per_task(),
            base_sleep_time: default_base_sleep_time(),
            backoff_multiplier: default_backoff_multiplier(),
            use_reviewer_agent: true,
            auto_test: false,
            chat: ChatSettings::default(),
        }
    }
}

impl Settings {
    /// Normalise legacy field values discovered while loading a persisted
    /// document. The only known legacy value is a stray codex CLI path
    /// recorded on `chat.token` by an earlier schema.
    pub fn migrate(mut self) -> Self {
        if self.chat.token.as_deref() == Some("npx codex-cli") {
            self.chat.token = Some("codex".to_string());
        }
        self
    }
}

/// Snapshot of the LLM backend configuration, read once from the
/// environment at startup. Avoids hidden ambient state: everything the
/// LLM Client needs is captured here rather than re-read from the
/// environment on every call.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: Provider,
    pub model: String,
    pub command: Option<String>,
    pub openai_api_key: Option<String>,
    pub lmstudio_api_base: Option<String>,
    pub ollama_api_base: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    LmStudio,
    Ollama,
}

impl Provider {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "lmstudio" => Some(Provider::LmStudio),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }
}

impl LlmClientConfig {
    /// Recognised environment variables: `CODEX_COMMAND`, `CODEX_PROVIDER`,
    /// `CODEX_MODEL`, `OPENAI_API_KEY`, `LMSTUDIO_API_BASE`,
    /// `OLLAMA_API_BASE`.
    pub fn from_env() -> Self {
        let provider = std::env::var("CODEX_PROVIDER")
            .ok()
            .and_then(|v| Provider::parse(&v))
            .unwrap_or(Provider::OpenAi);
        let model = std::env::var("CODEX_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self {
            provider,
            model,
            command: std::env::var("CODEX_COMMAND").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            lmstudio_api_base: std::env::var("LMSTUDIO_API_BASE").ok(),
            ollama_api_base: std::env::var("OLLAMA_API_BASE").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.max_retries_per_task, 3);
        assert_eq!(s.backoff_multiplier, 2.0);
        assert!(s.use_reviewer_agent);
        assert!(!s.chat.enabled);
    }

    #[test]
    fn migrate_normalises_legacy_codex_path() {
        let mut s = Settings::default();
        s.chat.token = Some("npx codex-cli".to_string());
        let migrated = s.migrate();
        assert_eq!(migrated.chat.token.as_deref(), Some("codex"));
    }

    #[test]
    fn settings_round_trip_through_yaml() {
        let s = Settings::default();
        let yaml = serde_yaml::to_string(&s).unwrap();
        let back: Settings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(s, back);
    }
}
