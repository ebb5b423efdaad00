//! Runtime configuration.
//!
//! Resolution order (later wins):
//! 1. Built-in defaults
//! 2. Config file (JSON, or YAML for `.yaml` / `.yml`)
//! 3. Environment variables (`ASK_DB_PATH`, `ASK_LLM_MODEL`,
//!    `ASK_LLM_MAX_ATTEMPTS`, `ASK_SIMILAR_FALLBACK`, `ASK_READ_POLICY`)
//!
//! The provider API key is only ever read from the environment
//! (`GEMINI_API_KEY`, `OPENAI_API_KEY` or `ANTHROPIC_API_KEY`, by model).

use crate::llm::{HttpCompletionClient, LlmProvider, RetryPolicy, RetryingCompletion};
use crate::store::ReadPolicy;
use crate::types::{AskError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default completion model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Configuration for a session and its orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AskConfig {
    /// SQLite store to query (tilde-expanded)
    pub db_path: Option<String>,

    pub model: String,

    /// Override the provider endpoint (OpenAI-compatible gateways)
    pub base_url: Option<String>,

    pub request_timeout_secs: u64,

    pub retry: RetryPolicy,

    /// Look for similar records when a filtered read finds nothing
    pub similar_fallback: bool,

    pub read_policy: ReadPolicy,

    /// Result rows included in explanation prompts
    pub preview_rows: usize,

    /// Rewrite bare `SELECT MAX(x) FROM t` into the full maximum row
    pub expand_extremum_rows: bool,

    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
            similar_fallback: true,
            read_policy: ReadPolicy::default(),
            preview_rows: crate::llm::explainer::DEFAULT_PREVIEW_ROWS,
            expand_extremum_rows: true,
            api_key: None,
        }
    }
}

impl AskConfig {
    /// Load from an optional file, then apply the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AskError::ConfigError` (or the parse error) if the file cannot
    /// be read or an environment value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON or YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        let text = std::fs::read_to_string(&expanded).map_err(|e| {
            AskError::ConfigError(format!("cannot read {}: {}", expanded.display(), e))
        })?;

        let is_yaml = matches!(
            expanded.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&text)?
        } else {
            serde_json::from_str(&text)?
        };
        tracing::debug!(path = %expanded.display(), "loaded config file");
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ASK_DB_PATH") {
            self.db_path = Some(path);
        }
        if let Some(model) = lookup("ASK_LLM_MODEL") {
            self.model = model;
        }
        if let Some(attempts) = lookup("ASK_LLM_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts.trim().parse().map_err(|_| {
                AskError::ConfigError(format!("ASK_LLM_MAX_ATTEMPTS must be a number, got '{}'", attempts))
            })?;
        }
        if let Some(flag) = lookup("ASK_SIMILAR_FALLBACK") {
            self.similar_fallback = parse_flag("ASK_SIMILAR_FALLBACK", &flag)?;
        }
        if let Some(policy) = lookup("ASK_READ_POLICY") {
            self.read_policy = policy.parse()?;
        }
        self.api_key = lookup(self.provider().api_key_var()).filter(|k| !k.trim().is_empty());
        Ok(())
    }

    /// Switch model, re-reading the API key of its provider from the environment.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.api_key = std::env::var(self.provider().api_key_var())
            .ok()
            .filter(|k| !k.trim().is_empty());
    }

    pub fn provider(&self) -> LlmProvider {
        LlmProvider::for_model(&self.model)
    }

    /// Store path with `~` expanded.
    ///
    /// # Errors
    ///
    /// Returns `AskError::ConfigError` if no path is configured
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        let path = self.db_path.as_deref().ok_or_else(|| {
            AskError::ConfigError("no database configured (set ASK_DB_PATH or --db)".to_string())
        })?;
        Ok(PathBuf::from(shellexpand::tilde(path).into_owned()))
    }

    /// Build the retrying HTTP completion client for the configured model.
    ///
    /// # Errors
    ///
    /// Returns `AskError::ConfigError` if the provider's API key is not set
    pub fn completion_client(&self) -> Result<RetryingCompletion<HttpCompletionClient>> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            AskError::ConfigError(format!(
                "{} environment variable not set",
                self.provider().api_key_var()
            ))
        })?;

        let mut client = HttpCompletionClient::new(
            api_key,
            self.model.clone(),
            Duration::from_secs(self.request_timeout_secs),
        )?;
        if let Some(base_url) = &self.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Ok(RetryingCompletion::new(client, self.retry))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AskError::ConfigError(format!(
            "{} must be true or false, got '{}'",
            name, value
        ))),
    }
}
