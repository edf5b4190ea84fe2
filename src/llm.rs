//! Optional reasoning-model provider for the debate stages.
//!
//! The engine never trusts model output: consumers default missing fields,
//! clamp score deltas, and fall back to the deterministic path on any
//! transport or parse failure. Only the fallback path is fully
//! reproducible.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("reasoning model transport failure: {message}")]
    #[diagnostic(
        code(fraudgraph::llm::transport),
        help("Check the reasoning provider endpoint and credentials.")
    )]
    Transport { message: String },

    #[error("reasoning model returned non-JSON output")]
    #[diagnostic(code(fraudgraph::llm::parse))]
    Parse,
}

/// Produces one structured JSON object per prompt pair.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    async fn generate_json(&self, system: &str, user: &str) -> Result<Value, LlmError>;
}

/// Chat-completions-style HTTP provider with bearer-token auth.
pub struct HttpReasoningModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpReasoningModel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| LlmError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ReasoningModel for HttpReasoningModel {
    async fn generate_json(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
        });
        let response: Value = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| LlmError::Transport {
                message: err.to_string(),
            })?
            .json()
            .await
            .map_err(|err| LlmError::Transport {
                message: err.to_string(),
            })?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LlmError::Parse)?;
        let parsed: Value = serde_json::from_str(content).map_err(|_| LlmError::Parse)?;
        if parsed.is_object() {
            Ok(parsed)
        } else {
            Err(LlmError::Parse)
        }
    }
}

/// Scripted model for tests: returns queued responses in order, then errors.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<Value, LlmError>>>,
}

impl ScriptedModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, value: Value) {
        self.responses.lock().push_back(Ok(value));
    }

    pub fn push_parse_failure(&self) {
        self.responses.lock().push_back(Err(LlmError::Parse));
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    async fn generate_json(&self, _system: &str, _user: &str) -> Result<Value, LlmError> {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or(Err(LlmError::Transport {
                message: "scripted model exhausted".into(),
            }))
    }
}
