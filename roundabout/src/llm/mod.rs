//! Model/completion provider boundary.
//!
//! The agent runtime consumes a chat-style request/response interface and
//! interprets the returned text through a `SUCCESS:`/`FAILURE:` prefix
//! contract. Providers live behind a trait so the runtime can work against
//! any LLM service while tests use the deterministic stub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AgencyError, Result};

/// Chat-style completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub provider_hint: Option<String>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 512,
            temperature: 0.2,
            provider_hint: None,
        }
    }
}

/// Free-text completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
}

/// Outcome of a completion once the prefix contract has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureOutcome {
    /// Text after the `SUCCESS:` prefix.
    Success(String),
    /// Text after the `FAILURE:` prefix.
    Failure(String),
    /// Response carried neither prefix.
    Unparsed(String),
}

impl ChatResponse {
    /// Apply the `SUCCESS:`/`FAILURE:` prefix contract.
    pub fn closure_outcome(&self) -> ClosureOutcome {
        let text = self.text.trim();
        if let Some(rest) = text.strip_prefix("SUCCESS:") {
            ClosureOutcome::Success(rest.trim().to_string())
        } else if let Some(rest) = text.strip_prefix("FAILURE:") {
            ClosureOutcome::Failure(rest.trim().to_string())
        } else {
            ClosureOutcome::Unparsed(text.to_string())
        }
    }
}

/// Completion provider abstraction.
#[async_trait]
pub trait LlmProvider: Send + Sync + fmt::Debug {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Short provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Deterministic provider for tests and local runs. Answers are derived
/// from the request content, never from ambient randomness.
#[derive(Debug, Default)]
pub struct StubLlmProvider;

impl StubLlmProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmProvider for StubLlmProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let lower = request.user.to_lowercase();
        let text = if lower.contains("fail") || lower.contains("impossible") {
            format!("FAILURE: cannot complete step for input '{}'", request.user)
        } else {
            format!("SUCCESS: completed step for input '{}'", request.user)
        };
        Ok(ChatResponse { text })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Provider that always returns a transport error. Used to exercise the
/// local-heuristic failover path.
#[derive(Debug, Default)]
pub struct UnreachableLlmProvider;

#[async_trait]
impl LlmProvider for UnreachableLlmProvider {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse> {
        Err(AgencyError::Provider("provider unreachable".to_string()))
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}
