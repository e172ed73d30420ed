use serde::{Deserialize, Serialize};

use crate::domain::decision::Decision;
use crate::domain::memory::MemoryUpdate;
use crate::domain::request::ConversationId;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub steps: Vec<String>,
    pub justification: String,
}

impl ReasoningTrace {
    pub fn push(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub model: String,
    /// Label describing how the response was produced, e.g. `sequential` or `degraded:plan`.
    pub execution_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub conversation_id: ConversationId,
    pub response_id: String,
    pub content: String,
    pub confidence: f64,
    pub reasoning: ReasoningTrace,
    pub executed_tools: Vec<String>,
    pub memory_updates: Vec<MemoryUpdate>,
    pub decision: Option<Decision>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn is_degraded(&self) -> bool {
        self.metadata.execution_path.starts_with("degraded")
    }
}
