use anyhow::Result;
use async_trait::async_trait;
use cerebro_core::domain::context::Context;
use cerebro_core::domain::intent::{clamp_confidence, IntentType};
use cerebro_core::domain::response::TokenUsage;
use serde::{Deserialize, Serialize};

use crate::conversation::MessageAnalyzer;

/// Intent classification produced by a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent_type: IntentType,
    pub domain: Option<String>,
    pub confidence: f64,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_id(&self) -> &str;
    async fn classify(&self, text: &str, context: &Context) -> Result<Classification>;
    async fn generate(&self, prompt: &str, context: &Context) -> Result<Generation>;
}

/// Deterministic offline client. Classifies with the keyword analyzer and echoes prompts back.
#[derive(Clone, Debug)]
pub struct EchoLlmClient {
    model: String,
    analyzer: MessageAnalyzer,
}

impl Default for EchoLlmClient {
    fn default() -> Self {
        Self::new("echo-1")
    }
}

impl EchoLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), analyzer: MessageAnalyzer::new() }
    }
}

#[async_trait]
impl LlmClient for EchoLlmClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn classify(&self, text: &str, context: &Context) -> Result<Classification> {
        let analysis = self.analyzer.analyze(text, &context.available_tools());
        let confidence = if analysis.keyword_hits == 0 {
            0.3
        } else {
            0.55 + 0.15 * analysis.keyword_hits as f64
        };

        Ok(Classification {
            intent_type: analysis.intent_type,
            domain: Some(analysis.domain),
            confidence: clamp_confidence(confidence.min(0.95)),
            model: self.model.clone(),
        })
    }

    async fn generate(&self, prompt: &str, _context: &Context) -> Result<Generation> {
        let text = prompt.trim().to_string();
        let usage = TokenUsage {
            prompt_tokens: word_count(prompt),
            completion_tokens: word_count(&text),
        };

        Ok(Generation { text, usage, model: self.model.clone() })
    }
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use cerebro_core::domain::context::{Context, UserProfile};
    use cerebro_core::domain::intent::IntentType;
    use cerebro_core::domain::request::{ConversationId, UserId};

    use super::{EchoLlmClient, LlmClient};

    fn context() -> Context {
        let user_id = UserId("u-1".to_string());
        Context::new(ConversationId("c-1".to_string()), user_id.clone(), UserProfile::minimal(user_id))
    }

    #[tokio::test]
    async fn echo_classifier_scores_keyword_hits_above_rules() {
        let client = EchoLlmClient::default();
        let classification =
            client.classify("what is my balance?", &context()).await.expect("classify");

        assert_eq!(classification.intent_type, IntentType::Informational);
        assert_eq!(classification.domain.as_deref(), Some("finance"));
        assert!((classification.confidence - 0.7).abs() < 1e-9);
        assert_eq!(classification.model, "echo-1");
    }

    #[tokio::test]
    async fn echo_generation_reports_token_usage() {
        let client = EchoLlmClient::new("echo-test");
        let generation = client.generate("  hello there  ", &context()).await.expect("generate");

        assert_eq!(generation.text, "hello there");
        assert_eq!(generation.usage.prompt_tokens, 2);
        assert_eq!(generation.usage.completion_tokens, 2);
        assert_eq!(client.model_id(), "echo-test");
    }
}
