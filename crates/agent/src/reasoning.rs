use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use cerebro_core::config::ReasoningConfig;
use cerebro_core::domain::context::Context;
use cerebro_core::domain::decision::{Decision, DecisionType};
use cerebro_core::domain::intent::{clamp_confidence, Intent, IntentType};
use cerebro_core::domain::memory::MemorySnapshot;
use cerebro_core::domain::request::Request;
use cerebro_core::planning::SUMMARIZE_ACTION;
use futures::FutureExt;
use tracing::warn;

use crate::conversation::{MessageAnalysis, MessageAnalyzer};
use crate::llm::{Classification, LlmClient};

pub const RULES_CLASSIFIER: &str = "rules-v1";
/// Confidence assigned when no keyword matched at all.
pub const NO_SIGNAL_CONFIDENCE: f64 = 0.3;
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, request: &Request, context: &Context, memory: &MemorySnapshot) -> Intent;

    fn decide(&self, intent: &Intent, context: &Context, memory: &MemorySnapshot) -> Decision;
}

/// Tools usable by this request: the context catalog plus tools remembered procedurally.
pub fn available_tools(context: &Context, memory: &MemorySnapshot) -> Vec<String> {
    context
        .available_tools()
        .into_iter()
        .chain(memory.available_tools())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn intent_id(request: &Request, classifier: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.request_id().0.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.message().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(classifier.as_bytes());
    format!("intent_{}", &hasher.finalize().to_hex()[..24])
}

fn rule_intent(request: &Request, analysis: MessageAnalysis, cap: f64, degraded: bool) -> Intent {
    let confidence = if analysis.keyword_hits == 0 { NO_SIGNAL_CONFIDENCE.min(cap) } else { cap };

    Intent {
        id: intent_id(request, RULES_CLASSIFIER),
        intent_type: analysis.intent_type,
        domain: analysis.domain,
        confidence: clamp_confidence(confidence),
        entities: analysis.entities,
        classifier: RULES_CLASSIFIER.to_string(),
        degraded,
    }
}

/// Deterministic intent-to-decision mapping shared by every reasoner.
pub fn decide_by_rules(intent: &Intent, tools: &[String], clarification_threshold: f64) -> Decision {
    if intent.confidence < clarification_threshold {
        return Decision::new(
            DecisionType::ClarificationNeeded,
            format!(
                "intent confidence {:.2} is below the clarification threshold {:.2}",
                intent.confidence, clarification_threshold
            ),
            vec![],
            intent.confidence,
        );
    }

    let matched = intent
        .entities_of_type("capability")
        .map(|entity| entity.value.clone())
        .filter(|tool| tools.contains(tool))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    match (intent.intent_type, matched.len()) {
        (IntentType::Transactional, 1) => Decision::new(
            DecisionType::ToolExecution,
            format!("transactional request maps onto tool `{}`", matched[0]),
            matched,
            intent.confidence,
        ),
        (IntentType::Transactional | IntentType::Analytical, count) if count >= 2 => Decision::new(
            DecisionType::MultiStepPlan,
            format!("{} request needs {count} tools", intent.intent_type.as_str()),
            matched,
            intent.confidence,
        ),
        (IntentType::Analytical, 1) => {
            let reasoning = format!("analytical request gathers data with `{}` then summarizes", matched[0]);
            let mut actions = matched;
            actions.push(SUMMARIZE_ACTION.to_string());
            Decision::new(DecisionType::MultiStepPlan, reasoning, actions, intent.confidence)
        }
        _ => Decision::new(
            DecisionType::DirectResponse,
            format!("{} request answered directly", intent.intent_type.as_str()),
            vec![],
            intent.confidence,
        ),
    }
}

/// Keyword classifier with confidence capped below the clarification threshold band.
#[derive(Clone, Debug)]
pub struct RuleBasedReasoner {
    analyzer: MessageAnalyzer,
    config: ReasoningConfig,
}

impl RuleBasedReasoner {
    pub fn new(config: ReasoningConfig) -> Self {
        Self { analyzer: MessageAnalyzer::new(), config }
    }
}

#[async_trait]
impl ReasoningEngine for RuleBasedReasoner {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn analyze(&self, request: &Request, context: &Context, memory: &MemorySnapshot) -> Intent {
        let analysis = self.analyzer.analyze(request.message(), &available_tools(context, memory));
        rule_intent(request, analysis, self.config.fallback_confidence_cap, false)
    }

    fn decide(&self, intent: &Intent, context: &Context, memory: &MemorySnapshot) -> Decision {
        decide_by_rules(intent, &available_tools(context, memory), self.config.clarification_threshold)
    }
}

/// Classifies through the model collaborator and falls back to keyword rules when it fails.
#[derive(Clone)]
pub struct ModelBackedReasoner {
    llm: Arc<dyn LlmClient>,
    analyzer: MessageAnalyzer,
    config: ReasoningConfig,
    classify_timeout: Duration,
}

impl ModelBackedReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, config: ReasoningConfig) -> Self {
        Self {
            llm,
            analyzer: MessageAnalyzer::new(),
            config,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
        }
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }

    /// One classifier call, bounded by the classify timeout. A panic counts as a failure.
    async fn classify(&self, request: &Request, context: &Context) -> anyhow::Result<Classification> {
        let call = AssertUnwindSafe(self.llm.classify(request.message(), context)).catch_unwind();
        match tokio::time::timeout(self.classify_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(anyhow!("classifier panicked")),
            Err(_) => Err(anyhow!(
                "classifier timed out after {}ms",
                self.classify_timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl ReasoningEngine for ModelBackedReasoner {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn analyze(&self, request: &Request, context: &Context, memory: &MemorySnapshot) -> Intent {
        let analysis = self.analyzer.analyze(request.message(), &available_tools(context, memory));

        match self.classify(request, context).await {
            Ok(classification) => {
                let classifier = format!("model:{}", classification.model);
                Intent {
                    id: intent_id(request, &classifier),
                    intent_type: classification.intent_type,
                    domain: classification.domain.unwrap_or(analysis.domain),
                    confidence: clamp_confidence(classification.confidence),
                    entities: analysis.entities,
                    classifier,
                    degraded: false,
                }
            }
            Err(error) => {
                warn!(
                    event_name = "agent.reasoning.classifier_unavailable",
                    conversation_id = %request.conversation_id(),
                    request_id = %request.request_id(),
                    model = self.llm.model_id(),
                    error = %error,
                    "classifier unavailable; falling back to keyword rules"
                );
                rule_intent(request, analysis, self.config.fallback_confidence_cap, true)
            }
        }
    }

    fn decide(&self, intent: &Intent, context: &Context, memory: &MemorySnapshot) -> Decision {
        if intent.degraded {
            return Decision::new(
                DecisionType::DirectResponse,
                "degraded mode: classifier unavailable, answering directly with rule-based intent",
                vec![],
                intent.confidence,
            );
        }
        decide_by_rules(intent, &available_tools(context, memory), self.config.clarification_threshold)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use cerebro_core::config::{ReasoningConfig, ReasoningMode};
    use cerebro_core::domain::context::{Context, UserProfile, TOOLS_AVAILABLE_KEY};
    use cerebro_core::domain::decision::DecisionType;
    use cerebro_core::domain::intent::{Entity, Intent, IntentType};
    use cerebro_core::domain::memory::MemorySnapshot;
    use cerebro_core::domain::request::{ConversationId, Request, UserId};
    use cerebro_core::domain::response::TokenUsage;
    use serde_json::json;

    use super::{decide_by_rules, ModelBackedReasoner, ReasoningEngine, RuleBasedReasoner};
    use crate::llm::{Classification, Generation, LlmClient};

    fn config() -> ReasoningConfig {
        ReasoningConfig {
            mode: ReasoningMode::Rules,
            clarification_threshold: 0.5,
            fallback_confidence_cap: 0.5,
        }
    }

    fn context(tools: &[&str]) -> Context {
        let user_id = UserId("u-1".to_string());
        let context =
            Context::new(ConversationId("c1".to_string()), user_id.clone(), UserProfile::minimal(user_id));
        context.technical().insert(TOOLS_AVAILABLE_KEY, json!(tools));
        context
    }

    fn intent(intent_type: IntentType, confidence: f64, capabilities: &[&str]) -> Intent {
        Intent {
            id: "i-1".to_string(),
            intent_type,
            domain: "general".to_string(),
            confidence,
            entities: capabilities
                .iter()
                .enumerate()
                .map(|(index, tool)| Entity {
                    id: format!("ent_{index}"),
                    entity_type: "capability".to_string(),
                    value: tool.to_string(),
                    confidence: 0.6,
                })
                .collect(),
            classifier: "test".to_string(),
            degraded: false,
        }
    }

    struct OfflineClassifier;

    #[async_trait]
    impl LlmClient for OfflineClassifier {
        fn model_id(&self) -> &str {
            "offline"
        }

        async fn classify(&self, _text: &str, _context: &Context) -> Result<Classification> {
            Err(anyhow!("connection refused"))
        }

        async fn generate(&self, prompt: &str, _context: &Context) -> Result<Generation> {
            Ok(Generation {
                text: prompt.to_string(),
                usage: TokenUsage::default(),
                model: "offline".to_string(),
            })
        }
    }

    struct HangingClassifier;

    #[async_trait]
    impl LlmClient for HangingClassifier {
        fn model_id(&self) -> &str {
            "hanging"
        }

        async fn classify(&self, _text: &str, _context: &Context) -> Result<Classification> {
            std::future::pending().await
        }

        async fn generate(&self, _prompt: &str, _context: &Context) -> Result<Generation> {
            std::future::pending().await
        }
    }

    struct PanickingClassifier;

    #[async_trait]
    impl LlmClient for PanickingClassifier {
        fn model_id(&self) -> &str {
            "panicking"
        }

        async fn classify(&self, _text: &str, _context: &Context) -> Result<Classification> {
            panic!("classifier exploded")
        }

        async fn generate(&self, _prompt: &str, _context: &Context) -> Result<Generation> {
            panic!("generator exploded")
        }
    }

    struct ConfidentClassifier;

    #[async_trait]
    impl LlmClient for ConfidentClassifier {
        fn model_id(&self) -> &str {
            "confident"
        }

        async fn classify(&self, _text: &str, _context: &Context) -> Result<Classification> {
            Ok(Classification {
                intent_type: IntentType::Analytical,
                domain: None,
                confidence: 0.9,
                model: "confident".to_string(),
            })
        }

        async fn generate(&self, prompt: &str, _context: &Context) -> Result<Generation> {
            Ok(Generation {
                text: prompt.to_string(),
                usage: TokenUsage::default(),
                model: "confident".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn balance_question_is_informational_direct_response() {
        let reasoner = RuleBasedReasoner::new(config());
        let request = Request::builder("c1", "what is my balance?").build();
        let context = context(&[]);
        let memory = MemorySnapshot::empty();

        let intent = reasoner.analyze(&request, &context, &memory).await;
        let decision = reasoner.decide(&intent, &context, &memory);

        assert_eq!(intent.intent_type, IntentType::Informational);
        assert_eq!(intent.confidence, 0.5);
        assert_eq!(intent.classifier, "rules-v1");
        assert_eq!(decision.decision_type, DecisionType::DirectResponse);
    }

    #[tokio::test]
    async fn create_ticket_with_tool_is_tool_execution() {
        let reasoner = RuleBasedReasoner::new(config());
        let request = Request::builder("c1", "create a new ticket").build();
        let context = context(&["ticket-tool"]);
        let memory = MemorySnapshot::empty();

        let intent = reasoner.analyze(&request, &context, &memory).await;
        let decision = reasoner.decide(&intent, &context, &memory);

        assert_eq!(decision.decision_type, DecisionType::ToolExecution);
        assert_eq!(decision.actions, vec!["ticket-tool"]);
    }

    #[tokio::test]
    async fn analysis_is_deterministic_for_identical_inputs() {
        let reasoner = RuleBasedReasoner::new(config());
        let request = Request::builder("c1", "compare the sales trend").request_id("r-1").build();
        let context = context(&[]);
        let memory = MemorySnapshot::empty();

        let first = reasoner.analyze(&request, &context, &memory).await;
        let second = reasoner.analyze(&request, &context, &memory).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn remembered_procedural_tool_is_available() {
        let reasoner = RuleBasedReasoner::new(config());
        let request = Request::builder("c1", "book a meeting tomorrow").build();
        let context = context(&[]);
        let mut memory = MemorySnapshot::empty();
        memory.procedural.insert("tool.meeting-scheduler".to_string(), json!({}));

        let intent = reasoner.analyze(&request, &context, &memory).await;
        let decision = reasoner.decide(&intent, &context, &memory);

        assert_eq!(decision.decision_type, DecisionType::ToolExecution);
        assert_eq!(decision.actions, vec!["meeting-scheduler"]);
    }

    #[test]
    fn low_confidence_needs_clarification_regardless_of_message() {
        for intent_type in IntentType::ALL {
            let decision =
                decide_by_rules(&intent(intent_type, 0.2, &["ticket-tool"]), &["ticket-tool".to_string()], 0.5);
            assert_eq!(decision.decision_type, DecisionType::ClarificationNeeded);
            assert!(decision.actions.is_empty());
        }
    }

    #[test]
    fn multi_tool_and_analytical_requests_become_plans() {
        let tools = vec!["news-tool".to_string(), "weather-tool".to_string()];

        let multi = decide_by_rules(
            &intent(IntentType::Transactional, 0.8, &["weather-tool", "news-tool"]),
            &tools,
            0.5,
        );
        assert_eq!(multi.decision_type, DecisionType::MultiStepPlan);
        assert_eq!(multi.actions, vec!["news-tool", "weather-tool"]);

        let analytical = decide_by_rules(&intent(IntentType::Analytical, 0.8, &["news-tool"]), &tools, 0.5);
        assert_eq!(analytical.decision_type, DecisionType::MultiStepPlan);
        assert_eq!(analytical.actions, vec!["news-tool", "summarize"]);
    }

    #[test]
    fn unavailable_capability_falls_back_to_direct_response() {
        let decision = decide_by_rules(&intent(IntentType::Transactional, 0.8, &["ticket-tool"]), &[], 0.5);
        assert_eq!(decision.decision_type, DecisionType::DirectResponse);
        assert!(decision.actions.is_empty());
    }

    #[tokio::test]
    async fn model_reasoner_uses_classification() {
        let reasoner = ModelBackedReasoner::new(Arc::new(ConfidentClassifier), config());
        let request = Request::builder("c1", "whatever").build();

        let intent = reasoner.analyze(&request, &context(&[]), &MemorySnapshot::empty()).await;

        assert_eq!(intent.intent_type, IntentType::Analytical);
        assert_eq!(intent.confidence, 0.9);
        assert_eq!(intent.classifier, "model:confident");
        assert!(!intent.degraded);
    }

    #[tokio::test]
    async fn offline_classifier_degrades_to_rules_and_direct_response() {
        let reasoner = ModelBackedReasoner::new(Arc::new(OfflineClassifier), config());
        let request = Request::builder("c1", "create a new ticket").build();
        let context = context(&["ticket-tool"]);
        let memory = MemorySnapshot::empty();

        let intent = reasoner.analyze(&request, &context, &memory).await;
        let decision = reasoner.decide(&intent, &context, &memory);

        assert!(intent.degraded);
        assert!(intent.confidence <= 0.5);
        assert_eq!(intent.classifier, "rules-v1");
        assert_eq!(decision.decision_type, DecisionType::DirectResponse);
        assert!(decision.reasoning.contains("degraded mode"));
    }

    #[tokio::test]
    async fn hanging_classifier_times_out_to_rules() {
        let reasoner = ModelBackedReasoner::new(Arc::new(HangingClassifier), config())
            .with_classify_timeout(Duration::from_millis(20));
        let request = Request::builder("c1", "create a new ticket").build();
        let context = context(&["ticket-tool"]);

        let intent = tokio::time::timeout(
            Duration::from_secs(2),
            reasoner.analyze(&request, &context, &MemorySnapshot::empty()),
        )
        .await
        .expect("classification should be bounded");

        assert!(intent.degraded);
        assert_eq!(intent.classifier, "rules-v1");
    }

    #[tokio::test]
    async fn panicking_classifier_degrades_to_rules() {
        let reasoner = ModelBackedReasoner::new(Arc::new(PanickingClassifier), config());
        let request = Request::builder("c1", "what is my balance?").build();

        let intent = reasoner.analyze(&request, &context(&[]), &MemorySnapshot::empty()).await;

        assert!(intent.degraded);
        assert_eq!(intent.intent_type, IntentType::Informational);
    }
}
