//! Request orchestration.
//!
//! [`AgentRuntime::process`] drives one request through a fixed pipeline: context, memory
//! retrieval, analysis, decision (plus guardrails), planning, execution, response assembly and
//! memory persistence. Every stage failure is turned into a degraded [`Response`] in exactly one
//! place, so callers always receive an answer.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cerebro_core::config::{AppConfig, ReasoningMode};
use cerebro_core::domain::context::Context;
use cerebro_core::domain::decision::{Decision, DecisionType};
use cerebro_core::domain::execution::{ExecutionResult, ExecutionState};
use cerebro_core::domain::intent::{clamp_confidence, Intent};
use cerebro_core::domain::memory::MemorySnapshot;
use cerebro_core::domain::plan::{ExecutionPlan, StepType};
use cerebro_core::domain::request::Request;
use cerebro_core::domain::response::{ReasoningTrace, Response, ResponseMetadata, TokenUsage};
use cerebro_core::errors::{PipelineError, PipelineStage};
use cerebro_core::execution_engine::ExecutionEngine;
use cerebro_core::planning::{DeterministicPlanner, PlanningEngine};
use futures::FutureExt;
use serde_json::json;
use tracing::{error, info, warn};

use crate::context::{ContextBuilder, ProfileLookup};
use crate::guardrails::{DecisionGuardrails, GuardrailDecision};
use crate::llm::{EchoLlmClient, LlmClient};
use crate::memory::{InMemoryMemoryStore, MemoryManager, MemoryStore};
use crate::reasoning::{available_tools, ModelBackedReasoner, ReasoningEngine, RuleBasedReasoner};
use crate::step_runner::AgentStepRunner;
use crate::tools::ToolRegistry;

pub const DEGRADED_PATH_PREFIX: &str = "degraded";
/// Fallback when a successful plan produced no text.
const EMPTY_OUTPUT_CONTENT: &str = "I processed your request but have nothing further to add.";
/// Working messages kept verbatim by the default in-memory store when consolidating.
const DEFAULT_KEEP_RECENT: usize = 10;

/// Stable per-request response id, so a retried request maps onto the same memory updates.
pub fn response_id_for(request: &Request) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.conversation_id().0.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.request_id().0.as_bytes());
    format!("resp_{}", &hasher.finalize().to_hex()[..24])
}

pub struct AgentRuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: ToolRegistry,
    profiles: Option<Arc<dyn ProfileLookup>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    reasoner: Option<Arc<dyn ReasoningEngine>>,
}

impl AgentRuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: ToolRegistry::new(),
            profiles: None,
            memory_store: None,
            reasoner: None,
        }
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileLookup>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    /// Overrides the reasoner otherwise chosen from `reasoning.mode`.
    pub fn reasoner(mut self, reasoner: Arc<dyn ReasoningEngine>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn build(self) -> AgentRuntime {
        let config = self.config;
        let llm: Arc<dyn LlmClient> = match self.llm {
            Some(llm) => llm,
            None => Arc::new(EchoLlmClient::new(config.llm.model.clone())),
        };
        let store: Arc<dyn MemoryStore> = match self.memory_store {
            Some(store) => store,
            None => Arc::new(InMemoryMemoryStore::new(DEFAULT_KEEP_RECENT, config.memory.embedding_dims)),
        };
        let reasoner: Arc<dyn ReasoningEngine> = match (self.reasoner, config.reasoning.mode) {
            (Some(reasoner), _) => reasoner,
            (None, ReasoningMode::Rules) => Arc::new(RuleBasedReasoner::new(config.reasoning.clone())),
            (None, ReasoningMode::Model) => Arc::new(
                ModelBackedReasoner::new(Arc::clone(&llm), config.reasoning.clone())
                    .with_classify_timeout(Duration::from_secs(config.llm.timeout_secs)),
            ),
        };
        let context_builder = ContextBuilder::new(self.profiles, self.tools.names())
            .with_profile_timeout(Duration::from_millis(config.memory.retrieval_timeout_ms));

        AgentRuntime {
            context_builder,
            memory: MemoryManager::new(store, config.memory.clone()),
            guardrails: DecisionGuardrails::new(config.reasoning.clarification_threshold),
            planner: DeterministicPlanner::new(config.planning.clone()),
            tools: self.tools,
            llm,
            reasoner,
            config,
        }
    }
}

pub struct AgentRuntime {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    context_builder: ContextBuilder,
    memory: MemoryManager,
    reasoner: Arc<dyn ReasoningEngine>,
    guardrails: DecisionGuardrails,
    planner: DeterministicPlanner,
}

/// Everything the pipeline learned about a request before building the response.
struct PipelineOutcome {
    intent: Intent,
    decision: Decision,
    guardrail: GuardrailDecision,
    plan: ExecutionPlan,
    execution: ExecutionResult,
    memory: MemorySnapshot,
    usage: TokenUsage,
    model: Option<String>,
}

impl AgentRuntime {
    pub fn builder(config: AppConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn reasoner_name(&self) -> &'static str {
        self.reasoner.name()
    }

    pub async fn process(&self, request: Request) -> Response {
        self.run(request, None).await
    }

    /// Like [`Self::process`], bounding the whole pipeline by `deadline`.
    pub async fn process_with_deadline(&self, request: Request, deadline: Duration) -> Response {
        self.run(request, Some(deadline)).await
    }

    async fn run(&self, request: Request, deadline: Option<Duration>) -> Response {
        let started = Instant::now();
        let deadline = deadline.map(|budget| tokio::time::Instant::now() + budget);
        let response_id = response_id_for(&request);

        info!(
            event_name = "agent.pipeline.started",
            conversation_id = %request.conversation_id(),
            request_id = %request.request_id(),
            reasoner = self.reasoner.name(),
            "processing request"
        );

        let context = match guard_stage(
            PipelineStage::Context,
            "profile_lookup",
            deadline,
            self.context_builder.build_context(&request),
        )
        .await
        {
            Ok(context) => context,
            Err(error) => return self.degraded_response(&request, response_id, &error, started),
        };
        let outcome = match self.execute_pipeline(&request, &context, deadline).await {
            Ok(outcome) => outcome,
            Err(error) => return self.degraded_response(&request, response_id, &error, started),
        };

        let degraded = outcome.intent.degraded;
        let mut response = self.assemble_response(&request, response_id, &outcome, started);

        if degraded {
            info!(
                event_name = "agent.pipeline.completed_degraded",
                conversation_id = %request.conversation_id(),
                request_id = %request.request_id(),
                latency_ms = response.metadata.latency_ms,
                "request answered in degraded mode; memory left untouched"
            );
            return response;
        }

        response.memory_updates = self.memory.prepare_updates(&request, &response, &context);
        let stored = guard_stage(
            PipelineStage::Memory,
            "memory_store",
            deadline,
            self.memory.store(&request, &response, &context),
        )
        .await
        .and_then(|stored| {
            stored.map_err(|error| PipelineError::CollaboratorUnavailable {
                stage: PipelineStage::Memory,
                collaborator: "memory_store".to_string(),
                message: error.to_string(),
            })
        });
        if let Err(error) = stored {
            warn!(
                event_name = "agent.pipeline.memory_store_failed",
                conversation_id = %request.conversation_id(),
                request_id = %request.request_id(),
                error = %error,
                "memory store failed after a successful response"
            );
        }
        if self.memory.should_consolidate(&outcome.memory) {
            drop(self.memory.consolidate(request.conversation_id()));
        }

        info!(
            event_name = "agent.pipeline.completed",
            conversation_id = %request.conversation_id(),
            request_id = %request.request_id(),
            execution_path = %response.metadata.execution_path,
            confidence = response.confidence,
            latency_ms = response.metadata.latency_ms,
            "request processed"
        );
        response
    }

    async fn execute_pipeline(
        &self,
        request: &Request,
        context: &Context,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<PipelineOutcome, PipelineError> {
        if request.message().trim().is_empty() {
            return Err(PipelineError::Validation {
                stage: PipelineStage::Context,
                message: "request message must not be empty".to_string(),
            });
        }

        let memory = guard_stage(
            PipelineStage::Memory,
            "memory_store",
            deadline,
            self.memory.retrieve(request.conversation_id(), context),
        )
        .await?;

        let intent = guard_stage(
            PipelineStage::Reasoning,
            "reasoner",
            deadline,
            self.reasoner.analyze(request, context, &memory),
        )
        .await?;
        record_intent(context, &intent);

        let tools = available_tools(context, &memory);
        let proposed = self.reasoner.decide(&intent, context, &memory);
        let (decision, guardrail) = self.guardrails.enforce(proposed, &intent, &tools);
        if let Some(reason_code) = guardrail.reason_code() {
            warn!(
                event_name = "agent.pipeline.guardrail_degraded",
                conversation_id = %request.conversation_id(),
                request_id = %request.request_id(),
                reason_code,
                decision_type = decision.decision_type.as_str(),
                "decision rewritten by guardrail"
            );
        }

        let plan = self.planner.plan(&intent, &decision, context)?;

        let runner = AgentStepRunner::new(
            Arc::clone(&self.llm),
            self.tools.clone(),
            self.config.execution.tool_timeout_ms,
        );
        let engine = ExecutionEngine::new(runner, self.config.execution.clone());
        let remaining =
            deadline.map(|deadline| deadline.saturating_duration_since(tokio::time::Instant::now()));
        let mut execution = engine.execute_with_deadline(&plan, context, remaining).await?;

        if execution.state == ExecutionState::Failed {
            let failed = execution.step_results.iter().find(|result| !result.success);
            return Err(PipelineError::StepExecution {
                step_id: failed.map(|result| result.step_id.clone()).unwrap_or_default(),
                message: execution
                    .error
                    .take()
                    .unwrap_or_else(|| "execution failed without a step error".to_string()),
            });
        }

        let usage = engine.runner().token_usage();
        let model = engine.runner().model();

        Ok(PipelineOutcome { intent, decision, guardrail, plan, execution, memory, usage, model })
    }

    fn assemble_response(
        &self,
        request: &Request,
        response_id: String,
        outcome: &PipelineOutcome,
        started: Instant,
    ) -> Response {
        let PipelineOutcome { intent, decision, guardrail, plan, execution, memory, usage, model } =
            outcome;

        let executed_tools = executed_tools(plan, execution);
        let content = if execution.final_output.trim().is_empty() {
            EMPTY_OUTPUT_CONTENT.to_string()
        } else {
            execution.final_output.clone()
        };

        let (confidence, execution_path) = if intent.degraded {
            (0.0, format!("{DEGRADED_PATH_PREFIX}:{}", PipelineStage::Reasoning))
        } else {
            let path = match decision.decision_type {
                DecisionType::ClarificationNeeded => "clarification".to_string(),
                _ => plan.strategy.as_str().to_string(),
            };
            let confidence = intent.confidence.min(decision.confidence) * execution.success_ratio();
            (clamp_confidence(confidence), path)
        };

        let mut reasoning = ReasoningTrace {
            steps: Vec::new(),
            justification: decision.reasoning.clone(),
        };
        if !memory.degraded_tiers.is_empty() {
            let tiers = memory.degraded_tiers.iter().map(|tier| tier.as_str()).collect::<Vec<_>>();
            reasoning.push(format!("memory tiers unavailable: {}", tiers.join(", ")));
        }
        reasoning.push(format!(
            "intent {} in domain {} at confidence {:.2} via {}",
            intent.intent_type.as_str(),
            intent.domain,
            intent.confidence,
            intent.classifier
        ));
        reasoning.push(format!(
            "decision {} with actions [{}]",
            decision.decision_type.as_str(),
            decision.actions.join(", ")
        ));
        if let Some(reason_code) = guardrail.reason_code() {
            reasoning.push(format!("guardrail rewrote the decision: {reason_code}"));
        }
        reasoning.push(format!("plan {} with {} step(s)", plan.strategy.as_str(), plan.steps.len()));
        reasoning.push(format!(
            "execution {} ({}/{} steps succeeded)",
            execution.state.as_str(),
            execution.succeeded_steps(),
            execution.step_results.len()
        ));

        Response {
            conversation_id: request.conversation_id().clone(),
            response_id,
            content,
            confidence,
            reasoning,
            executed_tools,
            memory_updates: Vec::new(),
            decision: Some(decision.clone()),
            metadata: ResponseMetadata {
                token_usage: usage.clone(),
                latency_ms: elapsed_ms(started),
                model: model.clone().unwrap_or_else(|| self.model_label(intent)),
                execution_path,
            },
        }
    }

    fn degraded_response(
        &self,
        request: &Request,
        response_id: String,
        error: &PipelineError,
        started: Instant,
    ) -> Response {
        let stage = error.stage();
        if error.is_fatal() {
            error!(
                event_name = "agent.pipeline.invariant_violation",
                conversation_id = %request.conversation_id(),
                request_id = %request.request_id(),
                stage = stage.as_str(),
                error_kind = error.kind().as_str(),
                error = %error,
                "pipeline invariant violated"
            );
        } else {
            warn!(
                event_name = "agent.pipeline.degraded",
                conversation_id = %request.conversation_id(),
                request_id = %request.request_id(),
                stage = stage.as_str(),
                error_kind = error.kind().as_str(),
                error = %error,
                "request answered with a degraded response"
            );
        }

        Response {
            conversation_id: request.conversation_id().clone(),
            response_id,
            content: error.user_message().to_string(),
            confidence: 0.0,
            reasoning: ReasoningTrace {
                steps: vec![format!("{stage} stage failed ({})", error.kind().as_str())],
                justification: error.user_message().to_string(),
            },
            executed_tools: Vec::new(),
            memory_updates: Vec::new(),
            decision: None,
            metadata: ResponseMetadata {
                latency_ms: elapsed_ms(started),
                model: self.llm.model_id().to_string(),
                execution_path: format!("{DEGRADED_PATH_PREFIX}:{stage}"),
                ..ResponseMetadata::default()
            },
        }
    }

    fn model_label(&self, intent: &Intent) -> String {
        match intent.classifier.strip_prefix("model:") {
            Some(model) => model.to_string(),
            None => self.llm.model_id().to_string(),
        }
    }
}

fn record_intent(context: &Context, intent: &Intent) {
    let domain = context.domain();
    domain.insert("intent.type", json!(intent.intent_type.as_str()));
    domain.insert("intent.domain", json!(intent.domain));

    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for entity in &intent.entities {
        grouped.entry(entity.entity_type.as_str()).or_default().push(entity.value.as_str());
    }
    for (entity_type, values) in grouped {
        domain.insert(format!("entity.{entity_type}"), json!(values));
    }
}

/// Tool names of successful tool steps, in step order.
fn executed_tools(plan: &ExecutionPlan, execution: &ExecutionResult) -> Vec<String> {
    plan.ordered_steps()
        .into_iter()
        .filter(|step| step.step_type == StepType::ToolExecution)
        .filter(|step| {
            execution
                .step_results
                .iter()
                .any(|result| result.step_id == step.id && result.success)
        })
        .filter_map(|step| step.tool_name.clone())
        .collect()
}

/// Awaits one collaborator call, bounded by the caller deadline. Panics and expiry become
/// [`PipelineError::CollaboratorUnavailable`] for `stage`.
async fn guard_stage<T>(
    stage: PipelineStage,
    collaborator: &str,
    deadline: Option<tokio::time::Instant>,
    call: impl Future<Output = T>,
) -> Result<T, PipelineError> {
    let unavailable = |message: String| PipelineError::CollaboratorUnavailable {
        stage,
        collaborator: collaborator.to_string(),
        message,
    };
    let guarded = AssertUnwindSafe(call).catch_unwind();
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, guarded)
            .await
            .map_err(|_| unavailable("caller deadline expired".to_string()))?,
        None => guarded.await,
    };
    outcome.map_err(|panic| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        unavailable(format!("panicked: {detail}"))
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
