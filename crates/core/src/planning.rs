//! Plan construction and validation.
//!
//! Turns a [`Decision`] into an [`ExecutionPlan`] whose strategy is fixed by the decision type.
//! Plans are validated before they leave the planner and again by the execution engine.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::PlanningConfig;
use crate::domain::context::{Context, MESSAGE_KEY};
use crate::domain::decision::{Decision, DecisionType};
use crate::domain::intent::Intent;
use crate::domain::plan::{ExecutionPlan, ExecutionStep, PlanStrategy, StepType};

/// Prefix used by step parameters that consume the output of an earlier step.
pub const STEP_OUTPUT_REF_PREFIX: &str = "$step_";

pub const SUMMARIZE_ACTION: &str = "summarize";
pub const MERGE_ACTION: &str = "merge";
pub const LLM_ACTION_PREFIX: &str = "llm:";
pub const DECIDE_ACTION_PREFIX: &str = "decide:";

pub const CLARIFICATION_QUESTION: &str =
    "I am not sure what you need yet. Could you rephrase or add a little more detail?";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("execution plan has no steps")]
    EmptyPlan,
    #[error("plan strategy {strategy:?} is inconsistent with its steps: {reason}")]
    StrategyMismatch { strategy: PlanStrategy, reason: String },
    #[error("decision {decision_type:?} requires at least one action")]
    EmptyActions { decision_type: DecisionType },
    #[error("sequential step orders must be contiguous from 1: expected {expected}, found {found}")]
    NonContiguousOrder { expected: u32, found: u32 },
    #[error("tool step `{step_id}` has no tool name")]
    MissingToolName { step_id: String },
    #[error("non-tool step `{step_id}` names tool `{tool_name}`")]
    UnexpectedToolName { step_id: String, tool_name: String },
}

pub trait PlanningEngine: Send + Sync {
    fn plan(
        &self,
        intent: &Intent,
        decision: &Decision,
        context: &Context,
    ) -> Result<ExecutionPlan, PlanningError>;
}

/// Maps decision types onto plan strategies without looking at the actions.
///
/// `MULTI_STEP_PLAN` reports `SEQUENTIAL` here; the planner upgrades it to `PARALLEL` once it
/// has seen that the steps are independent.
pub fn strategy_for(decision_type: DecisionType) -> PlanStrategy {
    match decision_type {
        DecisionType::DirectResponse | DecisionType::ClarificationNeeded => PlanStrategy::Direct,
        DecisionType::ToolExecution => PlanStrategy::SingleTool,
        DecisionType::MultiStepPlan => PlanStrategy::Sequential,
    }
}

pub fn step_weight(step_type: StepType) -> f64 {
    match step_type {
        StepType::ToolExecution => 3.0,
        StepType::LlmCall => 2.5,
        StepType::Decision => 1.5,
        StepType::DataTransform => 1.0,
    }
}

pub fn estimate_complexity(steps: &[ExecutionStep]) -> f64 {
    steps.iter().map(|step| step_weight(step.step_type)).sum()
}

/// Checks structural rules every executable plan must satisfy.
pub fn validate_plan(plan: &ExecutionPlan) -> Result<(), PlanningError> {
    if plan.steps.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }

    if plan.strategy.is_single_step() && plan.steps.len() != 1 {
        return Err(PlanningError::StrategyMismatch {
            strategy: plan.strategy,
            reason: format!("expected exactly one step, found {}", plan.steps.len()),
        });
    }

    if plan.strategy == PlanStrategy::SingleTool
        && plan.steps.iter().any(|step| step.step_type != StepType::ToolExecution)
    {
        return Err(PlanningError::StrategyMismatch {
            strategy: plan.strategy,
            reason: "single tool plans must run a tool step".to_string(),
        });
    }

    for step in &plan.steps {
        match (step.step_type, step.tool_name.as_deref()) {
            (StepType::ToolExecution, None) => {
                return Err(PlanningError::MissingToolName { step_id: step.id.clone() });
            }
            (StepType::ToolExecution, Some(name)) if name.trim().is_empty() => {
                return Err(PlanningError::MissingToolName { step_id: step.id.clone() });
            }
            (StepType::ToolExecution, Some(_)) => {}
            (_, Some(name)) => {
                return Err(PlanningError::UnexpectedToolName {
                    step_id: step.id.clone(),
                    tool_name: name.to_string(),
                });
            }
            (_, None) => {}
        }
    }

    if plan.strategy == PlanStrategy::Sequential {
        for (index, step) in plan.ordered_steps().into_iter().enumerate() {
            let expected = index as u32 + 1;
            if step.order != expected {
                return Err(PlanningError::NonContiguousOrder { expected, found: step.order });
            }
        }
    }

    Ok(())
}

/// True when the step reads the output of some other step.
pub fn references_prior_output(step: &ExecutionStep) -> bool {
    step.step_type == StepType::DataTransform
        || step.parameters.values().any(|value| match value {
            Value::String(text) => text.starts_with(STEP_OUTPUT_REF_PREFIX),
            _ => false,
        })
}

#[derive(Clone, Debug)]
pub struct DeterministicPlanner {
    config: PlanningConfig,
}

impl Default for DeterministicPlanner {
    fn default() -> Self {
        Self::new(PlanningConfig { allow_parallel: true })
    }
}

impl DeterministicPlanner {
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }

    fn direct_step(&self, intent: &Intent, decision: &Decision, context: &Context) -> ExecutionStep {
        let message = context.environment().get(MESSAGE_KEY).unwrap_or(Value::Null);
        ExecutionStep::new(1, StepType::LlmCall, "answer the user directly")
            .with_parameter("message", message)
            .with_parameter("intent_type", json!(intent.intent_type.as_str()))
            .with_parameter("domain", json!(intent.domain))
            .with_parameter("reasoning", json!(decision.reasoning))
    }

    fn clarification_step(&self, intent: &Intent) -> ExecutionStep {
        ExecutionStep::new(1, StepType::Decision, "ask the user to clarify")
            .with_parameter("question", json!(CLARIFICATION_QUESTION))
            .with_parameter("intent_type", json!(intent.intent_type.as_str()))
            .with_parameter("confidence", json!(intent.confidence))
    }

    fn tool_step(&self, order: u32, tool_name: &str, intent: &Intent, context: &Context) -> ExecutionStep {
        let entities = intent
            .entities
            .iter()
            .map(|entity| json!({ "type": entity.entity_type, "value": entity.value }))
            .collect::<Vec<_>>();
        let message = context.environment().get(MESSAGE_KEY).unwrap_or(Value::Null);

        ExecutionStep::tool(order, tool_name, format!("invoke tool `{tool_name}`"))
            .with_parameter("message", message)
            .with_parameter("intent_type", json!(intent.intent_type.as_str()))
            .with_parameter("entities", Value::Array(entities))
    }

    fn action_step(&self, order: u32, action: &str, intent: &Intent, context: &Context) -> ExecutionStep {
        let trimmed = action.trim();

        if trimmed.eq_ignore_ascii_case(SUMMARIZE_ACTION) || trimmed.eq_ignore_ascii_case(MERGE_ACTION)
        {
            return ExecutionStep::new(order, StepType::DataTransform, format!("{trimmed} prior outputs"))
                .with_parameter("operation", json!(trimmed.to_ascii_lowercase()));
        }

        if let Some(prompt) = trimmed.strip_prefix(LLM_ACTION_PREFIX) {
            return ExecutionStep::new(order, StepType::LlmCall, "generate intermediate text")
                .with_parameter("prompt", json!(prompt.trim()))
                .with_parameter("intent_type", json!(intent.intent_type.as_str()));
        }

        if let Some(question) = trimmed.strip_prefix(DECIDE_ACTION_PREFIX) {
            return ExecutionStep::new(order, StepType::Decision, "resolve a branch point")
                .with_parameter("question", json!(question.trim()));
        }

        self.tool_step(order, trimmed, intent, context)
    }

    fn multi_step_plan(
        &self,
        intent: &Intent,
        decision: &Decision,
        context: &Context,
    ) -> Result<(PlanStrategy, Vec<ExecutionStep>), PlanningError> {
        if decision.actions.is_empty() {
            return Err(PlanningError::EmptyActions { decision_type: decision.decision_type });
        }

        let steps = decision
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| self.action_step(index as u32 + 1, action, intent, context))
            .collect::<Vec<_>>();

        let independent = steps.iter().all(|step| {
            step.step_type == StepType::ToolExecution && !references_prior_output(step)
        });
        let strategy = if independent && self.config.allow_parallel && steps.len() > 1 {
            PlanStrategy::Parallel
        } else {
            PlanStrategy::Sequential
        };

        Ok((strategy, steps))
    }
}

impl PlanningEngine for DeterministicPlanner {
    fn plan(
        &self,
        intent: &Intent,
        decision: &Decision,
        context: &Context,
    ) -> Result<ExecutionPlan, PlanningError> {
        let (strategy, steps) = match decision.decision_type {
            DecisionType::DirectResponse => {
                (PlanStrategy::Direct, vec![self.direct_step(intent, decision, context)])
            }
            DecisionType::ClarificationNeeded => {
                (PlanStrategy::Direct, vec![self.clarification_step(intent)])
            }
            DecisionType::ToolExecution => {
                let tool_name = decision.actions.first().ok_or(PlanningError::EmptyActions {
                    decision_type: decision.decision_type,
                })?;
                if decision.actions.len() > 1 {
                    debug!(
                        event_name = "core.planning.extra_actions_ignored",
                        decision_id = %decision.id,
                        ignored = decision.actions.len() - 1,
                        "single tool decision carried extra actions"
                    );
                }
                (PlanStrategy::SingleTool, vec![self.tool_step(1, tool_name, intent, context)])
            }
            DecisionType::MultiStepPlan => self.multi_step_plan(intent, decision, context)?,
        };

        let plan = ExecutionPlan {
            id: Uuid::new_v4().to_string(),
            strategy,
            estimated_complexity: estimate_complexity(&steps),
            steps,
        };
        validate_plan(&plan)?;

        debug!(
            event_name = "core.planning.plan_built",
            plan_id = %plan.id,
            strategy = plan.strategy.as_str(),
            step_count = plan.steps.len(),
            estimated_complexity = plan.estimated_complexity,
            "execution plan built"
        );

        Ok(plan)
    }
}
