//! Plan Execution Engine
//!
//! Runs the steps of a validated [`ExecutionPlan`] under its strategy and folds the step
//! outcomes into one [`ExecutionResult`]. Every plan walks the same state machine:
//! `PENDING -> RUNNING -> {SUCCEEDED | PARTIALLY_FAILED | FAILED}`.
//!
//! Steps themselves are delegated to a [`StepRunner`]. The engine owns the cross-cutting
//! concerns: ordering, bounded fan-out, per-step timeouts, the plan deadline, and panic
//! isolation.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionConfig, MergePolicy};
use crate::domain::context::Context;
use crate::domain::execution::{
    ExecutionResult, ExecutionState, ExecutionTransitionEvent, StepResult,
};
use crate::domain::plan::{ExecutionPlan, ExecutionStep, PlanStrategy, StepType};
use crate::planning::{validate_plan, PlanningError};

/// Errors that abort a plan before any step result can be produced.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("malformed execution plan: {0}")]
    MalformedPlan(#[from] PlanningError),
    #[error("invalid execution state transition from {from:?} to {to:?}")]
    InvalidTransition { from: ExecutionState, to: ExecutionState },
}

/// Step-level failures. These never abort the engine; they are recorded on the step result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),
    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("step panicked: {0}")]
    Panicked(String),
    #[error("plan deadline exceeded before step completed")]
    DeadlineExceeded,
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("skipped after critical step `{0}` failed")]
    Skipped(String),
}

/// Output of an earlier step, visible to later steps of a sequential plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorOutput {
    pub step_id: String,
    pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepInput {
    pub prior_outputs: Vec<PriorOutput>,
}

impl StepInput {
    pub fn last_output(&self) -> Option<&str> {
        self.prior_outputs.last().map(|prior| prior.output.as_str())
    }

    pub fn output_of(&self, step_id: &str) -> Option<&str> {
        self.prior_outputs
            .iter()
            .find(|prior| prior.step_id == step_id)
            .map(|prior| prior.output.as_str())
    }
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        step: &ExecutionStep,
        input: &StepInput,
        context: &Context,
    ) -> Result<String, StepError>;
}

/// Tracks the plan state and records every transition it makes.
#[derive(Debug)]
struct StateTracker {
    plan_id: String,
    state: ExecutionState,
    transitions: Vec<ExecutionTransitionEvent>,
}

impl StateTracker {
    fn new(plan_id: &str) -> Self {
        let transitions = vec![ExecutionTransitionEvent {
            plan_id: plan_id.to_string(),
            from_state: None,
            to_state: ExecutionState::Pending,
            transition_reason: "plan_accepted".to_string(),
            occurred_at: Utc::now(),
        }];
        Self { plan_id: plan_id.to_string(), state: ExecutionState::Pending, transitions }
    }

    fn transition(
        &mut self,
        to: ExecutionState,
        reason: impl Into<String>,
    ) -> Result<(), ExecutionError> {
        let allowed = match (self.state, to) {
            (ExecutionState::Pending, ExecutionState::Running) => true,
            (ExecutionState::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(ExecutionError::InvalidTransition { from: self.state, to });
        }

        self.transitions.push(ExecutionTransitionEvent {
            plan_id: self.plan_id.clone(),
            from_state: Some(self.state),
            to_state: to,
            transition_reason: reason.into(),
            occurred_at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionEngine<R> {
    runner: R,
    config: ExecutionConfig,
}

impl<R: StepRunner> ExecutionEngine<R> {
    pub fn new(runner: R, config: ExecutionConfig) -> Self {
        Self { runner, config }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        context: &Context,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute_with_deadline(plan, context, None).await
    }

    /// Execute with an optional caller deadline; the earlier of it and the plan deadline wins.
    pub async fn execute_with_deadline(
        &self,
        plan: &ExecutionPlan,
        context: &Context,
        caller_deadline: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutionError> {
        validate_plan(plan)?;

        let plan_budget = Duration::from_millis(self.config.plan_deadline_ms);
        let budget = caller_deadline.map_or(plan_budget, |caller| caller.min(plan_budget));
        let deadline = Instant::now() + budget;

        let mut tracker = StateTracker::new(&plan.id);
        tracker.transition(ExecutionState::Running, "execution_started")?;

        info!(
            event_name = "core.execution.started",
            plan_id = %plan.id,
            conversation_id = %context.conversation_id,
            strategy = plan.strategy.as_str(),
            step_count = plan.steps.len(),
            budget_ms = budget.as_millis() as u64,
            "plan execution started"
        );

        let step_results = match plan.strategy {
            PlanStrategy::Direct | PlanStrategy::SingleTool | PlanStrategy::Sequential => {
                self.run_sequential(plan, context, deadline).await
            }
            PlanStrategy::Parallel => self.run_parallel(plan, context, deadline).await,
        };

        let state = aggregate_state(&step_results);
        let final_output = match plan.strategy {
            PlanStrategy::Parallel => merge_outputs(&step_results, self.config.merge_policy),
            _ => last_successful_output(&step_results),
        };
        let error = summarize_failures(&step_results, state);

        tracker.transition(state, format!("execution_{}", state.as_str()))?;

        info!(
            event_name = "core.execution.finished",
            plan_id = %plan.id,
            conversation_id = %context.conversation_id,
            state = state.as_str(),
            succeeded = step_results.iter().filter(|result| result.success).count(),
            failed = step_results.iter().filter(|result| !result.success).count(),
            "plan execution finished"
        );

        Ok(ExecutionResult {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            success: state == ExecutionState::Succeeded,
            state,
            step_results,
            final_output,
            error,
            transitions: tracker.transitions,
        })
    }

    async fn run_sequential(
        &self,
        plan: &ExecutionPlan,
        context: &Context,
        deadline: Instant,
    ) -> Vec<StepResult> {
        let mut input = StepInput::default();
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut steps = plan.ordered_steps().into_iter();

        while let Some(step) = steps.next() {
            let (result, error) = self.run_guarded(step, &input, context, deadline).await;
            let deadline_hit = error == Some(StepError::DeadlineExceeded);
            let halt = !result.success && (step.critical || deadline_hit);

            if result.success {
                input.prior_outputs.push(PriorOutput {
                    step_id: result.step_id.clone(),
                    output: result.output.clone(),
                });
            }
            results.push(result);

            if deadline_hit {
                for skipped in steps.by_ref() {
                    results.push(failed_result(skipped, &StepError::DeadlineExceeded, 0));
                }
                break;
            }
            if halt {
                let cause = StepError::Skipped(step.id.clone());
                for skipped in steps.by_ref() {
                    results.push(failed_result(skipped, &cause, 0));
                }
                debug!(
                    event_name = "core.execution.halted",
                    plan_id = %plan.id,
                    step_id = %step.id,
                    "critical step failed; remaining steps skipped"
                );
                break;
            }
        }

        results
    }

    async fn run_parallel(
        &self,
        plan: &ExecutionPlan,
        context: &Context,
        deadline: Instant,
    ) -> Vec<StepResult> {
        let input = StepInput::default();
        let width = self.config.max_parallel_steps.max(1);

        let pending = plan
            .ordered_steps()
            .into_iter()
            .map(|step| self.run_guarded(step, &input, context, deadline))
            .collect::<Vec<_>>();

        let mut results = stream::iter(pending)
            .buffer_unordered(width)
            .map(|(result, _)| result)
            .collect::<Vec<_>>()
            .await;

        results.sort_by_key(|result| result.order);
        results
    }

    fn timeout_for(&self, step: &ExecutionStep) -> Duration {
        let default_ms = match step.step_type {
            StepType::ToolExecution => self.config.tool_timeout_ms,
            _ => self.config.step_timeout_ms,
        };
        Duration::from_millis(step.timeout_ms.unwrap_or(default_ms))
    }

    /// Runs one step bounded by its own timeout and the plan deadline, catching panics.
    async fn run_guarded(
        &self,
        step: &ExecutionStep,
        input: &StepInput,
        context: &Context,
        deadline: Instant,
    ) -> (StepResult, Option<StepError>) {
        let started = Instant::now();
        let step_timeout = self.timeout_for(step);
        let remaining = deadline.saturating_duration_since(started);

        let outcome = if remaining.is_zero() {
            Err(StepError::DeadlineExceeded)
        } else {
            let limit = step_timeout.min(remaining);
            let guarded =
                AssertUnwindSafe(self.runner.run_step(step, input, context)).catch_unwind();
            match tokio::time::timeout(limit, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(StepError::Panicked(panic_message(panic.as_ref()))),
                Err(_) if limit < step_timeout => Err(StepError::DeadlineExceeded),
                Err(_) => Err(StepError::Timeout { timeout_ms: step_timeout.as_millis() as u64 }),
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => (
                StepResult {
                    step_id: step.id.clone(),
                    order: step.order,
                    success: true,
                    output,
                    error: None,
                    elapsed_ms,
                },
                None,
            ),
            Err(error) => {
                warn!(
                    event_name = "core.execution.step_failed",
                    step_id = %step.id,
                    step_type = step.step_type.as_str(),
                    tool_name = step.tool_name.as_deref().unwrap_or(""),
                    critical = step.critical,
                    error = %error,
                    "execution step failed"
                );
                (failed_result(step, &error, elapsed_ms), Some(error))
            }
        }
    }
}

fn failed_result(step: &ExecutionStep, error: &StepError, elapsed_ms: u64) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        order: step.order,
        success: false,
        output: String::new(),
        error: Some(error.to_string()),
        elapsed_ms,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub fn aggregate_state(results: &[StepResult]) -> ExecutionState {
    let succeeded = results.iter().filter(|result| result.success).count();
    if results.is_empty() || succeeded == 0 {
        ExecutionState::Failed
    } else if succeeded == results.len() {
        ExecutionState::Succeeded
    } else {
        ExecutionState::PartiallyFailed
    }
}

fn last_successful_output(results: &[StepResult]) -> String {
    results
        .iter()
        .rev()
        .find(|result| result.success)
        .map(|result| result.output.clone())
        .unwrap_or_default()
}

/// Folds the outputs of successful parallel steps, visited in order-index order.
pub fn merge_outputs(results: &[StepResult], policy: MergePolicy) -> String {
    let mut successful = results.iter().filter(|result| result.success);
    match policy {
        MergePolicy::Concatenate => successful
            .map(|result| result.output.as_str())
            .filter(|output| !output.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        MergePolicy::FirstSuccess => {
            successful.next().map(|result| result.output.clone()).unwrap_or_default()
        }
        MergePolicy::Longest => successful
            .fold(None::<&StepResult>, |best, result| match best {
                Some(current) if current.output.len() >= result.output.len() => Some(current),
                _ => Some(result),
            })
            .map(|result| result.output.clone())
            .unwrap_or_default(),
    }
}

fn summarize_failures(results: &[StepResult], state: ExecutionState) -> Option<String> {
    match state {
        ExecutionState::Succeeded => None,
        ExecutionState::Failed => Some(
            results
                .iter()
                .find_map(|result| result.error.clone())
                .unwrap_or_else(|| "no step produced a result".to_string()),
        ),
        _ => {
            let failed = results.iter().filter(|result| !result.success).count();
            Some(format!("{failed} of {} steps failed", results.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{
        merge_outputs, ExecutionEngine, ExecutionError, StateTracker, StepError, StepInput,
        StepRunner,
    };
    use crate::config::{ExecutionConfig, MergePolicy};
    use crate::domain::context::{Context, UserProfile};
    use crate::domain::execution::{ExecutionState, StepResult};
    use crate::domain::plan::{ExecutionPlan, ExecutionStep, PlanStrategy, StepType};
    use crate::domain::request::{ConversationId, UserId};
    use crate::planning::PlanningError;

    #[derive(Clone)]
    enum Behavior {
        Echo(&'static str),
        Fail,
        Sleep(u64),
        Panic,
        EchoPrior,
    }

    #[derive(Clone, Default)]
    struct ScriptedRunner {
        behaviors: HashMap<String, Behavior>,
        calls: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl ScriptedRunner {
        fn with(mut self, step_id: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(step_id.to_string(), behavior);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(
            &self,
            step: &ExecutionStep,
            input: &StepInput,
            _context: &Context,
        ) -> Result<String, StepError> {
            self.calls.lock().expect("calls lock").push(step.id.clone());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let behavior = self.behaviors.get(&step.id).cloned().unwrap_or(Behavior::Echo("ok"));
            let outcome = match behavior {
                Behavior::Echo(text) => Ok(text.to_string()),
                Behavior::Fail => Err(StepError::Failed(format!("{} failed", step.id))),
                Behavior::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(format!("{} slept", step.id))
                }
                Behavior::Panic => panic!("boom in {}", step.id),
                Behavior::EchoPrior => Ok(format!("after:{}", input.last_output().unwrap_or(""))),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn context() -> Context {
        let user_id = UserId("u-1".to_string());
        Context::new(ConversationId("c-1".to_string()), user_id.clone(), UserProfile::minimal(user_id))
    }

    fn plan(strategy: PlanStrategy, steps: Vec<ExecutionStep>) -> ExecutionPlan {
        ExecutionPlan { id: "plan-1".to_string(), strategy, steps, estimated_complexity: 1.0 }
    }

    fn tools(count: u32) -> Vec<ExecutionStep> {
        (1..=count).map(|order| ExecutionStep::tool(order, format!("tool-{order}"), "run")).collect()
    }

    fn engine(runner: ScriptedRunner) -> ExecutionEngine<ScriptedRunner> {
        ExecutionEngine::new(runner, ExecutionConfig::default())
    }

    #[tokio::test]
    async fn direct_plan_succeeds_with_recorded_transitions() {
        let runner = ScriptedRunner::default().with("step_1", Behavior::Echo("hello"));
        let plan = plan(PlanStrategy::Direct, vec![ExecutionStep::new(1, StepType::LlmCall, "answer")]);

        let result = engine(runner).execute(&plan, &context()).await.expect("execute");

        assert!(result.success);
        assert_eq!(result.state, ExecutionState::Succeeded);
        assert_eq!(result.final_output, "hello");
        let states = result.transitions.iter().map(|event| event.to_state).collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![ExecutionState::Pending, ExecutionState::Running, ExecutionState::Succeeded]
        );
    }

    #[tokio::test]
    async fn sequential_runs_in_order_and_threads_outputs() {
        let runner = ScriptedRunner::default()
            .with("step_1", Behavior::Echo("first"))
            .with("step_2", Behavior::EchoPrior)
            .with("step_3", Behavior::EchoPrior);
        let mut steps = tools(3);
        steps.reverse();
        let plan = plan(PlanStrategy::Sequential, steps);

        let engine = engine(runner.clone());
        let result = engine.execute(&plan, &context()).await.expect("execute");

        assert_eq!(runner.calls(), vec!["step_1", "step_2", "step_3"]);
        let orders = result.step_results.iter().map(|step| step.order).collect::<Vec<_>>();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(result.final_output, "after:after:first");
    }

    #[tokio::test]
    async fn sequential_critical_failure_halts_remaining_steps() {
        let runner = ScriptedRunner::default().with("step_2", Behavior::Fail);
        let plan = plan(PlanStrategy::Sequential, tools(3));

        let result = engine(runner.clone()).execute(&plan, &context()).await.expect("execute");

        assert_eq!(runner.calls(), vec!["step_1", "step_2"]);
        assert_eq!(result.state, ExecutionState::PartiallyFailed);
        assert!(!result.success);
        assert_eq!(result.final_output, "ok");
        assert_eq!(result.step_results.len(), 3);
        assert!(!result.step_results[2].success);
        assert_eq!(
            result.step_results[2].error,
            Some(StepError::Skipped("step_2".to_string()).to_string())
        );
        assert_eq!(result.error.as_deref(), Some("2 of 3 steps failed"));
    }

    #[tokio::test]
    async fn sequential_first_step_failure_is_failed() {
        let runner = ScriptedRunner::default().with("step_1", Behavior::Fail);
        let plan = plan(PlanStrategy::Sequential, tools(2));

        let result = engine(runner).execute(&plan, &context()).await.expect("execute");

        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(result.error.as_deref(), Some("step_1 failed"));
    }

    #[tokio::test]
    async fn non_critical_failure_continues_and_ends_partially_failed() {
        let runner = ScriptedRunner::default().with("step_1", Behavior::Fail);
        let mut steps = tools(2);
        steps[0] = steps[0].clone().non_critical();
        let plan = plan(PlanStrategy::Sequential, steps);

        let result = engine(runner.clone()).execute(&plan, &context()).await.expect("execute");

        assert_eq!(runner.calls(), vec!["step_1", "step_2"]);
        assert_eq!(result.state, ExecutionState::PartiallyFailed);
    }

    #[tokio::test]
    async fn parallel_outcomes_follow_all_succeed_all_fail_mixed() {
        let all_ok = engine(ScriptedRunner::default())
            .execute(&plan(PlanStrategy::Parallel, tools(3)), &context())
            .await
            .expect("execute");
        assert!(all_ok.success);
        assert_eq!(all_ok.state, ExecutionState::Succeeded);

        let failing = ScriptedRunner::default()
            .with("step_1", Behavior::Fail)
            .with("step_2", Behavior::Fail)
            .with("step_3", Behavior::Fail);
        let all_fail = engine(failing)
            .execute(&plan(PlanStrategy::Parallel, tools(3)), &context())
            .await
            .expect("execute");
        assert!(!all_fail.success);
        assert_eq!(all_fail.state, ExecutionState::Failed);

        let mixed_runner = ScriptedRunner::default().with("step_2", Behavior::Fail);
        let mixed = engine(mixed_runner.clone())
            .execute(&plan(PlanStrategy::Parallel, tools(3)), &context())
            .await
            .expect("execute");
        assert_eq!(mixed.state, ExecutionState::PartiallyFailed);
        assert_eq!(mixed_runner.calls().len(), 3);
        let orders = mixed.step_results.iter().map(|step| step.order).collect::<Vec<_>>();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn parallel_fan_out_is_bounded() {
        let runner = (1..=6).fold(ScriptedRunner::default(), |runner, order| {
            runner.with(&format!("step_{order}"), Behavior::Sleep(20))
        });
        let config = ExecutionConfig { max_parallel_steps: 2, ..ExecutionConfig::default() };
        let engine = ExecutionEngine::new(runner.clone(), config);

        let result =
            engine.execute(&plan(PlanStrategy::Parallel, tools(6)), &context()).await.expect("execute");

        assert!(result.success);
        assert!(runner.max_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn step_timeout_becomes_step_failure() {
        let runner = ScriptedRunner::default().with("step_1", Behavior::Sleep(200));
        let step = ExecutionStep::tool(1, "slow", "slow").with_timeout_ms(10);

        let result = engine(runner)
            .execute(&plan(PlanStrategy::SingleTool, vec![step]), &context())
            .await
            .expect("execute");

        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(
            result.step_results[0].error,
            Some(StepError::Timeout { timeout_ms: 10 }.to_string())
        );
    }

    #[tokio::test]
    async fn caller_deadline_cancels_parallel_steps() {
        let runner = ScriptedRunner::default()
            .with("step_1", Behavior::Echo("fast"))
            .with("step_2", Behavior::Sleep(5_000));

        let result = engine(runner)
            .execute_with_deadline(
                &plan(PlanStrategy::Parallel, tools(2)),
                &context(),
                Some(Duration::from_millis(30)),
            )
            .await
            .expect("execute");

        assert_eq!(result.state, ExecutionState::PartiallyFailed);
        assert_eq!(
            result.step_results[1].error,
            Some(StepError::DeadlineExceeded.to_string())
        );
        assert_eq!(result.final_output, "fast");
    }

    #[tokio::test]
    async fn panicking_step_is_isolated() {
        let runner = ScriptedRunner::default().with("step_2", Behavior::Panic);

        let result = engine(runner)
            .execute(&plan(PlanStrategy::Parallel, tools(2)), &context())
            .await
            .expect("execute");

        assert_eq!(result.state, ExecutionState::PartiallyFailed);
        let error = result.step_results[1].error.clone().unwrap_or_default();
        assert!(error.contains("boom in step_2"));
    }

    #[tokio::test]
    async fn malformed_plan_is_rejected() {
        let error = engine(ScriptedRunner::default())
            .execute(&plan(PlanStrategy::Sequential, vec![]), &context())
            .await
            .unwrap_err();

        assert_eq!(error, ExecutionError::MalformedPlan(PlanningError::EmptyPlan));
    }

    #[test]
    fn state_tracker_rejects_skipping_running() {
        let mut tracker = StateTracker::new("plan-1");

        let error = tracker.transition(ExecutionState::Succeeded, "too early").unwrap_err();
        assert_eq!(
            error,
            ExecutionError::InvalidTransition {
                from: ExecutionState::Pending,
                to: ExecutionState::Succeeded,
            }
        );

        tracker.transition(ExecutionState::Running, "start").expect("start");
        tracker.transition(ExecutionState::Failed, "done").expect("finish");
        assert!(tracker.transition(ExecutionState::Running, "restart").is_err());
        assert_eq!(tracker.transitions.len(), 3);
    }

    #[test]
    fn merge_policies_fold_successful_outputs() {
        let result = |order: u32, success: bool, output: &str| StepResult {
            step_id: format!("step_{order}"),
            order,
            success,
            output: output.to_string(),
            error: None,
            elapsed_ms: 0,
        };
        let results = vec![result(1, true, "ab"), result(2, false, ""), result(3, true, "abcd")];

        assert_eq!(merge_outputs(&results, MergePolicy::Concatenate), "ab\nabcd");
        assert_eq!(merge_outputs(&results, MergePolicy::FirstSuccess), "ab");
        assert_eq!(merge_outputs(&results, MergePolicy::Longest), "abcd");
    }
}
