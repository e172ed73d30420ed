use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cerebro_core::domain::context::Context;
use cerebro_core::domain::plan::{ExecutionStep, StepType};
use cerebro_core::domain::response::TokenUsage;
use cerebro_core::execution_engine::{StepError, StepInput, StepRunner};
use cerebro_core::planning::{MERGE_ACTION, STEP_OUTPUT_REF_PREFIX, SUMMARIZE_ACTION};
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::LlmClient;
use crate::tools::{ToolError, ToolRegistry};

#[derive(Debug, Default)]
struct RunnerLedger {
    usage: TokenUsage,
    model: Option<String>,
}

/// Runs plan steps against the LLM and tool collaborators. One runner serves one request.
pub struct AgentStepRunner {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    tool_timeout: Duration,
    ledger: Mutex<RunnerLedger>,
}

impl AgentStepRunner {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, tool_timeout_ms: u64) -> Self {
        Self {
            llm,
            tools,
            tool_timeout: Duration::from_millis(tool_timeout_ms),
            ledger: Mutex::new(RunnerLedger::default()),
        }
    }

    /// Tokens consumed by every LLM step this runner executed.
    pub fn token_usage(&self) -> TokenUsage {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).usage.clone()
    }

    /// Model that served the most recent LLM step, if any ran.
    pub fn model(&self) -> Option<String> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).model.clone()
    }

    async fn run_llm_call(
        &self,
        step: &ExecutionStep,
        input: &StepInput,
        context: &Context,
    ) -> Result<String, StepError> {
        let prompt = build_prompt(step, input)?;
        let generation = self
            .llm
            .generate(&prompt, context)
            .await
            .map_err(|error| StepError::Failed(format!("llm generation failed: {error}")))?;

        {
            let mut ledger = self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            ledger.usage.add(&generation.usage);
            ledger.model = Some(generation.model);
        }
        Ok(generation.text)
    }

    async fn run_tool(
        &self,
        step: &ExecutionStep,
        input: &StepInput,
        context: &Context,
    ) -> Result<String, StepError> {
        let tool_name = step
            .tool_name
            .as_deref()
            .ok_or_else(|| StepError::Failed(format!("step `{}` has no tool name", step.id)))?;
        let timeout = step.timeout_ms.map_or(self.tool_timeout, Duration::from_millis);

        let mut parameters = resolve_parameters(&step.parameters, input);
        if !input.prior_outputs.is_empty() {
            let prior = input.prior_outputs.iter().map(|prior| prior.output.clone()).collect::<Vec<_>>();
            parameters.insert("prior_outputs".to_string(), json!(prior));
        }

        let value = self
            .tools
            .invoke(tool_name, Value::Object(parameters.into_iter().collect()), timeout)
            .await
            .map_err(|error| match error {
                ToolError::UnknownTool(name) => StepError::UnknownTool(name),
                ToolError::Timeout { timeout_ms, .. } => StepError::Timeout { timeout_ms },
                failed @ ToolError::Failed { .. } => StepError::Failed(failed.to_string()),
            })?;

        context.technical().insert(format!("tool.{tool_name}.last_output"), value.clone());
        debug!(
            event_name = "agent.step.tool_completed",
            step_id = %step.id,
            tool_name,
            "tool step completed"
        );

        Ok(render_tool_output(&value))
    }
}

impl std::fmt::Debug for AgentStepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStepRunner")
            .field("model", &self.llm.model_id())
            .field("tools", &self.tools)
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}

#[async_trait]
impl StepRunner for AgentStepRunner {
    async fn run_step(
        &self,
        step: &ExecutionStep,
        input: &StepInput,
        context: &Context,
    ) -> Result<String, StepError> {
        match step.step_type {
            StepType::LlmCall => self.run_llm_call(step, input, context).await,
            StepType::ToolExecution => self.run_tool(step, input, context).await,
            StepType::DataTransform => transform(step, input),
            StepType::Decision => step
                .parameters
                .get("question")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StepError::Failed(format!("decision step `{}` has no question", step.id))),
        }
    }
}

/// Replaces `$step_<n>` string parameters with the referenced step's output.
fn resolve_parameters(parameters: &BTreeMap<String, Value>, input: &StepInput) -> BTreeMap<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| {
            let resolved = match value.as_str() {
                Some(raw) if raw.starts_with(STEP_OUTPUT_REF_PREFIX) => {
                    input.output_of(&raw[1..]).map_or(Value::Null, |output| json!(output))
                }
                _ => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

fn build_prompt(step: &ExecutionStep, input: &StepInput) -> Result<String, StepError> {
    let parameters = resolve_parameters(&step.parameters, input);
    let text = |key: &str| text_parameter(&parameters, key).to_string();

    let (prompt_text, message) = (text("prompt"), text("message"));
    let mut prompt = if !prompt_text.is_empty() {
        prompt_text
    } else if !message.is_empty() {
        let (intent_type, domain) = (text("intent_type"), text("domain"));
        if intent_type.is_empty() {
            message
        } else if domain.is_empty() {
            format!("Respond to this {intent_type} request: {message}")
        } else {
            format!("Respond to this {intent_type} request about {domain}: {message}")
        }
    } else {
        return Err(StepError::Failed(format!("llm step `{}` has no prompt or message", step.id)));
    };

    if !input.prior_outputs.is_empty() {
        prompt.push_str("\n\nPrevious results:");
        for prior in &input.prior_outputs {
            prompt.push_str(&format!("\n- {}: {}", prior.step_id, prior.output));
        }
    }
    Ok(prompt)
}

fn text_parameter<'a>(parameters: &'a BTreeMap<String, Value>, key: &str) -> &'a str {
    parameters.get(key).and_then(Value::as_str).map(str::trim).unwrap_or_default()
}

fn transform(step: &ExecutionStep, input: &StepInput) -> Result<String, StepError> {
    let operation = step.parameters.get("operation").and_then(Value::as_str).unwrap_or(SUMMARIZE_ACTION);
    if input.prior_outputs.is_empty() {
        return Err(StepError::Failed(format!("nothing to {operation}: no prior step produced output")));
    }

    let outputs = input.prior_outputs.iter().map(|prior| prior.output.as_str()).collect::<Vec<_>>();
    match operation {
        SUMMARIZE_ACTION => Ok(format!(
            "Summary of {} result{}: {}",
            outputs.len(),
            if outputs.len() == 1 { "" } else { "s" },
            outputs.join("; ")
        )),
        MERGE_ACTION => Ok(outputs.join("\n")),
        other => Err(StepError::Failed(format!("unsupported transform `{other}`"))),
    }
}

fn render_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(fields) => fields
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use cerebro_core::domain::context::{Context, UserProfile};
    use cerebro_core::domain::plan::{ExecutionStep, StepType};
    use cerebro_core::domain::request::{ConversationId, UserId};
    use cerebro_core::execution_engine::{PriorOutput, StepError, StepInput, StepRunner};
    use serde_json::{json, Value};

    use super::AgentStepRunner;
    use crate::llm::{Classification, EchoLlmClient, Generation, LlmClient};
    use crate::tools::{EchoTool, Tool, ToolRegistry};

    fn context() -> Context {
        let user_id = UserId("u-1".to_string());
        Context::new(ConversationId("c-1".to_string()), user_id.clone(), UserProfile::minimal(user_id))
    }

    fn runner() -> AgentStepRunner {
        AgentStepRunner::new(
            Arc::new(EchoLlmClient::default()),
            ToolRegistry::new().with_tool(EchoTool::new("ticket-tool")).with_tool(SlowTool),
            1_000,
        )
    }

    fn prior(outputs: &[&str]) -> StepInput {
        StepInput {
            prior_outputs: outputs
                .iter()
                .enumerate()
                .map(|(index, output)| PriorOutput {
                    step_id: format!("step_{}", index + 1),
                    output: output.to_string(),
                })
                .collect(),
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow-tool"
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct MuteLlm;

    #[async_trait]
    impl LlmClient for MuteLlm {
        fn model_id(&self) -> &str {
            "mute"
        }

        async fn classify(&self, _text: &str, _context: &Context) -> Result<Classification> {
            Err(anyhow!("offline"))
        }

        async fn generate(&self, _prompt: &str, _context: &Context) -> Result<Generation> {
            Err(anyhow!("offline"))
        }
    }

    #[tokio::test]
    async fn llm_step_generates_and_accumulates_usage() {
        let runner = runner();
        let step = ExecutionStep::new(1, StepType::LlmCall, "answer")
            .with_parameter("message", json!("what is my balance?"))
            .with_parameter("intent_type", json!("informational"))
            .with_parameter("domain", json!("finance"));

        let output = runner.run_step(&step, &StepInput::default(), &context()).await.expect("llm step");

        assert_eq!(output, "Respond to this informational request about finance: what is my balance?");
        assert!(runner.token_usage().total() > 0);
        assert_eq!(runner.model().as_deref(), Some("echo-1"));
    }

    #[tokio::test]
    async fn llm_failure_is_a_step_failure() {
        let runner = AgentStepRunner::new(Arc::new(MuteLlm), ToolRegistry::new(), 1_000);
        let step = ExecutionStep::new(1, StepType::LlmCall, "answer").with_parameter("message", json!("hi"));

        let error = runner.run_step(&step, &StepInput::default(), &context()).await.expect_err("offline");

        assert_eq!(error, StepError::Failed("llm generation failed: offline".to_string()));
        assert_eq!(runner.model(), None);
    }

    #[tokio::test]
    async fn tool_step_invokes_registry_and_records_output() {
        let runner = runner();
        let context = context();
        let step = ExecutionStep::tool(1, "ticket-tool", "open ticket")
            .with_parameter("message", json!("create a new ticket"));

        let output = runner.run_step(&step, &StepInput::default(), &context).await.expect("tool step");

        assert_eq!(output, "ticket-tool handled: create a new ticket");
        let recorded = context.technical().get("tool.ticket-tool.last_output").expect("recorded");
        assert_eq!(recorded["status"], "ok");
    }

    #[tokio::test]
    async fn tool_errors_map_to_step_errors() {
        let runner = runner();

        let unknown = runner
            .run_step(&ExecutionStep::tool(1, "payroll-tool", "pay"), &StepInput::default(), &context())
            .await;
        assert_eq!(unknown, Err(StepError::UnknownTool("payroll-tool".to_string())));

        let slow = runner
            .run_step(
                &ExecutionStep::tool(1, "slow-tool", "wait").with_timeout_ms(10),
                &StepInput::default(),
                &context(),
            )
            .await;
        assert_eq!(slow, Err(StepError::Timeout { timeout_ms: 10 }));
    }

    #[tokio::test]
    async fn step_references_resolve_to_prior_outputs() {
        let runner = runner();
        let step = ExecutionStep::tool(2, "ticket-tool", "follow up").with_parameter("message", json!("$step_1"));

        let output = runner.run_step(&step, &prior(&["weather is sunny"]), &context()).await.expect("tool");

        assert_eq!(output, "ticket-tool handled: weather is sunny");
    }

    #[tokio::test]
    async fn transforms_fold_prior_outputs() {
        let runner = runner();
        let summarize =
            ExecutionStep::new(2, StepType::DataTransform, "summarize").with_parameter("operation", json!("summarize"));
        let merge = ExecutionStep::new(3, StepType::DataTransform, "merge").with_parameter("operation", json!("merge"));

        let summary = runner.run_step(&summarize, &prior(&["a", "b"]), &context()).await.expect("summary");
        let merged = runner.run_step(&merge, &prior(&["a", "b"]), &context()).await.expect("merge");
        let empty = runner.run_step(&summarize, &StepInput::default(), &context()).await;

        assert_eq!(summary, "Summary of 2 results: a; b");
        assert_eq!(merged, "a\nb");
        assert!(matches!(empty, Err(StepError::Failed(_))));
    }

    #[tokio::test]
    async fn decision_step_returns_its_question() {
        let step = ExecutionStep::new(1, StepType::Decision, "clarify")
            .with_parameter("question", json!("Could you rephrase?"));

        let output = runner().run_step(&step, &StepInput::default(), &context()).await.expect("decision");

        assert_eq!(output, "Could you rephrase?");
    }
}
