use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStrategy {
    Direct,
    SingleTool,
    Sequential,
    Parallel,
}

impl PlanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::SingleTool => "single_tool",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "single_tool" => Some(Self::SingleTool),
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }

    /// Strategies that run exactly one step.
    pub fn is_single_step(&self) -> bool {
        matches!(self, Self::Direct | Self::SingleTool)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    LlmCall,
    ToolExecution,
    DataTransform,
    Decision,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmCall => "llm_call",
            Self::ToolExecution => "tool_execution",
            Self::DataTransform => "data_transform",
            Self::Decision => "decision",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llm_call" => Some(Self::LlmCall),
            "tool_execution" => Some(Self::ToolExecution),
            "data_transform" => Some(Self::DataTransform),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub description: String,
    pub step_type: StepType,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// 1-based. Strict for sequential plans, a tie-break for parallel ones.
    pub order: u32,
    #[serde(default = "default_critical")]
    pub critical: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_critical() -> bool {
    true
}

impl ExecutionStep {
    pub fn new(order: u32, step_type: StepType, description: impl Into<String>) -> Self {
        Self {
            id: format!("step_{order}"),
            description: description.into(),
            step_type,
            tool_name: None,
            parameters: BTreeMap::new(),
            order,
            critical: true,
            timeout_ms: None,
        }
    }

    pub fn tool(order: u32, tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        let mut step = Self::new(order, StepType::ToolExecution, description);
        step.tool_name = Some(tool_name.into());
        step
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub strategy: PlanStrategy,
    pub steps: Vec<ExecutionStep>,
    pub estimated_complexity: f64,
}

impl ExecutionPlan {
    /// Steps sorted by their order index (stable for equal orders).
    pub fn ordered_steps(&self) -> Vec<&ExecutionStep> {
        let mut steps = self.steps.iter().collect::<Vec<_>>();
        steps.sort_by_key(|step| step.order);
        steps
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.steps.iter().filter_map(|step| step.tool_name.as_deref()).collect()
    }
}
