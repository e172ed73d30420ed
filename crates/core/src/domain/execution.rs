use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "partially_failed" => Some(Self::PartiallyFailed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub order: u32,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTransitionEvent {
    pub plan_id: String,
    pub from_state: Option<ExecutionState>,
    pub to_state: ExecutionState,
    pub transition_reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub plan_id: String,
    pub success: bool,
    pub state: ExecutionState,
    pub step_results: Vec<StepResult>,
    pub final_output: String,
    pub error: Option<String>,
    #[serde(default)]
    pub transitions: Vec<ExecutionTransitionEvent>,
}

impl ExecutionResult {
    pub fn succeeded_steps(&self) -> usize {
        self.step_results.iter().filter(|result| result.success).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.step_results.len() - self.succeeded_steps()
    }

    /// Fraction of step results that succeeded; zero when no step ran.
    pub fn success_ratio(&self) -> f64 {
        if self.step_results.is_empty() {
            return 0.0;
        }
        self.succeeded_steps() as f64 / self.step_results.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionState;

    #[test]
    fn execution_state_round_trips_from_storage_encoding() {
        let cases = [
            ExecutionState::Pending,
            ExecutionState::Running,
            ExecutionState::Succeeded,
            ExecutionState::PartiallyFailed,
            ExecutionState::Failed,
        ];

        for state in cases {
            let decoded = ExecutionState::parse(state.as_str());
            assert_eq!(decoded, Some(state));
        }
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!ExecutionState::Pending.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::PartiallyFailed.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
    }
}
