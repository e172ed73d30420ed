use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    DirectResponse,
    ToolExecution,
    MultiStepPlan,
    ClarificationNeeded,
}

impl DecisionType {
    pub const ALL: [DecisionType; 4] = [
        Self::DirectResponse,
        Self::ToolExecution,
        Self::MultiStepPlan,
        Self::ClarificationNeeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectResponse => "direct_response",
            Self::ToolExecution => "tool_execution",
            Self::MultiStepPlan => "multi_step_plan",
            Self::ClarificationNeeded => "clarification_needed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct_response" => Some(Self::DirectResponse),
            "tool_execution" => Some(Self::ToolExecution),
            "multi_step_plan" => Some(Self::MultiStepPlan),
            "clarification_needed" => Some(Self::ClarificationNeeded),
            _ => None,
        }
    }

    pub fn requires_actions(&self) -> bool {
        matches!(self, Self::ToolExecution | Self::MultiStepPlan)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub decision_type: DecisionType,
    pub reasoning: String,
    pub actions: Vec<String>,
    pub confidence: f64,
}

impl Decision {
    pub fn new(
        decision_type: DecisionType,
        reasoning: impl Into<String>,
        actions: Vec<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            decision_type,
            reasoning: reasoning.into(),
            actions,
            confidence: crate::domain::intent::clamp_confidence(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, DecisionType};

    #[test]
    fn decision_type_round_trips_from_storage_encoding() {
        for decision_type in DecisionType::ALL {
            assert_eq!(DecisionType::parse(decision_type.as_str()), Some(decision_type));
        }
    }

    #[test]
    fn only_tool_and_multi_step_require_actions() {
        assert!(DecisionType::ToolExecution.requires_actions());
        assert!(DecisionType::MultiStepPlan.requires_actions());
        assert!(!DecisionType::DirectResponse.requires_actions());
        assert!(!DecisionType::ClarificationNeeded.requires_actions());
    }

    #[test]
    fn new_decision_clamps_confidence() {
        let decision = Decision::new(DecisionType::DirectResponse, "fallback", vec![], 3.0);
        assert_eq!(decision.confidence, 1.0);
        assert!(!decision.id.is_empty());
    }
}
