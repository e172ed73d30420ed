use cerebro_core::domain::decision::{Decision, DecisionType};
use cerebro_core::domain::intent::Intent;
use cerebro_core::planning::{DECIDE_ACTION_PREFIX, LLM_ACTION_PREFIX, MERGE_ACTION, SUMMARIZE_ACTION};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Degrade { reason_code: &'static str, fallback_path: DecisionType },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Degrade { reason_code, .. } => Some(*reason_code),
        }
    }
}

/// Post-check run on every decision before planning, whichever reasoner produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionGuardrails {
    pub clarification_threshold: f64,
}

impl Default for DecisionGuardrails {
    fn default() -> Self {
        Self { clarification_threshold: 0.5 }
    }
}

fn is_tool_action(action: &str) -> bool {
    action != SUMMARIZE_ACTION
        && action != MERGE_ACTION
        && !action.starts_with(LLM_ACTION_PREFIX)
        && !action.starts_with(DECIDE_ACTION_PREFIX)
}

impl DecisionGuardrails {
    pub fn new(clarification_threshold: f64) -> Self {
        Self { clarification_threshold }
    }

    pub fn evaluate(&self, decision: &Decision, intent: &Intent, tools: &[String]) -> GuardrailDecision {
        let low_confidence = intent.confidence < self.clarification_threshold;

        match decision.decision_type {
            DecisionType::ClarificationNeeded if !low_confidence => GuardrailDecision::Degrade {
                reason_code: "clarification_not_warranted",
                fallback_path: DecisionType::DirectResponse,
            },
            DecisionType::ClarificationNeeded => GuardrailDecision::Allow,
            // Degraded intents are answered directly even below the threshold.
            _ if low_confidence && !intent.degraded => GuardrailDecision::Degrade {
                reason_code: "low_confidence_requires_clarification",
                fallback_path: DecisionType::ClarificationNeeded,
            },
            DecisionType::DirectResponse if !decision.actions.is_empty() => GuardrailDecision::Degrade {
                reason_code: "direct_response_with_actions",
                fallback_path: DecisionType::DirectResponse,
            },
            DecisionType::DirectResponse => GuardrailDecision::Allow,
            DecisionType::ToolExecution | DecisionType::MultiStepPlan => {
                self.evaluate_actions(decision, tools)
            }
        }
    }

    fn evaluate_actions(&self, decision: &Decision, tools: &[String]) -> GuardrailDecision {
        let degrade = |reason_code| GuardrailDecision::Degrade {
            reason_code,
            fallback_path: DecisionType::DirectResponse,
        };

        if decision.actions.is_empty() {
            return degrade("missing_actions");
        }

        let tool_actions = decision
            .actions
            .iter()
            .filter(|action| is_tool_action(action))
            .collect::<Vec<_>>();

        if tool_actions.is_empty() {
            return degrade("no_actionable_tool");
        }
        if tool_actions.iter().any(|action| !tools.contains(*action)) {
            return degrade("unavailable_tool");
        }
        if decision.decision_type == DecisionType::ToolExecution && decision.actions.len() != 1 {
            return degrade("single_tool_arity");
        }

        GuardrailDecision::Allow
    }

    /// Returns the decision to plan with, rewritten when a guardrail tripped.
    pub fn enforce(&self, decision: Decision, intent: &Intent, tools: &[String]) -> (Decision, GuardrailDecision) {
        let verdict = self.evaluate(&decision, intent, tools);
        let GuardrailDecision::Degrade { reason_code, fallback_path } = verdict else {
            return (decision, verdict);
        };

        let rewritten = Decision::new(
            fallback_path,
            format!("guardrail {reason_code}: {}", decision.reasoning),
            vec![],
            decision.confidence,
        );
        (rewritten, verdict)
    }
}

#[cfg(test)]
mod tests {
    use cerebro_core::domain::decision::{Decision, DecisionType};
    use cerebro_core::domain::intent::{Intent, IntentType};

    use super::{DecisionGuardrails, GuardrailDecision};

    fn intent(confidence: f64) -> Intent {
        Intent {
            id: "i-1".to_string(),
            intent_type: IntentType::Transactional,
            domain: "support".to_string(),
            confidence,
            entities: vec![],
            classifier: "test".to_string(),
            degraded: false,
        }
    }

    fn tools() -> Vec<String> {
        vec!["ticket-tool".to_string(), "news-tool".to_string()]
    }

    #[test]
    fn well_formed_decisions_are_allowed() {
        let guardrails = DecisionGuardrails::default();
        let single = Decision::new(DecisionType::ToolExecution, "r", vec!["ticket-tool".to_string()], 0.8);
        let plan = Decision::new(
            DecisionType::MultiStepPlan,
            "r",
            vec!["news-tool".to_string(), "summarize".to_string()],
            0.8,
        );

        assert_eq!(guardrails.evaluate(&single, &intent(0.8), &tools()), GuardrailDecision::Allow);
        assert_eq!(guardrails.evaluate(&plan, &intent(0.8), &tools()), GuardrailDecision::Allow);
    }

    #[test]
    fn unavailable_tool_degrades_to_direct_response() {
        let guardrails = DecisionGuardrails::default();
        let decision =
            Decision::new(DecisionType::ToolExecution, "model said so", vec!["payroll-tool".to_string()], 0.9);

        let (rewritten, verdict) = guardrails.enforce(decision, &intent(0.9), &tools());

        assert_eq!(verdict.reason_code(), Some("unavailable_tool"));
        assert_eq!(rewritten.decision_type, DecisionType::DirectResponse);
        assert!(rewritten.actions.is_empty());
        assert!(rewritten.reasoning.starts_with("guardrail unavailable_tool"));
    }

    #[test]
    fn low_confidence_action_becomes_clarification() {
        let guardrails = DecisionGuardrails::default();
        let decision = Decision::new(DecisionType::ToolExecution, "r", vec!["ticket-tool".to_string()], 0.3);

        let (rewritten, verdict) = guardrails.enforce(decision, &intent(0.3), &tools());

        assert_eq!(
            verdict,
            GuardrailDecision::Degrade {
                reason_code: "low_confidence_requires_clarification",
                fallback_path: DecisionType::ClarificationNeeded,
            }
        );
        assert_eq!(rewritten.decision_type, DecisionType::ClarificationNeeded);
    }

    #[test]
    fn arity_and_empty_actions_are_rejected() {
        let guardrails = DecisionGuardrails::default();
        let two_tools = Decision::new(
            DecisionType::ToolExecution,
            "r",
            vec!["ticket-tool".to_string(), "news-tool".to_string()],
            0.8,
        );
        let empty = Decision::new(DecisionType::MultiStepPlan, "r", vec![], 0.8);
        let transform_only =
            Decision::new(DecisionType::MultiStepPlan, "r", vec!["summarize".to_string()], 0.8);

        assert_eq!(guardrails.evaluate(&two_tools, &intent(0.8), &tools()).reason_code(), Some("single_tool_arity"));
        assert_eq!(guardrails.evaluate(&empty, &intent(0.8), &tools()).reason_code(), Some("missing_actions"));
        assert_eq!(
            guardrails.evaluate(&transform_only, &intent(0.8), &tools()).reason_code(),
            Some("no_actionable_tool")
        );
    }

    #[test]
    fn degraded_intent_may_answer_directly_below_threshold() {
        let guardrails = DecisionGuardrails::default();
        let mut degraded = intent(0.3);
        degraded.degraded = true;
        let decision = Decision::new(DecisionType::DirectResponse, "degraded mode", vec![], 0.3);

        assert_eq!(guardrails.evaluate(&decision, &degraded, &tools()), GuardrailDecision::Allow);
        assert_eq!(
            guardrails.evaluate(&decision, &intent(0.3), &tools()).reason_code(),
            Some("low_confidence_requires_clarification")
        );
    }

    #[test]
    fn unwarranted_clarification_is_answered_directly() {
        let guardrails = DecisionGuardrails::default();
        let decision = Decision::new(DecisionType::ClarificationNeeded, "r", vec![], 0.9);

        let (rewritten, _) = guardrails.enforce(decision, &intent(0.9), &tools());

        assert_eq!(rewritten.decision_type, DecisionType::DirectResponse);
    }
}
