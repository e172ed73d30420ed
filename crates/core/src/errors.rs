use std::fmt;

use thiserror::Error;

use crate::{execution_engine::ExecutionError, planning::PlanningError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Context,
    Memory,
    Reasoning,
    Planning,
    Execution,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Memory => "memory",
            Self::Reasoning => "reasoning",
            Self::Planning => "planning",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    CollaboratorUnavailable,
    StepExecution,
    InvariantViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::CollaboratorUnavailable => "collaborator_unavailable",
            Self::StepExecution => "step_execution",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed during {stage}: {message}")]
    Validation { stage: PipelineStage, message: String },
    #[error("collaborator `{collaborator}` unavailable during {stage}: {message}")]
    CollaboratorUnavailable { stage: PipelineStage, collaborator: String, message: String },
    #[error("step `{step_id}` failed: {message}")]
    StepExecution { step_id: String, message: String },
    #[error("invariant violation during {stage}: {message}")]
    InvariantViolation { stage: PipelineStage, message: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::CollaboratorUnavailable { .. } => ErrorKind::CollaboratorUnavailable,
            Self::StepExecution { .. } => ErrorKind::StepExecution,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Validation { stage, .. }
            | Self::CollaboratorUnavailable { stage, .. }
            | Self::InvariantViolation { stage, .. } => *stage,
            Self::StepExecution { .. } => PipelineStage::Execution,
        }
    }

    /// Invariant violations point at a programming or configuration bug.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation { .. } => {
                "I could not process that request as given. Please rephrase it and try again."
            }
            Self::CollaboratorUnavailable { .. } => {
                "A service I depend on is temporarily unavailable. Please retry shortly."
            }
            Self::StepExecution { .. } => {
                "I started working on that but one of the steps failed. Please retry shortly."
            }
            Self::InvariantViolation { .. } => {
                "An unexpected internal error occurred while handling your request."
            }
        }
    }
}

impl From<PlanningError> for PipelineError {
    fn from(value: PlanningError) -> Self {
        let message = value.to_string();
        match value {
            PlanningError::EmptyPlan | PlanningError::StrategyMismatch { .. } => {
                Self::InvariantViolation { stage: PipelineStage::Planning, message }
            }
            PlanningError::EmptyActions { .. }
            | PlanningError::NonContiguousOrder { .. }
            | PlanningError::MissingToolName { .. }
            | PlanningError::UnexpectedToolName { .. } => {
                Self::Validation { stage: PipelineStage::Planning, message }
            }
        }
    }
}

impl From<ExecutionError> for PipelineError {
    fn from(value: ExecutionError) -> Self {
        let message = value.to_string();
        match value {
            ExecutionError::MalformedPlan(_) => {
                Self::Validation { stage: PipelineStage::Execution, message }
            }
            ExecutionError::InvalidTransition { .. } => {
                Self::InvariantViolation { stage: PipelineStage::Execution, message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::execution::ExecutionState;
    use crate::errors::{ErrorKind, PipelineError, PipelineStage};
    use crate::execution_engine::ExecutionError;
    use crate::planning::PlanningError;

    #[test]
    fn empty_plan_maps_to_invariant_violation() {
        let error = PipelineError::from(PlanningError::EmptyPlan);

        assert_eq!(error.kind(), ErrorKind::InvariantViolation);
        assert_eq!(error.stage(), PipelineStage::Planning);
        assert!(error.is_fatal());
    }

    #[test]
    fn malformed_plan_maps_to_validation() {
        let error = PipelineError::from(ExecutionError::MalformedPlan(PlanningError::EmptyPlan));

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.stage(), PipelineStage::Execution);
        assert!(!error.is_fatal());
    }

    #[test]
    fn invalid_transition_maps_to_invariant_violation() {
        let error = PipelineError::from(ExecutionError::InvalidTransition {
            from: ExecutionState::Succeeded,
            to: ExecutionState::Running,
        });

        assert_eq!(error.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn collaborator_error_has_user_safe_message() {
        let error = PipelineError::CollaboratorUnavailable {
            stage: PipelineStage::Reasoning,
            collaborator: "classifier".to_owned(),
            message: "connection refused".to_owned(),
        };

        assert_eq!(
            error.user_message(),
            "A service I depend on is temporarily unavailable. Please retry shortly."
        );
        assert!(!error.user_message().contains("connection refused"));
        assert_eq!(error.kind().as_str(), "collaborator_unavailable");
    }
}
