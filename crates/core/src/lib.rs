pub mod config;
pub mod domain;
pub mod errors;
pub mod execution_engine;
pub mod planning;

pub use config::{AppConfig, ConfigError, LoadOptions, MergePolicy, ReasoningMode};
pub use domain::context::{Context, StateMap, StateScope, UserProfile};
pub use domain::decision::{Decision, DecisionType};
pub use domain::execution::{ExecutionResult, ExecutionState, StepResult};
pub use domain::intent::{Entity, Intent, IntentType};
pub use domain::memory::{MemoryFilters, MemorySnapshot, MemoryTier, MemoryUpdate};
pub use domain::plan::{ExecutionPlan, ExecutionStep, PlanStrategy, StepType};
pub use domain::request::{Attachment, ConversationId, Request, RequestId, UserId};
pub use domain::response::{Response, ResponseMetadata, TokenUsage};
pub use errors::{ErrorKind, PipelineError, PipelineStage};
pub use execution_engine::{ExecutionEngine, ExecutionError, StepError, StepInput, StepRunner};
pub use planning::{DeterministicPlanner, PlanningEngine, PlanningError};
