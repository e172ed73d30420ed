//! Agent runtime: collaborator ports and the request pipeline built on `cerebro-core`.
//!
//! The crate owns everything that talks to the outside world on behalf of the core:
//! - `context` builds the per-request [`Context`](cerebro_core::Context) from a request and an
//!   optional profile lookup
//! - `memory` retrieves and persists the four memory tiers through a [`memory::MemoryStore`]
//! - `reasoning` turns a message into an intent and a decision (`conversation` holds the keyword
//!   analyzer, `guardrails` post-checks every decision)
//! - `step_runner` executes plan steps against the LLM client and tool registry
//! - `runtime` wires it all together in [`AgentRuntime`]
//!
//! The LLM only classifies and phrases. Which tools run, in what order and under which limits is
//! decided deterministically by the reasoning rules, the guardrails and the core planner.

pub mod context;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod reasoning;
pub mod runtime;
pub mod step_runner;
pub mod tools;

pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
