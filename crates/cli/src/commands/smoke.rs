use std::time::Instant;

use cerebro_agent::AgentRuntime;
use cerebro_core::config::{AppConfig, LoadOptions};
use cerebro_core::domain::decision::DecisionType;
use cerebro_core::domain::request::Request;
use cerebro_core::domain::response::Response;
use serde::Serialize;

use crate::commands::{echo_tools, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

/// One canned request and the outcome it must produce.
struct Probe {
    name: &'static str,
    message: &'static str,
    expected_decision: DecisionType,
    expected_path: &'static str,
    expected_tools: &'static [&'static str],
}

static PROBES: [Probe; 3] = [
    Probe {
        name: "direct_response",
        message: "what is my balance?",
        expected_decision: DecisionType::DirectResponse,
        expected_path: "direct",
        expected_tools: &[],
    },
    Probe {
        name: "tool_execution",
        message: "create a new ticket",
        expected_decision: DecisionType::ToolExecution,
        expected_path: "single_tool",
        expected_tools: &["ticket-tool"],
    },
    Probe {
        name: "clarification",
        message: "purple elephants",
        expected_decision: DecisionType::ClarificationNeeded,
        expected_path: "clarification",
        expected_tools: &[],
    },
];

const SMOKE_TOOLS: [&str; 1] = ["ticket-tool"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.extend(PROBES.iter().map(|probe| skipped(probe.name)));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut probes = PROBES.iter();
            if let Some(first) = probes.next() {
                checks.push(SmokeCheck {
                    name: first.name,
                    status: SmokeStatus::Fail,
                    elapsed_ms: 0,
                    message: format!("failed to initialize async runtime: {error}"),
                });
            }
            checks.extend(probes.map(|probe| skipped(probe.name)));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let agent = AgentRuntime::builder(config).tools(echo_tools(SMOKE_TOOLS)).build();

    for (index, probe) in PROBES.iter().enumerate() {
        let probe_started = Instant::now();
        let request = Request::builder(format!("smoke-{index}"), probe.message)
            .request_id(format!("smoke-{}", probe.name))
            .user_id("smoke")
            .build();
        let response = runtime.block_on(agent.process(request));
        let elapsed_ms = probe_started.elapsed().as_millis() as u64;

        checks.push(match verify(probe, &response) {
            Ok(()) => SmokeCheck {
                name: probe.name,
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: format!(
                    "`{}` answered via {} at confidence {:.2}",
                    probe.message, response.metadata.execution_path, response.confidence
                ),
            },
            Err(message) => SmokeCheck { name: probe.name, status: SmokeStatus::Fail, elapsed_ms, message },
        });
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

fn verify(probe: &Probe, response: &Response) -> Result<(), String> {
    let decision = response.decision.as_ref().map(|decision| decision.decision_type);
    if decision != Some(probe.expected_decision) {
        return Err(format!(
            "expected decision {} but got {}",
            probe.expected_decision.as_str(),
            decision.map_or("none", |decision| decision.as_str())
        ));
    }
    if response.metadata.execution_path != probe.expected_path {
        return Err(format!(
            "expected execution path `{}` but got `{}`",
            probe.expected_path, response.metadata.execution_path
        ));
    }
    if response.executed_tools != probe.expected_tools {
        return Err(format!(
            "expected tools {:?} but got {:?}",
            probe.expected_tools, response.executed_tools
        ));
    }
    if response.content.trim().is_empty() {
        return Err("response content was empty".to_string());
    }
    Ok(())
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
