use std::env;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use cerebro_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut field = |key: &str, value: String, env_keys: &[&str]| {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    };
    field("llm.provider", config.llm.provider.clone(), &["CEREBRO_LLM_PROVIDER"]);
    field("llm.model", config.llm.model.clone(), &["CEREBRO_LLM_MODEL"]);
    field(
        "llm.base_url",
        config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        &["CEREBRO_LLM_BASE_URL"],
    );
    field("llm.api_key", api_key.to_string(), &["CEREBRO_LLM_API_KEY"]);
    field("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["CEREBRO_LLM_TIMEOUT_SECS"]);
    field("reasoning.mode", enum_label(&config.reasoning.mode), &["CEREBRO_REASONING_MODE"]);
    field(
        "reasoning.clarification_threshold",
        config.reasoning.clarification_threshold.to_string(),
        &["CEREBRO_REASONING_CLARIFICATION_THRESHOLD"],
    );
    field(
        "reasoning.fallback_confidence_cap",
        config.reasoning.fallback_confidence_cap.to_string(),
        &["CEREBRO_REASONING_FALLBACK_CONFIDENCE_CAP"],
    );
    field(
        "planning.allow_parallel",
        config.planning.allow_parallel.to_string(),
        &["CEREBRO_PLANNING_ALLOW_PARALLEL"],
    );
    field(
        "execution.max_parallel_steps",
        config.execution.max_parallel_steps.to_string(),
        &["CEREBRO_EXECUTION_MAX_PARALLEL_STEPS"],
    );
    field(
        "execution.step_timeout_ms",
        config.execution.step_timeout_ms.to_string(),
        &["CEREBRO_EXECUTION_STEP_TIMEOUT_MS"],
    );
    field(
        "execution.tool_timeout_ms",
        config.execution.tool_timeout_ms.to_string(),
        &["CEREBRO_EXECUTION_TOOL_TIMEOUT_MS"],
    );
    field(
        "execution.plan_deadline_ms",
        config.execution.plan_deadline_ms.to_string(),
        &["CEREBRO_EXECUTION_PLAN_DEADLINE_MS"],
    );
    field(
        "execution.merge_policy",
        enum_label(&config.execution.merge_policy),
        &["CEREBRO_EXECUTION_MERGE_POLICY"],
    );
    field(
        "memory.retrieval_timeout_ms",
        config.memory.retrieval_timeout_ms.to_string(),
        &["CEREBRO_MEMORY_RETRIEVAL_TIMEOUT_MS"],
    );
    field(
        "memory.working_limit",
        config.memory.working_limit.to_string(),
        &["CEREBRO_MEMORY_WORKING_LIMIT"],
    );
    field(
        "memory.episodic_limit",
        config.memory.episodic_limit.to_string(),
        &["CEREBRO_MEMORY_EPISODIC_LIMIT"],
    );
    field(
        "memory.consolidation_threshold",
        config.memory.consolidation_threshold.to_string(),
        &["CEREBRO_MEMORY_CONSOLIDATION_THRESHOLD"],
    );
    field(
        "memory.embedding_dims",
        config.memory.embedding_dims.to_string(),
        &["CEREBRO_MEMORY_EMBEDDING_DIMS"],
    );
    field(
        "logging.level",
        config.logging.level.clone(),
        &["CEREBRO_LOGGING_LEVEL", "CEREBRO_LOG_LEVEL"],
    );
    field(
        "logging.format",
        enum_label(&config.logging.format),
        &["CEREBRO_LOGGING_FORMAT", "CEREBRO_LOG_FORMAT"],
    );

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["cerebro.toml", "config/cerebro.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Renders a config enum with the same spelling the config file accepts.
fn enum_label<T: Serialize + Debug>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{value:?}"))
}
