use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub reasoning: ReasoningConfig,
    pub planning: PlanningConfig,
    pub execution: ExecutionConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

/// Settings for the language-model collaborator.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReasoningConfig {
    pub mode: ReasoningMode,
    /// Intents below this confidence are answered with a clarification request.
    pub clarification_threshold: f64,
    /// Upper bound for confidence produced by the rule-based classifier.
    pub fallback_confidence_cap: f64,
}

#[derive(Clone, Debug)]
pub struct PlanningConfig {
    pub allow_parallel: bool,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub max_parallel_steps: usize,
    pub step_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    pub plan_deadline_ms: u64,
    pub merge_policy: MergePolicy,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub retrieval_timeout_ms: u64,
    pub working_limit: usize,
    pub episodic_limit: usize,
    pub consolidation_threshold: usize,
    pub embedding_dims: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    Rules,
    Model,
}

/// How outputs of parallel steps are folded into one final output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    Concatenate,
    FirstSuccess,
    Longest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub reasoning_mode: Option<ReasoningMode>,
    pub clarification_threshold: Option<f64>,
    pub allow_parallel: Option<bool>,
    pub max_parallel_steps: Option<usize>,
    pub merge_policy: Option<MergePolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: "echo".to_string(),
                model: "echo-1".to_string(),
                api_key: None,
                base_url: None,
                timeout_secs: 30,
            },
            reasoning: ReasoningConfig {
                mode: ReasoningMode::Rules,
                clarification_threshold: 0.5,
                fallback_confidence_cap: 0.5,
            },
            planning: PlanningConfig { allow_parallel: true },
            execution: ExecutionConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            step_timeout_ms: 30_000,
            tool_timeout_ms: 10_000,
            plan_deadline_ms: 60_000,
            merge_policy: MergePolicy::Concatenate,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retrieval_timeout_ms: 2_000,
            working_limit: 50,
            episodic_limit: 5,
            consolidation_threshold: 40,
            embedding_dims: 64,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ReasoningMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "model" => Ok(Self::Model),
            other => Err(ConfigError::Validation(format!(
                "unsupported reasoning mode `{other}` (expected rules|model)"
            ))),
        }
    }
}

impl std::str::FromStr for MergePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "concatenate" => Ok(Self::Concatenate),
            "first_success" => Ok(Self::FirstSuccess),
            "longest" => Ok(Self::Longest),
            other => Err(ConfigError::Validation(format!(
                "unsupported merge policy `{other}` (expected concatenate|first_success|longest)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cerebro.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(reasoning) = patch.reasoning {
            if let Some(mode) = reasoning.mode {
                self.reasoning.mode = mode;
            }
            if let Some(threshold) = reasoning.clarification_threshold {
                self.reasoning.clarification_threshold = threshold;
            }
            if let Some(cap) = reasoning.fallback_confidence_cap {
                self.reasoning.fallback_confidence_cap = cap;
            }
        }

        if let Some(planning) = patch.planning {
            if let Some(allow_parallel) = planning.allow_parallel {
                self.planning.allow_parallel = allow_parallel;
            }
        }

        if let Some(execution) = patch.execution {
            if let Some(max_parallel_steps) = execution.max_parallel_steps {
                self.execution.max_parallel_steps = max_parallel_steps;
            }
            if let Some(step_timeout_ms) = execution.step_timeout_ms {
                self.execution.step_timeout_ms = step_timeout_ms;
            }
            if let Some(tool_timeout_ms) = execution.tool_timeout_ms {
                self.execution.tool_timeout_ms = tool_timeout_ms;
            }
            if let Some(plan_deadline_ms) = execution.plan_deadline_ms {
                self.execution.plan_deadline_ms = plan_deadline_ms;
            }
            if let Some(merge_policy) = execution.merge_policy {
                self.execution.merge_policy = merge_policy;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(retrieval_timeout_ms) = memory.retrieval_timeout_ms {
                self.memory.retrieval_timeout_ms = retrieval_timeout_ms;
            }
            if let Some(working_limit) = memory.working_limit {
                self.memory.working_limit = working_limit;
            }
            if let Some(episodic_limit) = memory.episodic_limit {
                self.memory.episodic_limit = episodic_limit;
            }
            if let Some(consolidation_threshold) = memory.consolidation_threshold {
                self.memory.consolidation_threshold = consolidation_threshold;
            }
            if let Some(embedding_dims) = memory.embedding_dims {
                self.memory.embedding_dims = embedding_dims;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CEREBRO_LLM_PROVIDER") {
            self.llm.provider = value;
        }
        if let Some(value) = read_env("CEREBRO_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CEREBRO_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CEREBRO_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CEREBRO_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CEREBRO_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CEREBRO_REASONING_MODE") {
            self.reasoning.mode = value.parse()?;
        }
        if let Some(value) = read_env("CEREBRO_REASONING_CLARIFICATION_THRESHOLD") {
            self.reasoning.clarification_threshold =
                parse_f64("CEREBRO_REASONING_CLARIFICATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_REASONING_FALLBACK_CONFIDENCE_CAP") {
            self.reasoning.fallback_confidence_cap =
                parse_f64("CEREBRO_REASONING_FALLBACK_CONFIDENCE_CAP", &value)?;
        }

        if let Some(value) = read_env("CEREBRO_PLANNING_ALLOW_PARALLEL") {
            self.planning.allow_parallel = parse_bool("CEREBRO_PLANNING_ALLOW_PARALLEL", &value)?;
        }

        if let Some(value) = read_env("CEREBRO_EXECUTION_MAX_PARALLEL_STEPS") {
            self.execution.max_parallel_steps =
                parse_usize("CEREBRO_EXECUTION_MAX_PARALLEL_STEPS", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_EXECUTION_STEP_TIMEOUT_MS") {
            self.execution.step_timeout_ms =
                parse_u64("CEREBRO_EXECUTION_STEP_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_EXECUTION_TOOL_TIMEOUT_MS") {
            self.execution.tool_timeout_ms =
                parse_u64("CEREBRO_EXECUTION_TOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_EXECUTION_PLAN_DEADLINE_MS") {
            self.execution.plan_deadline_ms =
                parse_u64("CEREBRO_EXECUTION_PLAN_DEADLINE_MS", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_EXECUTION_MERGE_POLICY") {
            self.execution.merge_policy = value.parse()?;
        }

        if let Some(value) = read_env("CEREBRO_MEMORY_RETRIEVAL_TIMEOUT_MS") {
            self.memory.retrieval_timeout_ms =
                parse_u64("CEREBRO_MEMORY_RETRIEVAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_MEMORY_WORKING_LIMIT") {
            self.memory.working_limit = parse_usize("CEREBRO_MEMORY_WORKING_LIMIT", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_MEMORY_EPISODIC_LIMIT") {
            self.memory.episodic_limit = parse_usize("CEREBRO_MEMORY_EPISODIC_LIMIT", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_MEMORY_CONSOLIDATION_THRESHOLD") {
            self.memory.consolidation_threshold =
                parse_usize("CEREBRO_MEMORY_CONSOLIDATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CEREBRO_MEMORY_EMBEDDING_DIMS") {
            self.memory.embedding_dims = parse_usize("CEREBRO_MEMORY_EMBEDDING_DIMS", &value)?;
        }

        let log_level =
            read_env("CEREBRO_LOGGING_LEVEL").or_else(|| read_env("CEREBRO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CEREBRO_LOGGING_FORMAT").or_else(|| read_env("CEREBRO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(mode) = overrides.reasoning_mode {
            self.reasoning.mode = mode;
        }
        if let Some(threshold) = overrides.clarification_threshold {
            self.reasoning.clarification_threshold = threshold;
        }
        if let Some(allow_parallel) = overrides.allow_parallel {
            self.planning.allow_parallel = allow_parallel;
        }
        if let Some(max_parallel_steps) = overrides.max_parallel_steps {
            self.execution.max_parallel_steps = max_parallel_steps;
        }
        if let Some(merge_policy) = overrides.merge_policy {
            self.execution.merge_policy = merge_policy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_reasoning(&self.reasoning)?;
        validate_execution(&self.execution)?;
        validate_memory(&self.memory)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cerebro.toml"), PathBuf::from("config/cerebro.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.provider.trim().is_empty() {
        return Err(ConfigError::Validation("llm.provider must not be empty".to_string()));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let blank_key =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(false);
    if blank_key {
        return Err(ConfigError::Validation(
            "llm.api_key is set but empty; remove it or provide a value".to_string(),
        ));
    }

    Ok(())
}

fn validate_reasoning(reasoning: &ReasoningConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&reasoning.clarification_threshold) {
        return Err(ConfigError::Validation(
            "reasoning.clarification_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&reasoning.fallback_confidence_cap) {
        return Err(ConfigError::Validation(
            "reasoning.fallback_confidence_cap must be in range 0.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.max_parallel_steps == 0 || execution.max_parallel_steps > 64 {
        return Err(ConfigError::Validation(
            "execution.max_parallel_steps must be in range 1..=64".to_string(),
        ));
    }

    for (key, value) in [
        ("execution.step_timeout_ms", execution.step_timeout_ms),
        ("execution.tool_timeout_ms", execution.tool_timeout_ms),
        ("execution.plan_deadline_ms", execution.plan_deadline_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{key} must be greater than zero")));
        }
    }

    if execution.tool_timeout_ms > execution.plan_deadline_ms {
        return Err(ConfigError::Validation(
            "execution.tool_timeout_ms must not exceed execution.plan_deadline_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.retrieval_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "memory.retrieval_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if memory.working_limit == 0 {
        return Err(ConfigError::Validation(
            "memory.working_limit must be greater than zero".to_string(),
        ));
    }

    if memory.embedding_dims < 8 || memory.embedding_dims > 4096 {
        return Err(ConfigError::Validation(
            "memory.embedding_dims must be in range 8..=4096".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    reasoning: Option<ReasoningPatch>,
    planning: Option<PlanningPatch>,
    execution: Option<ExecutionPatch>,
    memory: Option<MemoryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReasoningPatch {
    mode: Option<ReasoningMode>,
    clarification_threshold: Option<f64>,
    fallback_confidence_cap: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlanningPatch {
    allow_parallel: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    max_parallel_steps: Option<usize>,
    step_timeout_ms: Option<u64>,
    tool_timeout_ms: Option<u64>,
    plan_deadline_ms: Option<u64>,
    merge_policy: Option<MergePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    retrieval_timeout_ms: Option<u64>,
    working_limit: Option<usize>,
    episodic_limit: Option<usize>,
    consolidation_threshold: Option<usize>,
    embedding_dims: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
