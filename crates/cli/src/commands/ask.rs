use cerebro_agent::AgentRuntime;
use cerebro_core::config::{AppConfig, LoadOptions};
use cerebro_core::domain::request::Request;

use crate::commands::{echo_tools, CommandResult};

pub fn run(message: &str, conversation_id: &str, tools: &[String]) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("ask", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let agent = AgentRuntime::builder(config)
        .tools(echo_tools(tools.iter().map(String::as_str)))
        .build();
    let request = Request::builder(conversation_id, message).user_id("cli").session_id("cli").build();
    let response = runtime.block_on(agent.process(request));

    match serde_json::to_string_pretty(&response) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(
            "ask",
            "serialization",
            format!("failed to serialize response: {error}"),
            4,
        ),
    }
}
