pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cerebro",
    about = "Cerebro operator CLI",
    long_about = "Inspect configuration, run pipeline smoke checks, and send one-off messages through the agent pipeline.",
    after_help = "Examples:\n  cerebro config\n  cerebro smoke\n  cerebro ask \"create a new ticket\" --tool ticket-tool"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run canned requests through an in-memory pipeline with per-check timing")]
    Smoke,
    #[command(about = "Process one message with in-memory collaborators and print the response")]
    Ask {
        #[arg(help = "Message to send")]
        message: String,
        #[arg(long, default_value = "cli", help = "Conversation to attach the message to")]
        conversation_id: String,
        #[arg(long = "tool", help = "Register an echo tool with this name (repeatable)")]
        tools: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Smoke => commands::smoke::run(),
        Command::Ask { message, conversation_id, tools } => {
            commands::ask::run(&message, &conversation_id, &tools)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
