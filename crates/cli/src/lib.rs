pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley Slack connector operator CLI",
    long_about = "Inspect connector configuration, run readiness checks, and print the webhook URL to register with Slack.",
    after_help = "Examples:\n  parley doctor --json\n  parley config\n  parley webhook-url https://bot.example.com"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a parley.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, token format, signing secret, and optionally Slack auth")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Call Slack `auth.test` with the configured bot token")]
        online: bool,
    },
    #[command(about = "Print the Events API request URL for a public base URL")]
    WebhookUrl {
        #[arg(help = "Public base URL the server is reachable at, e.g. https://bot.example.com")]
        base_url: String,
        #[arg(long, help = "Accept plain http base URLs (local tunnels, testing)")]
        allow_http: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Command::Config => commands::config::run(config_path),
        Command::Doctor { json, online } => commands::doctor::run(config_path, json, online),
        Command::WebhookUrl { base_url, allow_http } => {
            commands::webhook_url::run(&base_url, allow_http)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
