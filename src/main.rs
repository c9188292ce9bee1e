use std::fmt::Display;
use std::process::ExitCode;

use clap::Parser;
use tcprelay::cli::{Action, Cli};
use tcprelay::{Relay, RelayConfig};

const HELP_HINT: &str = "use --help to print usage";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return parse_failure(first_line(&e.to_string())),
    };

    let rules = match cli.action() {
        Ok(Action::Relay(rules)) => rules,
        Ok(Action::Help) => {
            println!("{}", Cli::usage());
            return ExitCode::FAILURE;
        }
        Err(e) if e.is_startup() => return parse_failure(e),
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    log::debug!("target {} with {} rule(s)", rules.target(), rules.rules().len());
    Relay::new(RelayConfig::from(rules)).run().await;
    ExitCode::SUCCESS
}

fn parse_failure(message: impl Display) -> ExitCode {
    eprintln!("parse error: {message}\n{HELP_HINT}");
    ExitCode::FAILURE
}

/// clap errors span several lines; keep the one naming the problem.
fn first_line(message: &str) -> &str {
    let line = message.lines().next().unwrap_or_default();
    line.trim_start_matches("error: ")
}
