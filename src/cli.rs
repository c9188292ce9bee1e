//! Command-line surface.

use clap::{ArgAction, CommandFactory, Parser};

use crate::{Error, Result, RuleSet};

// `-h` and `--help` are separate switches so a misplaced one can be
// reported by the exact token the user typed.

/// Forwards all TCP connections to HOST, from a list of PORTS.
#[derive(Parser, Debug)]
#[command(
    name = "tcprelay",
    long_about = None,
    disable_help_flag = true,
    override_usage = "tcprelay [-h|--help] HOST PORTS..."
)]
pub struct Cli {
    /// Print usage and exit (only as the sole argument)
    #[arg(short = 'h', action = ArgAction::SetTrue)]
    pub short_help: bool,

    #[arg(long = "help", action = ArgAction::SetTrue, hide = true)]
    pub long_help: bool,

    /// Destination host or address (e.g. "example.com")
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// Space-delimited list of ports (e.g. "80 443") or pairs of port
    /// mappings (e.g. "80->8080 443->8443")
    #[arg(value_name = "PORTS")]
    pub ports: Vec<String>,
}

/// What the invocation asks for.
#[derive(Debug)]
pub enum Action {
    /// Print usage and exit without relaying.
    Help,
    Relay(RuleSet),
}

impl Cli {
    /// Resolves the parsed arguments into an action.
    ///
    /// An empty command line, or `-h`/`--help` alone, is a help request.
    pub fn action(self) -> Result<Action> {
        let bare = self.host.is_none() && self.ports.is_empty();
        match (self.short_help, self.long_help) {
            (false, false) if bare => return Ok(Action::Help),
            (true, false) | (false, true) if bare => return Ok(Action::Help),
            (false, false) => {}
            (true, _) => return Err(Error::InvalidArgument("-h".into())),
            (false, true) => return Err(Error::InvalidArgument("--help".into())),
        }

        let args: Vec<String> = self.host.into_iter().chain(self.ports).collect();
        RuleSet::parse(&args).map(Action::Relay)
    }

    /// Usage text as printed for `--help`.
    pub fn usage() -> String {
        Cli::command().render_help().to_string()
    }
}
