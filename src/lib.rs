//! TCP port-forwarding relay.
//!
//! Listens on a set of local ports and relays every accepted connection to
//! a fixed remote host, byte for byte, until either side closes.

pub mod cli;
pub mod error;
pub mod relay;
pub mod rules;

pub use error::{Error, Result};
pub use relay::{Relay, RelayConfig, DEFAULT_DIAL_TIMEOUT};
pub use rules::{ForwardingRule, RuleSet};
