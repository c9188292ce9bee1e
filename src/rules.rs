//! Forwarding rule parsing.
//!
//! The command line is `HOST PORTS...`, where each port token is either
//! a bare port (`80`, forward 80 to HOST:80) or a pair (`80-8080` or
//! `80->8080`, forward 80 to HOST:8080).

use std::fmt;

use crate::{Error, Result};

/// A mapping from a local listen port to a port on the relay target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardingRule {
    listen_port: u16,
    target_port: u16,
}

impl ForwardingRule {
    /// Builds a rule, rejecting port 0 on either side.
    pub fn new(listen_port: u16, target_port: u16) -> Result<Self> {
        for port in [listen_port, target_port] {
            if port == 0 {
                return Err(Error::PortOutOfRange(port.to_string()));
            }
        }
        Ok(Self {
            listen_port,
            target_port,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    /// Parses a single port token.
    pub fn parse(token: &str) -> Result<Self> {
        if is_port_literal(token) {
            let port = parse_port(token, token)?;
            return Ok(Self {
                listen_port: port,
                target_port: port,
            });
        }

        let (listen, target) = split_pair(token)
            .ok_or_else(|| Error::InvalidArgument(token.to_string()))?;
        Ok(Self {
            listen_port: parse_port(listen, token)?,
            target_port: parse_port(target, token)?,
        })
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.listen_port, self.target_port)
    }
}

/// The target host and every rule that relays to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    target: String,
    rules: Vec<ForwardingRule>,
}

impl RuleSet {
    /// Parses `HOST PORTS...`.
    ///
    /// All-or-nothing: the first bad token fails the whole set.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let (host, tokens): (&str, _) = match args {
            [host, tokens @ ..] if !tokens.is_empty() => (host.as_ref(), tokens),
            _ => return Err(Error::TooFewArguments),
        };

        let rules = tokens
            .iter()
            .map(|token| ForwardingRule::parse(token.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            target: host.to_string(),
            rules,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn rules(&self) -> &[ForwardingRule] {
        &self.rules
    }

    pub fn into_parts(self) -> (String, Vec<ForwardingRule>) {
        (self.target, self.rules)
    }
}

fn is_port_literal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Splits `A-B` or `A->B` at the first dash. Both halves must be digits.
fn split_pair(token: &str) -> Option<(&str, &str)> {
    let (listen, rest) = token.split_once('-')?;
    let target = rest.strip_prefix('>').unwrap_or(rest);
    (is_port_literal(listen) && is_port_literal(target)).then_some((listen, target))
}

/// `digits` has already been checked to be ASCII digits; any parse failure
/// is therefore an overflow.
fn parse_port(digits: &str, token: &str) -> Result<u16> {
    match digits.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(Error::PortOutOfRange(token.to_string())),
    }
}
