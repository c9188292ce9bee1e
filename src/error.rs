//! Error types for tcprelay.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No host, or a host with no port tokens.
    #[error("too few arguments")]
    TooFewArguments,

    /// Token is neither a bare port nor a port pair.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Token is numeric but does not fit in [1,65535].
    #[error("argument '{0}': not in range [1,65535]")]
    PortOutOfRange(String),

    #[error("error listening on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("accept error on {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("dial error to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial error to {target}: timed out after {}s", .timeout.as_secs_f32())]
    DialTimeout { target: String, timeout: Duration },
}

impl Error {
    /// Returns true for errors raised while building the rule set, before
    /// any socket is opened. These end the process with status 1.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::TooFewArguments | Error::InvalidArgument(_) | Error::PortOutOfRange(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
