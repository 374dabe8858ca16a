//! Errors raised while assembling the player core.

use thiserror::Error;

/// Setup failures. Nothing here is raised once a player is running; runtime
/// faults travel as session faults instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A setting, partner key or log directive was rejected.
    #[error("Invalid player configuration: {0}")]
    Config(String),

    /// The host did not inject a bridge the core cannot run without.
    #[error("Host did not provide a {capability}: {message}")]
    CapabilityMissing {
        capability: &'static str,
        message: String,
    },

    /// A default bridge failed to start.
    #[error("Player core setup failed: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn missing(capability: &'static str, message: impl Into<String>) -> Self {
        Error::CapabilityMissing {
            capability,
            message: message.into(),
        }
    }

    /// Which bridge is absent, if that is the problem.
    pub fn missing_capability(&self) -> Option<&'static str> {
        match self {
            Error::CapabilityMissing { capability, .. } => Some(*capability),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
