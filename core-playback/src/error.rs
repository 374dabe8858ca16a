//! # Playback Error Types

use core_session::FaultCode;
use thiserror::Error;

/// Errors raised by the playlist buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// No song arrived before the reload timeout, or the last reload was empty.
    #[error("The station has no more songs to play")]
    EndOfPlaylist,

    #[error("Invalid playlist settings: {0}")]
    InvalidSettings(String),
}

impl PlaybackError {
    pub fn fault_code(&self) -> FaultCode {
        match self {
            PlaybackError::EndOfPlaylist => FaultCode::EndOfPlaylist,
            PlaybackError::InvalidSettings(_) => FaultCode::ConfigError,
        }
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
