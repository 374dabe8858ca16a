use bridge_traits::error::BridgeError;
use core_catalog::CatalogError;
use core_playback::PlaybackError;
use core_session::{Fault, FaultCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// A background command panicked.
    #[error("Background task panicked: {0}")]
    TaskPanicked(String),
}

impl CoreError {
    /// Code reported in the exception funnel.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            CoreError::InitializationFailed(_) => FaultCode::EngineInitError,
            CoreError::Runtime(_) => FaultCode::ConfigError,
            CoreError::Fault(fault) => fault.code,
            CoreError::Catalog(err) => err.fault_code(),
            CoreError::Playback(err) => err.fault_code(),
            CoreError::Bridge(BridgeError::NotAvailable(_)) => FaultCode::ConfigError,
            CoreError::Bridge(BridgeError::StreamOpen(_)) => FaultCode::StreamError,
            CoreError::Bridge(_) => FaultCode::NetworkError,
            CoreError::TaskPanicked(_) => FaultCode::UnknownError,
        }
    }

    /// Text shown to the listener.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Fault(fault) => fault.message.clone(),
            CoreError::Catalog(CatalogError::Fault(fault)) => fault.message.clone(),
            other => other.fault_code().message().to_string(),
        }
    }

    pub fn is_hard_fail(&self) -> bool {
        self.fault_code().is_hard_fail()
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
