use core_session::{Fault, FaultCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Operation '{0}' is not allowed on the QuickMix station")]
    QuickMixNotAllowed(&'static str),

    #[error("Invalid station name: {0}")]
    InvalidName(String),
}

impl CatalogError {
    /// Fault code reported to the UI for this error.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            CatalogError::Fault(fault) => fault.code,
            CatalogError::StationNotFound(_) => FaultCode::StationDoesNotExist,
            CatalogError::QuickMixNotAllowed(_) => FaultCode::CallNotAllowed,
            CatalogError::InvalidName(_) => FaultCode::ParameterValueInvalid,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
