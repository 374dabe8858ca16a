//! Fault taxonomy shared by every RPC.
//!
//! Server codes are passed through as-is; codes from 9000 upward are raised
//! locally by the client and never appear on the wire.

use bridge_traits::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FaultCode {
    Internal = 0,
    MaintenanceMode = 1,
    UrlParamMissingMethod = 2,
    UrlParamMissingAuthToken = 3,
    UrlParamMissingPartnerId = 4,
    UrlParamMissingUserId = 5,
    SecureProtocolRequired = 6,
    CertificateRequired = 7,
    ParameterTypeMismatch = 8,
    ParameterMissing = 9,
    ParameterValueInvalid = 10,
    ApiVersionNotSupported = 11,
    LicensingRestrictions = 12,
    InsufficientConnectivity = 13,
    UnknownMethodName = 14,
    WrongProtocol = 15,
    ReadOnlyMode = 1000,
    InvalidAuthToken = 1001,
    InvalidLogin = 1002,
    ListenerNotAuthorized = 1003,
    UserNotAuthorized = 1004,
    MaxStationsReached = 1005,
    StationDoesNotExist = 1006,
    CallNotAllowed = 1008,
    PartnerNotAuthorized = 1010,
    InvalidUsername = 1011,
    InvalidPassword = 1012,
    DeviceDisabled = 1034,
    PlaylistExceeded = 1039,

    UnknownError = 9000,
    NoAudioUrls = 9001,
    EndOfPlaylist = 9002,
    StreamError = 9003,
    EngineInitError = 9004,
    ConfigError = 9005,
    NetworkError = 9006,
    BadResponse = 9007,
    NotConnected = 9008,
}

/// Coarse classification used for recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Bad credentials or rejected partner; fatal to connect.
    Auth,
    /// Recoverable by one reauth and retry.
    TokenExpired,
    /// Malformed or unexpected response; surfaced, never retried.
    Protocol,
    /// Daily skip limit or exhausted catalog.
    EndOfPlaylist,
    /// Engine could not open a track URL.
    Stream,
    /// Transport failure.
    Network,
    /// Any other server-side refusal.
    Server,
}

impl FaultCode {
    /// Map a raw code from a fault envelope. Unknown codes collapse to
    /// [`FaultCode::UnknownError`].
    pub fn from_code(code: i64) -> Self {
        use FaultCode::*;
        match code {
            0 => Internal,
            1 => MaintenanceMode,
            2 => UrlParamMissingMethod,
            3 => UrlParamMissingAuthToken,
            4 => UrlParamMissingPartnerId,
            5 => UrlParamMissingUserId,
            6 => SecureProtocolRequired,
            7 => CertificateRequired,
            8 => ParameterTypeMismatch,
            9 => ParameterMissing,
            10 => ParameterValueInvalid,
            11 => ApiVersionNotSupported,
            12 => LicensingRestrictions,
            13 => InsufficientConnectivity,
            14 => UnknownMethodName,
            15 => WrongProtocol,
            1000 => ReadOnlyMode,
            1001 => InvalidAuthToken,
            1002 => InvalidLogin,
            1003 => ListenerNotAuthorized,
            1004 => UserNotAuthorized,
            1005 => MaxStationsReached,
            1006 => StationDoesNotExist,
            1008 => CallNotAllowed,
            1010 => PartnerNotAuthorized,
            1011 => InvalidUsername,
            1012 => InvalidPassword,
            1034 => DeviceDisabled,
            1039 => PlaylistExceeded,
            9001 => NoAudioUrls,
            9002 => EndOfPlaylist,
            9003 => StreamError,
            9004 => EngineInitError,
            9005 => ConfigError,
            9006 => NetworkError,
            9007 => BadResponse,
            9008 => NotConnected,
            _ => UnknownError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn kind(self) -> FaultKind {
        use FaultCode::*;
        match self {
            InvalidAuthToken => FaultKind::TokenExpired,
            InvalidLogin | ListenerNotAuthorized | UserNotAuthorized | PartnerNotAuthorized
            | InvalidUsername | InvalidPassword | DeviceDisabled | NotConnected => FaultKind::Auth,
            PlaylistExceeded | EndOfPlaylist => FaultKind::EndOfPlaylist,
            StreamError | NoAudioUrls => FaultKind::Stream,
            NetworkError | InsufficientConnectivity => FaultKind::Network,
            UrlParamMissingMethod
            | UrlParamMissingAuthToken
            | UrlParamMissingPartnerId
            | UrlParamMissingUserId
            | SecureProtocolRequired
            | CertificateRequired
            | ParameterTypeMismatch
            | ParameterMissing
            | ParameterValueInvalid
            | ApiVersionNotSupported
            | UnknownMethodName
            | WrongProtocol
            | BadResponse => FaultKind::Protocol,
            _ => FaultKind::Server,
        }
    }

    /// Faults the UI must acknowledge before continuing.
    pub fn is_hard_fail(self) -> bool {
        matches!(
            self,
            FaultCode::BadResponse
                | FaultCode::ConfigError
                | FaultCode::EngineInitError
                | FaultCode::WrongProtocol
                | FaultCode::ApiVersionNotSupported
                | FaultCode::UnknownMethodName
        )
    }

    /// Human-readable message for the code.
    pub fn message(self) -> &'static str {
        use FaultCode::*;
        match self {
            Internal => "Internal server error.",
            MaintenanceMode => "The service is down for maintenance. Please try again later.",
            UrlParamMissingMethod
            | UrlParamMissingAuthToken
            | UrlParamMissingPartnerId
            | UrlParamMissingUserId => "The request was missing a required parameter.",
            SecureProtocolRequired => "A secure connection is required for this request.",
            CertificateRequired => "A client certificate is required.",
            ParameterTypeMismatch | ParameterMissing | ParameterValueInvalid => {
                "The request contained an invalid parameter."
            }
            ApiVersionNotSupported => "This client version is no longer supported.",
            LicensingRestrictions => "The service is not available in your country.",
            InsufficientConnectivity => "Insufficient connectivity. Check your network connection.",
            UnknownMethodName => "The server did not recognise the request.",
            WrongProtocol => "The request used the wrong protocol.",
            ReadOnlyMode => "The service is in read-only mode. Please try again later.",
            InvalidAuthToken => "Your session has expired.",
            InvalidLogin => "Invalid username or password.",
            ListenerNotAuthorized => "Your account is not authorized to listen.",
            UserNotAuthorized => "Your account is not authorized for this action.",
            MaxStationsReached => "You have reached the maximum number of stations.",
            StationDoesNotExist => "The station no longer exists.",
            CallNotAllowed => "This action is not allowed for your account.",
            PartnerNotAuthorized => "The client's partner credentials were rejected.",
            InvalidUsername => "Invalid username.",
            InvalidPassword => "Invalid password.",
            DeviceDisabled => "This device has been disabled.",
            PlaylistExceeded => "You have reached the daily skip limit for this station.",
            UnknownError => "An unknown error occurred.",
            NoAudioUrls => "No playable audio was returned for this track.",
            EndOfPlaylist => "The station has no more songs to play.",
            StreamError => "The audio stream could not be opened.",
            EngineInitError => "The audio engine could not be initialized.",
            ConfigError => "The client configuration is invalid.",
            NetworkError => "A network error occurred. Check your connection.",
            BadResponse => "The server returned an invalid response.",
            NotConnected => "Not connected.",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// A fault raised by the server or by the client itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

impl Fault {
    /// Fault with the code's default message.
    pub fn new(code: FaultCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
        }
    }

    pub fn with_message(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault decoded from a `stat: fail` envelope.
    pub fn from_server(raw_code: i64, message: Option<String>) -> Self {
        let code = FaultCode::from_code(raw_code);
        match message {
            Some(message) if !message.is_empty() => Self { code, message },
            _ => Self::new(code),
        }
    }

    pub fn bad_response(detail: impl fmt::Display) -> Self {
        Self::with_message(
            FaultCode::BadResponse,
            format!("{} ({})", FaultCode::BadResponse.message(), detail),
        )
    }

    pub fn kind(&self) -> FaultKind {
        self.code.kind()
    }

    pub fn is_hard_fail(&self) -> bool {
        self.code.is_hard_fail()
    }
}

impl From<BridgeError> for Fault {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::NotAvailable(capability) => Fault::with_message(
                FaultCode::ConfigError,
                format!("Host capability not available: {}", capability),
            ),
            BridgeError::StreamOpen(detail) => Fault::with_message(FaultCode::StreamError, detail),
            other => Fault::with_message(FaultCode::NetworkError, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Fault {
    fn from(error: serde_json::Error) -> Self {
        Fault::bad_response(error)
    }
}

pub type Result<T> = std::result::Result<T, Fault>;
