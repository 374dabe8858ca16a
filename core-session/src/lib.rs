//! # Session Module
//!
//! Authenticated RPC client for the tuner service.
//!
//! ## Overview
//!
//! [`SessionClient`] performs the two-step partner/user login, encrypts
//! request bodies with a pluggable [`BodyCipher`], decodes the fault envelope
//! of every response, and transparently reauthenticates once when the server
//! rejects an expired token.
//!
//! ## Features
//!
//! - Closed fault taxonomy ([`FaultCode`], [`FaultKind`]) with user-facing messages
//! - Single in-flight reauthentication shared by concurrent callers
//! - Typed helpers for stations, playlists, feedback, search and bookmarks
//! - `FakeTuner` scripted server behind the `test-support` feature

pub mod cipher;
pub mod client;
pub mod envelope;
pub mod error;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cipher::{BlowfishCipher, BodyCipher};
pub use client::{additional_audio_format, SessionClient, DEFAULT_REAUTH_WAIT};
pub use error::{Fault, FaultCode, FaultKind, Result};
pub use session::{Credentials, Session};
pub use types::{
    AdditionalAudioUrl, ArtistMatch, AudioUrl, AudioUrlMap, FeedbackRecord, PlaylistItem,
    SearchResult, SongMatch, StationDetails, StationFeedback, StationRecord, StationSeed,
};
