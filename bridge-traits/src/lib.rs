//! # Host Bridge Traits
//!
//! Capability contracts the radio core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to sockets or audio devices directly. Every side
//! effect goes through one of the traits below, and each host (desktop today)
//! ships an adapter crate implementing them.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with retry, TLS and proxy support
//!
//! ### Audio
//! - [`PlaybackEngine`](playback::PlaybackEngine) - Opaque decode/output engine
//!   that accepts a stream URL and reports state changes over a broadcast channel
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! convert platform errors into it and keep the message actionable (URL,
//! status code, proxy address).
//!
//! ## Thread Safety
//!
//! Bridge traits require `Send + Sync` so adapters can be shared across
//! tasks behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod playback;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ProxyConfig, RetryPolicy};
pub use playback::{EngineEvent, EngineState, PlaybackEngine};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
