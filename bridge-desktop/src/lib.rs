//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with rustls, retry with exponential
//!   backoff, and a proxy that can be swapped while the client is shared
//!
//! The playback engine is not provided here; desktop hosts plug in their
//! own audio stack through `bridge_traits::PlaybackEngine`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let config = CoreConfig::builder().http_client(http_client);
//! ```

mod http;

pub use http::ReqwestHttpClient;
