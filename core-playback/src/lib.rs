//! # Playback Module
//!
//! Playlist prefetch buffer sitting between station playlist fetches and the
//! playback engine.
//!
//! ## Overview
//!
//! [`PlaylistBuffer`] decouples network latency from playback continuity:
//! producers append fetched batches, the consumer dequeues one song at a
//! time, and [`PlaylistEvent`]s tell the owner when to fetch more. All I/O
//! stays with the owner; the buffer only waits and times out.

pub mod error;
pub mod playlist;

pub use error::{PlaybackError, Result};
pub use playlist::{BufferSettings, PlaylistBuffer, PlaylistEvent};
