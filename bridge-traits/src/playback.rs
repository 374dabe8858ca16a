//! Playback engine bridge.
//!
//! The core does not decode audio. It hands a stream URL and a replay-gain
//! adjustment to a host-provided engine and listens to the engine's event
//! channel to learn when a track starts, progresses and ends.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;

/// State reported by the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
    Stopped,
    /// The current track played to its end.
    Ended,
    /// The engine failed to open or decode the current stream.
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Buffering => "buffering",
            EngineState::Playing => "playing",
            EngineState::Paused => "paused",
            EngineState::Stopped => "stopped",
            EngineState::Ended => "ended",
            EngineState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged { old: EngineState, new: EngineState },
    Progress { elapsed: Duration, total: Duration },
    Started { duration: Duration },
    DownloadComplete,
    DownloadCanceled,
}

/// Opaque audio decode/output engine.
///
/// `play` returns once the stream has been opened; an `Err` means the URL
/// could not be opened and the caller decides whether to retry with a fresh
/// playlist. Implementations publish [`EngineEvent`]s on a broadcast channel
/// handed out by [`subscribe`](PlaybackEngine::subscribe).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::playback::{EngineEvent, PlaybackEngine};
///
/// async fn play_one(engine: &dyn PlaybackEngine, url: &str) -> Result<()> {
///     let mut events = engine.subscribe();
///     engine.play(url, -3.5).await?;
///     while let Ok(event) = events.recv().await {
///         if matches!(event, EngineEvent::DownloadComplete) {
///             break;
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Open `url` and start playing it with `gain_db` applied.
    async fn play(&self, url: &str, gain_db: f32) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn seek(&self, position: Duration) -> Result<()>;

    /// Current engine state.
    fn state(&self) -> EngineState;

    /// New receiver for engine events. Past events are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
