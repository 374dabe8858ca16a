//! # Player Events
//!
//! Typed publish/subscribe channel between the player orchestrator and the UI,
//! built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per concern (session, catalog, player) wrapped
//!   in [`CoreEvent`], plus a single [`ExceptionEvent`] funnel for failures
//! - **EventBus**: broadcast sender owned by whoever creates it; the player
//!   creates its own bus, there is no process-wide instance
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! ```text
//! ┌──────────────┐   emit    ┌──────────┐  subscribe  ┌────────────┐
//! │    Player    ├──────────>│ EventBus ├────────────>│  UI layer  │
//! └──────────────┘           └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Session(SessionEvent::LoginStatus {
//!     message: "Logging in".to_string(),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Login status update");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and can
//!   keep receiving. Progress events are the usual cause.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.

use bridge_traits::playback::EngineState;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Per-subscriber backlog used by `EventBus::default()`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Payload snapshots
// ============================================================================

/// User rating attached to a song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Rating {
    #[default]
    None,
    Love,
    Ban,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::None => write!(f, "none"),
            Rating::Love => write!(f, "love"),
            Rating::Ban => write!(f, "ban"),
        }
    }
}

/// Orchestrator state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlayerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    StationLoading,
    StationLoaded,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Station fields the UI needs to render a list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: String,
    pub name: String,
    pub is_quick_mix: bool,
    pub art_url: Option<String>,
}

/// Song fields the UI needs to render a now-playing or history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongInfo {
    pub track_token: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub station_id: String,
    pub album_art_url: Option<String>,
    pub rating: Rating,
    pub tired: bool,
}

/// Kind of a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchHitKind {
    Song,
    Artist,
}

/// One search result that a station can be seeded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub music_token: String,
    pub kind: SearchHitKind,
    /// "Artist" for artists, "Title by Artist" for songs.
    pub display_name: String,
    pub score: u32,
}

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Session(SessionEvent),
    Catalog(CatalogEvent),
    Player(PlayerEvent),
    /// Single failure funnel for every background command.
    Exception(ExceptionEvent),
}

impl CoreEvent {
    /// Short label for logs and debug UIs.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
            CoreEvent::Player(e) => e.description(),
            CoreEvent::Exception(_) => "Command failed",
        }
    }

    /// Log level the event deserves. Hard failures rank as errors.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Exception(ExceptionEvent {
                hard_fail: true, ..
            }) => EventSeverity::Error,
            CoreEvent::Exception(_) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::Connection {
                connected: false, ..
            }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::Connection { .. }) => EventSeverity::Info,
            CoreEvent::Player(PlayerEvent::SongStarted { .. }) => EventSeverity::Info,
            CoreEvent::Player(PlayerEvent::PlaybackProgress { .. }) => EventSeverity::Debug,
            _ => EventSeverity::Debug,
        }
    }
}

/// How loudly an event should be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Connection lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Result of a connect attempt, or a disconnect (`connected == false`,
    /// no fault).
    Connection {
        connected: bool,
        /// Numeric fault code when the attempt failed.
        fault_code: Option<u32>,
        subscriber: bool,
    },
    /// Free-form progress text shown on the login page.
    LoginStatus { message: String },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::Connection {
                connected: true, ..
            } => "Connected",
            SessionEvent::Connection { .. } => "Disconnected",
            SessionEvent::LoginStatus { .. } => "Login status update",
        }
    }
}

// ============================================================================
// Catalog Events
// ============================================================================

/// Station list and station management.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    StationsRefreshing,
    StationsRefreshed { stations: Vec<StationInfo> },
    StationCreated { station: StationInfo },
    StationRenamed { station: StationInfo },
    StationDeleted { station_id: String },
    QuickMixSaved { station_ids: Vec<String> },
    SearchResults { query: String, hits: Vec<SearchHit> },
}

impl CatalogEvent {
    fn description(&self) -> &str {
        match self {
            CatalogEvent::StationsRefreshing => "Refreshing stations",
            CatalogEvent::StationsRefreshed { .. } => "Stations refreshed",
            CatalogEvent::StationCreated { .. } => "Station created",
            CatalogEvent::StationRenamed { .. } => "Station renamed",
            CatalogEvent::StationDeleted { .. } => "Station deleted",
            CatalogEvent::QuickMixSaved { .. } => "QuickMix saved",
            CatalogEvent::SearchResults { .. } => "Search results",
        }
    }
}

// ============================================================================
// Player Events
// ============================================================================

/// Station selection, track changes and engine state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlayerEvent {
    StateChanged {
        old: PlayerState,
        new: PlayerState,
    },
    StationLoading {
        station: StationInfo,
    },
    StationLoaded {
        station: StationInfo,
    },
    SongStarted {
        song: SongInfo,
    },
    SongUpdated {
        song: SongInfo,
    },
    PlayedSongAdded {
        song: SongInfo,
    },
    PlayedSongRemoved {
        song: SongInfo,
    },
    PlaybackStateChanged {
        old: EngineState,
        new: EngineState,
    },
    PlaybackProgress {
        elapsed_ms: u64,
        total_ms: u64,
    },
}

impl PlayerEvent {
    fn description(&self) -> &str {
        match self {
            PlayerEvent::StateChanged { .. } => "Player state changed",
            PlayerEvent::StationLoading { .. } => "Loading station",
            PlayerEvent::StationLoaded { .. } => "Station loaded",
            PlayerEvent::SongStarted { .. } => "Song started",
            PlayerEvent::SongUpdated { .. } => "Song updated",
            PlayerEvent::PlayedSongAdded { .. } => "Song added to history",
            PlayerEvent::PlayedSongRemoved { .. } => "Song removed from history",
            PlayerEvent::PlaybackStateChanged { .. } => "Playback state changed",
            PlayerEvent::PlaybackProgress { .. } => "Playback progress",
        }
    }
}

/// Failure surfaced to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionEvent {
    /// Numeric fault code (server codes below 9000, client codes above).
    pub code: u32,
    /// Human-readable message derived from the code.
    pub message: String,
    /// The UI must require acknowledgement/restart instead of dismissing.
    pub hard_fail: bool,
}

impl From<SessionEvent> for CoreEvent {
    fn from(event: SessionEvent) -> Self {
        CoreEvent::Session(event)
    }
}

impl From<CatalogEvent> for CoreEvent {
    fn from(event: CatalogEvent) -> Self {
        CoreEvent::Catalog(event)
    }
}

impl From<PlayerEvent> for CoreEvent {
    fn from(event: PlayerEvent) -> Self {
        CoreEvent::Player(event)
    }
}

impl From<ExceptionEvent> for CoreEvent {
    fn from(event: ExceptionEvent) -> Self {
        CoreEvent::Exception(event)
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus clones the sender; every clone publishes into the same
/// channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Bus holding up to `capacity` undelivered events per subscriber.
    ///
    /// A subscriber further behind than that gets `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fan `event` out to current subscribers.
    ///
    /// Errors when nobody is subscribed; the player ignores that case.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events rejected by a filter.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    ///
    /// ```rust
    /// use core_runtime::events::{CoreEvent, EventBus, EventStream};
    ///
    /// let bus = EventBus::new(16);
    /// let failures = EventStream::new(bus.subscribe())
    ///     .filter(|event| matches!(event, CoreEvent::Exception(_)));
    /// ```
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind, `RecvError::Closed`
    /// once all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(missed)) => return Some(Err(RecvError::Lagged(missed))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
