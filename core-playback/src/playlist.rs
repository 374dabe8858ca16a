//! # Playlist Buffer
//!
//! Prefetched queue of upcoming songs plus a bounded history of played ones.
//!
//! ## Design
//!
//! - **Pending**: FIFO guarded by a mutex; each song is handed out once
//! - **Low-watermark**: `PlaylistLow` fires when the remaining count drops to
//!   `low_playlist_count`, at most once until a non-empty refill re-arms it
//! - **Expiry**: a stale song discards the whole pending queue and requests a
//!   reload instead of being played
//! - **Waiting**: `next_song` waits up to `reload_timeout` for a refill; the
//!   buffer never fetches anything itself
//! - **History**: only played songs enter it; overflow evicts the oldest

use crate::error::{PlaybackError, Result};
use bridge_traits::time::Clock;
use core_catalog::Song;
use core_runtime::config::PlayerSettings;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Notifications published by a [`PlaylistBuffer`].
#[derive(Debug, Clone)]
pub enum PlaylistEvent {
    /// The pending queue is at or below the low-watermark; fetch more.
    PlaylistLow { remaining: usize },
    /// `next_song` gave up: the last reload was empty or never arrived.
    Exhausted,
    /// Stale songs were dropped from the pending queue.
    Expired { discarded: usize },
    PlayedSongAdded { song: Arc<Song> },
    PlayedSongRemoved { song: Arc<Song> },
    /// Pending songs were dropped by `clear`.
    Cleared,
}

/// Buffer policy, usually taken from [`PlayerSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    pub low_playlist_count: usize,
    pub max_played: usize,
    pub reload_timeout: Duration,
    pub song_validity: Duration,
}

impl BufferSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_played == 0 {
            return Err(PlaybackError::InvalidSettings(
                "max_played must be at least 1".to_string(),
            ));
        }
        if self.reload_timeout.is_zero() || self.song_validity.is_zero() {
            return Err(PlaybackError::InvalidSettings(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&PlayerSettings> for BufferSettings {
    fn from(settings: &PlayerSettings) -> Self {
        Self {
            low_playlist_count: settings.low_playlist_count,
            max_played: settings.max_played,
            reload_timeout: settings.reload_timeout,
            song_validity: settings.song_validity,
        }
    }
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Arc<Song>>,
    history: VecDeque<Arc<Song>>,
    current: Option<Arc<Song>>,
    low_fired: bool,
    exhausted: bool,
}

enum Step {
    Song(Arc<Song>),
    Exhausted,
    Wait,
}

pub struct PlaylistBuffer {
    inner: Mutex<Inner>,
    refilled: Notify,
    events: broadcast::Sender<PlaylistEvent>,
    clock: Arc<dyn Clock>,
    settings: BufferSettings,
}

impl PlaylistBuffer {
    pub fn new(settings: BufferSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            refilled: Notify::new(),
            events,
            clock,
            settings,
        })
    }

    pub fn settings(&self) -> BufferSettings {
        self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaylistEvent> {
        self.events.subscribe()
    }

    /// Append a fetched batch and wake waiting consumers.
    ///
    /// An empty batch marks the buffer exhausted instead of failing; a
    /// non-empty one clears that mark and re-arms the low-watermark.
    pub fn add_songs(&self, songs: Vec<Arc<Song>>) -> usize {
        let count = songs.len();
        let pending = {
            let mut inner = self.inner.lock();
            if count == 0 {
                inner.exhausted = true;
            } else {
                inner.exhausted = false;
                inner.low_fired = false;
                inner.pending.extend(songs);
            }
            inner.pending.len()
        };

        debug!(added = count, pending, "Songs added to playlist");
        self.refilled.notify_waiters();
        count
    }

    /// Dequeue the next playable song, waiting up to `reload_timeout` for a
    /// refill when none is queued.
    pub async fn next_song(&self) -> Result<Arc<Song>> {
        let deadline = Instant::now() + self.settings.reload_timeout;

        loop {
            let mut refilled = std::pin::pin!(self.refilled.notified());
            refilled.as_mut().enable();

            match self.try_next() {
                Step::Song(song) => return Ok(song),
                Step::Exhausted => return Err(self.exhausted()),
                Step::Wait => {}
            }

            if timeout_at(deadline, refilled).await.is_err() {
                warn!(
                    timeout_secs = self.settings.reload_timeout.as_secs(),
                    "Timed out waiting for playlist reload"
                );
                return Err(self.exhausted());
            }
        }
    }

    fn exhausted(&self) -> PlaybackError {
        let _ = self.events.send(PlaylistEvent::Exhausted);
        PlaybackError::EndOfPlaylist
    }

    fn try_next(&self) -> Step {
        let now = self.clock.now();
        let mut events = Vec::new();

        let step = {
            let mut inner = self.inner.lock();
            match inner.pending.pop_front() {
                Some(song) if !song.is_valid(now, self.settings.song_validity) => {
                    let discarded = 1 + inner.pending.len();
                    inner.pending.clear();
                    inner.low_fired = true;
                    // an earlier empty batch must not short-circuit the reload
                    inner.exhausted = false;
                    info!(discarded, "Playlist expired, reloading");
                    events.push(PlaylistEvent::Expired { discarded });
                    events.push(PlaylistEvent::PlaylistLow { remaining: 0 });
                    Step::Wait
                }
                Some(song) => {
                    self.rotate_current(&mut inner, song.clone(), &mut events);
                    let remaining = inner.pending.len();
                    if remaining <= self.settings.low_playlist_count && !inner.low_fired {
                        inner.low_fired = true;
                        events.push(PlaylistEvent::PlaylistLow { remaining });
                    }
                    Step::Song(song)
                }
                None if inner.exhausted => Step::Exhausted,
                None => {
                    if !inner.low_fired {
                        inner.low_fired = true;
                        events.push(PlaylistEvent::PlaylistLow { remaining: 0 });
                    }
                    Step::Wait
                }
            }
        };

        for event in events {
            let _ = self.events.send(event);
        }
        step
    }

    fn rotate_current(
        &self,
        inner: &mut Inner,
        next: Arc<Song>,
        events: &mut Vec<PlaylistEvent>,
    ) {
        if let Some(previous) = inner.current.replace(next) {
            self.file_played(inner, previous, events);
        }
    }

    // Skipped songs never enter history.
    fn file_played(&self, inner: &mut Inner, song: Arc<Song>, events: &mut Vec<PlaylistEvent>) {
        if !song.is_played() {
            return;
        }

        inner.history.push_back(song.clone());
        events.push(PlaylistEvent::PlayedSongAdded { song });

        while inner.history.len() > self.settings.max_played {
            if let Some(evicted) = inner.history.pop_front() {
                events.push(PlaylistEvent::PlayedSongRemoved { song: evicted });
            }
        }
    }

    /// File the current song into history (if played) without dequeuing.
    pub fn retire_current(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.current.take() {
                self.file_played(&mut inner, previous, &mut events);
            }
        }
        for event in events {
            let _ = self.events.send(event);
        }
    }

    /// Drop pending songs. History and the current song are kept.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.pending.clear();
            inner.low_fired = false;
            inner.exhausted = false;
        }
        let _ = self.events.send(PlaylistEvent::Cleared);
    }

    /// Drop everything, history and current song included.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
        let _ = self.events.send(PlaylistEvent::Cleared);
    }

    pub fn current(&self) -> Option<Arc<Song>> {
        self.inner.lock().current.clone()
    }

    /// Played songs, oldest first.
    pub fn history(&self) -> Vec<Arc<Song>> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }
}

impl fmt::Debug for PlaylistBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PlaylistBuffer")
            .field("pending", &inner.pending.len())
            .field("history", &inner.history.len())
            .field("low_fired", &inner.low_fired)
            .field("exhausted", &inner.exhausted)
            .field("settings", &self.settings)
            .finish()
    }
}
