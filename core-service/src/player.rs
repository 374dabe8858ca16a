//! # Player
//!
//! Orchestrates the session client, the station catalog, the playlist buffer
//! and the host playback engine.
//!
//! ## Commands
//!
//! Every command returns a [`TaskHandle`] immediately and runs on the
//! [`TaskPool`]. Failures never surface as return values; they are published
//! as [`CoreEvent::Exception`]. Commands that need a loaded station are
//! no-ops without one.
//!
//! ## Generations
//!
//! Loading a station, stopping and disconnecting start a new generation.
//! Work started under an older generation is cancelled where it waits and
//! its late results are discarded. A connect is tied to the session epoch
//! instead, which only `disconnect` moves.
//!
//! Advances never overlap: a station load holds the advance slot from the
//! first fetch until its first song is playing.
//!
//! ## Background loops
//!
//! - engine events: progress and state are republished; a track end
//!   advances, an engine error counts as a stream failure
//! - playlist events: `PlaylistLow` triggers a refill, history changes are
//!   republished

use crate::error::Result;
use crate::tasks::{InFlight, TaskHandle, TaskPool};
use bridge_traits::http::ProxyConfig;
use bridge_traits::playback::{EngineEvent, EngineState, PlaybackEngine};
use core_catalog::{Catalog, CatalogError, Song, Station};
use core_playback::{BufferSettings, PlaybackError, PlaylistBuffer, PlaylistEvent};
use core_runtime::config::{AudioFormat, CoreConfig, StationSortOrder};
use core_runtime::events::{
    CatalogEvent, CoreEvent, EventBus, EventStream, PlayerEvent, PlayerState, Rating, Receiver,
    RecvError, SearchHit, SessionEvent, StationInfo,
};
use core_session::{Fault, FaultCode, SessionClient};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Internet radio player.
///
/// Must be created inside a Tokio runtime; the background loops are spawned
/// on construction and stop when the player is dropped.
pub struct Player {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Generation {
    id: u64,
    cancel: CancellationToken,
}

impl Generation {
    fn is_stale(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Inner {
    client: Arc<SessionClient>,
    catalog: Catalog,
    buffer: Arc<PlaylistBuffer>,
    engine: Arc<dyn PlaybackEngine>,
    bus: EventBus,
    pool: TaskPool,
    shutdown: CancellationToken,
    audio_format: RwLock<AudioFormat>,
    stream_retry_budget: u32,
    state: Mutex<PlayerState>,
    station: RwLock<Option<Arc<Station>>>,
    generation: Mutex<Generation>,
    session_epoch: AtomicU64,
    stream_failures: AtomicU32,
    play_serial: AtomicU64,
    ended_serial: AtomicU64,
    advancing: InFlight,
    rating: InFlight,
    play_pause: InFlight,
    fetching: InFlight,
}

impl Player {
    pub fn new(config: CoreConfig) -> Result<Self> {
        let settings = config.settings.clone();
        let client = Arc::new(SessionClient::from_config(&config)?);
        let catalog = Catalog::new(
            client.clone(),
            config.clock.clone(),
            settings.station_sort_order,
        );
        let buffer = Arc::new(PlaylistBuffer::new(
            BufferSettings::from(&settings),
            config.clock.clone(),
        )?);
        let bus = EventBus::new(settings.event_buffer);
        let pool = TaskPool::new(settings.worker_count, bus.clone());
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            client,
            catalog,
            buffer,
            engine: config.playback_engine.clone(),
            bus,
            pool,
            generation: Mutex::new(Generation {
                id: 0,
                cancel: shutdown.child_token(),
            }),
            shutdown,
            session_epoch: AtomicU64::new(0),
            audio_format: RwLock::new(settings.audio_format),
            stream_retry_budget: settings.stream_retry_budget,
            state: Mutex::new(PlayerState::Disconnected),
            station: RwLock::new(None),
            stream_failures: AtomicU32::new(0),
            play_serial: AtomicU64::new(0),
            ended_serial: AtomicU64::new(0),
            advancing: InFlight::default(),
            rating: InFlight::default(),
            play_pause: InFlight::default(),
            fetching: InFlight::default(),
        });

        spawn_engine_listener(&inner);
        spawn_playlist_listener(&inner);

        let player = Self { inner };
        if settings.proxy.is_some() {
            player.set_proxy(settings.proxy);
        }

        info!(
            workers = settings.worker_count,
            format = %settings.audio_format,
            "Player created"
        );
        Ok(player)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn state(&self) -> PlayerState {
        *self.inner.state.lock()
    }

    pub fn current_station(&self) -> Option<Arc<Station>> {
        self.inner.current_station()
    }

    pub fn current_song(&self) -> Option<Arc<Song>> {
        self.inner.buffer.current()
    }

    /// Played songs, oldest first.
    pub fn history(&self) -> Vec<Arc<Song>> {
        self.inner.buffer.history()
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.inner.catalog.stations()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.is_authenticated()
    }

    pub fn is_subscriber(&self) -> bool {
        self.inner.client.is_subscriber()
    }

    pub fn audio_format(&self) -> AudioFormat {
        *self.inner.audio_format.read()
    }

    pub fn sort_order(&self) -> StationSortOrder {
        self.inner.catalog.sort_order()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.bus.subscribe()
    }

    /// Event stream for the UI layer; chain `.filter(..)` to narrow it.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.inner.bus.subscribe())
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Log in and load the station list. Ignored unless disconnected.
    pub fn connect(&self, username: &str, password: &str) -> TaskHandle {
        if !self
            .inner
            .transition(PlayerState::Disconnected, PlayerState::Connecting)
        {
            debug!(state = %self.state(), "Connect ignored");
            return TaskHandle::skipped();
        }

        let epoch = self.inner.session_epoch.load(Ordering::SeqCst);
        let inner = self.inner.clone();
        let username = username.to_string();
        let password = password.to_string();
        self.inner.pool.spawn("connect", async move {
            inner.connect(&username, &password, epoch).await
        })
    }

    pub fn disconnect(&self) -> TaskHandle {
        self.inner.session_epoch.fetch_add(1, Ordering::SeqCst);
        let generation = self.inner.next_generation();
        let inner = self.inner.clone();
        self.inner.pool.spawn("disconnect", async move {
            inner.disconnect(generation).await
        })
    }

    pub fn refresh_stations(&self) -> TaskHandle {
        let inner = self.inner.clone();
        self.inner
            .pool
            .spawn("refresh_stations", async move { inner.refresh_stations().await })
    }

    // ------------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------------

    /// Load a station by id, or by name when no id matches, and start its
    /// first song.
    pub fn play_station(&self, station: &str) -> TaskHandle {
        let generation = self.inner.next_generation();
        let inner = self.inner.clone();
        let selector = station.to_string();
        self.inner.pool.spawn("play_station", async move {
            inner.load_station(&selector, generation).await
        })
    }

    /// Stop playback and unload the current station.
    pub fn stop(&self) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let generation = self.inner.next_generation();
        let inner = self.inner.clone();
        self.inner.pool.spawn("stop", async move {
            inner.unload_station(&generation).await;
            Ok(())
        })
    }

    /// Skip to the next song.
    pub fn next(&self) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        self.inner.spawn_advance("next")
    }

    pub fn play_pause(&self) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let Some(guard) = self.inner.play_pause.try_acquire() else {
            debug!("Play/pause already in flight");
            return TaskHandle::skipped();
        };

        let inner = self.inner.clone();
        self.inner.pool.spawn("play_pause", async move {
            let _guard = guard;
            inner.toggle_pause().await
        })
    }

    // ------------------------------------------------------------------------
    // Song commands
    // ------------------------------------------------------------------------

    pub fn rate(&self, song: Arc<Song>, rating: Rating) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let Some(guard) = self.inner.rating.try_acquire() else {
            debug!("Rating already in flight");
            return TaskHandle::skipped();
        };

        let inner = self.inner.clone();
        self.inner.pool.spawn("rate", async move {
            let _guard = guard;
            inner.rate(song, rating).await
        })
    }

    /// Love the current song.
    pub fn thumb_up(&self) -> TaskHandle {
        match self.current_song() {
            Some(song) => self.rate(song, Rating::Love),
            None => TaskHandle::skipped(),
        }
    }

    /// Ban the current song and skip it.
    pub fn thumb_down(&self) -> TaskHandle {
        match self.current_song() {
            Some(song) => self.rate(song, Rating::Ban),
            None => TaskHandle::skipped(),
        }
    }

    /// Shelve `song` for a month. Skips it when it is playing.
    pub fn tired(&self, song: Arc<Song>) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let inner = self.inner.clone();
        self.inner.pool.spawn("tired", async move {
            song.set_tired().await?;
            inner.emit(PlayerEvent::SongUpdated { song: song.info() });
            if inner.is_current(&song) {
                inner.spawn_advance("skip_tired");
            }
            Ok(())
        })
    }

    pub fn bookmark_song(&self, song: Arc<Song>) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        self.inner.pool.spawn("bookmark_song", async move {
            song.bookmark().await?;
            Ok(())
        })
    }

    pub fn bookmark_artist(&self, song: Arc<Song>) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        self.inner.pool.spawn("bookmark_artist", async move {
            song.bookmark_artist().await?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Station management
    // ------------------------------------------------------------------------

    /// Results arrive as [`CatalogEvent::SearchResults`].
    pub fn search(&self, query: &str) -> TaskHandle {
        let inner = self.inner.clone();
        let query = query.to_string();
        self.inner.pool.spawn("search", async move {
            let hits = inner.catalog.search(&query).await?;
            inner.emit(CatalogEvent::SearchResults { query, hits });
            Ok(())
        })
    }

    pub fn create_station_from_hit(&self, hit: &SearchHit) -> TaskHandle {
        let inner = self.inner.clone();
        let music_token = hit.music_token.clone();
        self.inner.pool.spawn("create_station", async move {
            let station = inner.catalog.create_from_music_token(&music_token).await?;
            inner.station_created(&station);
            Ok(())
        })
    }

    pub fn create_station_from_song(&self, song: Arc<Song>) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let inner = self.inner.clone();
        self.inner.pool.spawn("create_station_from_song", async move {
            let station = inner.catalog.create_from_song(&song).await?;
            inner.station_created(&station);
            Ok(())
        })
    }

    pub fn create_station_from_artist(&self, song: Arc<Song>) -> TaskHandle {
        if self.inner.current_station().is_none() {
            return TaskHandle::skipped();
        }
        let inner = self.inner.clone();
        self.inner.pool.spawn("create_station_from_artist", async move {
            let station = inner.catalog.create_from_artist(&song).await?;
            inner.station_created(&station);
            Ok(())
        })
    }

    pub fn rename_station(&self, station_id: &str, name: &str) -> TaskHandle {
        let inner = self.inner.clone();
        let station_id = station_id.to_string();
        let name = name.to_string();
        self.inner.pool.spawn("rename_station", async move {
            let station = inner.catalog.rename_station(&station_id, &name).await?;
            inner.emit(CatalogEvent::StationRenamed {
                station: station.info(),
            });
            inner.refresh_stations().await
        })
    }

    /// Delete a station. Deleting the playing station stops playback.
    pub fn delete_station(&self, station_id: &str) -> TaskHandle {
        let inner = self.inner.clone();
        let station_id = station_id.to_string();
        self.inner.pool.spawn("delete_station", async move {
            inner.catalog.delete_station(&station_id).await?;

            let was_playing = inner
                .current_station()
                .is_some_and(|current| current.id == station_id);
            if was_playing {
                let generation = inner.next_generation();
                inner.unload_station(&generation).await;
            }

            inner.emit(CatalogEvent::StationDeleted { station_id });
            inner.refresh_stations().await
        })
    }

    pub fn save_quick_mix(&self, station_ids: Vec<String>) -> TaskHandle {
        let inner = self.inner.clone();
        self.inner.pool.spawn("save_quick_mix", async move {
            inner.catalog.save_quick_mix(&station_ids).await?;
            inner.emit(CatalogEvent::QuickMixSaved { station_ids });
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Takes effect on the next playlist fetch.
    pub fn set_audio_format(&self, format: AudioFormat) {
        *self.inner.audio_format.write() = format;
        info!(%format, "Audio format changed");
    }

    pub fn set_station_sort_order(&self, order: StationSortOrder) -> TaskHandle {
        let inner = self.inner.clone();
        self.inner.pool.spawn("set_station_sort_order", async move {
            inner.catalog.sort(order).await;
            inner.emit(CatalogEvent::StationsRefreshed {
                stations: inner.station_infos(),
            });
            Ok(())
        })
    }

    /// Route HTTP traffic through `proxy`, or connect directly with `None`.
    pub fn set_proxy(&self, proxy: Option<ProxyConfig>) -> TaskHandle {
        let inner = self.inner.clone();
        self.inner.pool.spawn("set_proxy", async move {
            inner.client.http_client().configure_proxy(proxy).await?;
            Ok(())
        })
    }

    /// Stop the background loops and cancel waiting commands.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("state", &self.state())
            .field("station", &self.current_station().map(|s| s.id.clone()))
            .field("buffer", &self.inner.buffer)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Command bodies
// ============================================================================

impl Inner {
    fn emit(&self, event: impl Into<CoreEvent>) {
        let _ = self.bus.emit(event.into());
    }

    fn set_state(&self, new: PlayerState) {
        let old = {
            let mut state = self.state.lock();
            if *state == new {
                return;
            }
            std::mem::replace(&mut *state, new)
        };
        debug!(%old, %new, "Player state changed");
        self.emit(PlayerEvent::StateChanged { old, new });
    }

    fn transition(&self, expected: PlayerState, new: PlayerState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != expected {
                return false;
            }
            *state = new;
        }
        self.emit(PlayerEvent::StateChanged { old: expected, new });
        true
    }

    fn current_station(&self) -> Option<Arc<Station>> {
        self.station.read().clone()
    }

    fn is_current(&self, song: &Arc<Song>) -> bool {
        self.buffer
            .current()
            .is_some_and(|current| Arc::ptr_eq(&current, song))
    }

    fn current_generation(&self) -> Generation {
        self.generation.lock().clone()
    }

    /// Cancel the current generation and start the next one.
    fn next_generation(&self) -> Generation {
        let mut current = self.generation.lock();
        current.cancel.cancel();
        *current = Generation {
            id: current.id + 1,
            cancel: self.shutdown.child_token(),
        };
        debug!(generation = current.id, "New generation");
        current.clone()
    }

    fn station_infos(&self) -> Vec<StationInfo> {
        self.catalog.stations().iter().map(|s| s.info()).collect()
    }

    fn station_created(&self, station: &Station) {
        self.emit(CatalogEvent::StationCreated {
            station: station.info(),
        });
        self.emit(CatalogEvent::StationsRefreshed {
            stations: self.station_infos(),
        });
    }

    fn session_superseded(&self, epoch: u64) -> bool {
        self.session_epoch.load(Ordering::SeqCst) != epoch
    }

    /// Undo what a superseded connect wrote, unless a newer connect owns the
    /// session by now.
    fn abandon_connect(&self) {
        debug!("Connect superseded by disconnect");
        if *self.state.lock() == PlayerState::Disconnected {
            self.client.logout();
            self.catalog.clear();
        }
    }

    #[instrument(skip_all, fields(epoch = epoch))]
    async fn connect(&self, username: &str, password: &str, epoch: u64) -> Result<()> {
        self.emit(SessionEvent::LoginStatus {
            message: "Logging in".to_string(),
        });

        let outcome = match self.client.authenticate(username, password).await {
            Ok(()) if self.session_superseded(epoch) => {
                self.abandon_connect();
                return Ok(());
            }
            Ok(()) => {
                self.emit(SessionEvent::LoginStatus {
                    message: "Loading stations".to_string(),
                });
                self.refresh_stations().await
            }
            Err(fault) => Err(fault.into()),
        };
        if self.session_superseded(epoch) {
            self.abandon_connect();
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                let subscriber = self.client.is_subscriber();
                self.set_state(PlayerState::Connected);
                info!(subscriber, "Connected");
                self.emit(SessionEvent::Connection {
                    connected: true,
                    fault_code: None,
                    subscriber,
                });
            }
            Err(err) => {
                warn!(code = %err.fault_code(), error = %err, "Connect failed");
                self.client.logout();
                self.set_state(PlayerState::Disconnected);
                self.emit(SessionEvent::Connection {
                    connected: false,
                    fault_code: Some(err.fault_code().as_u32()),
                    subscriber: false,
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self, generation: Generation) -> Result<()> {
        if let Err(err) = self.engine.stop().await {
            warn!(error = %err, "Engine stop failed");
        }
        self.buffer.reset();
        *self.station.write() = None;
        self.catalog.clear();
        self.client.logout();
        self.set_state(PlayerState::Disconnected);
        self.emit(SessionEvent::Connection {
            connected: false,
            fault_code: None,
            subscriber: false,
        });
        info!(generation = generation.id, "Disconnected");
        Ok(())
    }

    async fn refresh_stations(&self) -> Result<()> {
        self.emit(CatalogEvent::StationsRefreshing);
        self.catalog.refresh().await?;

        // Keep the loaded station pointing at the refreshed entry.
        let refreshed = self
            .current_station()
            .and_then(|current| self.catalog.station_by_id(&current.id));
        if let Some(station) = refreshed {
            *self.station.write() = Some(station);
        }

        self.emit(CatalogEvent::StationsRefreshed {
            stations: self.station_infos(),
        });
        Ok(())
    }

    #[instrument(skip(self, generation), fields(generation = generation.id))]
    async fn load_station(&self, selector: &str, generation: Generation) -> Result<()> {
        let station = self
            .catalog
            .station_by_id(selector)
            .or_else(|| self.catalog.station_by_name(selector))
            .ok_or_else(|| CatalogError::StationNotFound(selector.to_string()))?;

        // An advance from the previous station may still be unwinding.
        let _advancing = tokio::select! {
            biased;
            _ = generation.cancel.cancelled() => return Ok(()),
            guard = self.advancing.acquire() => guard,
        };

        if let Err(err) = self.engine.stop().await {
            warn!(error = %err, "Engine stop failed");
        }
        if generation.is_stale() {
            return Ok(());
        }

        self.buffer.retire_current();
        self.buffer.clear();
        self.stream_failures.store(0, Ordering::SeqCst);
        *self.station.write() = Some(station.clone());
        self.set_state(PlayerState::StationLoading);
        self.emit(PlayerEvent::StationLoading {
            station: station.info(),
        });

        let format = *self.audio_format.read();
        let fetched = tokio::select! {
            biased;
            _ = generation.cancel.cancelled() => {
                debug!("Station load superseded");
                return Ok(());
            }
            fetched = station.fetch_playlist(format) => fetched,
        };
        let songs = match fetched {
            Ok(songs) => songs,
            Err(err) => {
                if !generation.is_stale() {
                    self.set_state(PlayerState::Error);
                }
                return Err(err.into());
            }
        };
        if generation.is_stale() {
            debug!("Station load superseded");
            return Ok(());
        }

        if self.buffer.add_songs(songs) == 0 {
            self.set_state(PlayerState::Stopped);
            return Err(PlaybackError::EndOfPlaylist.into());
        }

        self.set_state(PlayerState::StationLoaded);
        self.emit(PlayerEvent::StationLoaded {
            station: station.info(),
        });
        info!(station_id = %station.id, "Station loaded");

        self.advance(&generation).await
    }

    async fn unload_station(&self, generation: &Generation) {
        if let Err(err) = self.engine.stop().await {
            warn!(error = %err, "Engine stop failed");
        }
        self.buffer.retire_current();
        self.buffer.clear();
        *self.station.write() = None;
        self.set_state(PlayerState::Stopped);
        info!(generation = generation.id, "Playback stopped");
    }

    async fn toggle_pause(&self) -> Result<()> {
        match self.engine.state() {
            EngineState::Playing | EngineState::Buffering => {
                self.engine.pause().await?;
                self.set_state(PlayerState::Paused);
            }
            EngineState::Paused => {
                self.engine.resume().await?;
                self.set_state(PlayerState::Playing);
            }
            other => debug!(state = %other, "Nothing to pause or resume"),
        }
        Ok(())
    }

    async fn rate(self: &Arc<Self>, song: Arc<Song>, rating: Rating) -> Result<()> {
        song.rate(rating).await?;
        self.emit(PlayerEvent::SongUpdated { song: song.info() });

        if rating == Rating::Ban && self.is_current(&song) {
            self.spawn_advance("skip_banned");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Advance and refill
    // ------------------------------------------------------------------------

    /// Dispatch an advance unless one is already running.
    fn spawn_advance(self: &Arc<Self>, name: &'static str) -> TaskHandle {
        let Some(guard) = self.advancing.try_acquire() else {
            debug!(task = name, "Advance already in flight");
            return TaskHandle::skipped();
        };

        let inner = self.clone();
        let generation = self.current_generation();
        self.pool.spawn(name, async move {
            let _guard = guard;
            inner.advance(&generation).await
        })
    }

    /// Play the next buffered song, reloading after stream failures until the
    /// retry budget runs out.
    async fn advance(&self, generation: &Generation) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = generation.cancel.cancelled() => return Ok(()),
                next = self.buffer.next_song() => next,
            };
            let song = match next {
                Ok(song) => song,
                Err(_) if generation.is_stale() => return Ok(()),
                Err(err) => {
                    warn!(error = %err, "No song to advance to");
                    self.halt().await;
                    return Err(err.into());
                }
            };
            if generation.is_stale() {
                return Ok(());
            }

            match self.engine.play(&song.audio_url, song.gain_db).await {
                Ok(()) => {
                    if generation.is_stale() {
                        return Ok(());
                    }
                    song.mark_played();
                    self.play_serial.fetch_add(1, Ordering::SeqCst);
                    self.set_state(PlayerState::Playing);
                    info!(track_token = %song.track_token, "Song started");
                    self.emit(PlayerEvent::SongStarted { song: song.info() });
                    return Ok(());
                }
                Err(err) => {
                    warn!(track_token = %song.track_token, error = %err, "Stream failed to open");
                    self.recover_stream(generation).await?;
                }
            }
        }
    }

    /// Count a stream failure and reload the playlist, or stop once the
    /// budget is spent.
    async fn recover_stream(&self, generation: &Generation) -> Result<()> {
        let failures = self.stream_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.stream_retry_budget {
            self.stream_failures.store(0, Ordering::SeqCst);
            self.halt().await;
            return Err(Fault::new(FaultCode::StreamError).into());
        }

        info!(
            attempt = failures,
            budget = self.stream_retry_budget,
            "Reloading playlist after stream failure"
        );
        self.buffer.clear();
        self.reload(generation).await?;
        Ok(())
    }

    async fn halt(&self) {
        if let Err(err) = self.engine.stop().await {
            warn!(error = %err, "Engine stop failed");
        }
        self.set_state(PlayerState::Stopped);
    }

    /// Fetch a batch for the current station into the buffer.
    async fn reload(&self, generation: &Generation) -> Result<usize> {
        let Some(station) = self.current_station() else {
            return Ok(0);
        };
        let format = *self.audio_format.read();
        let songs = tokio::select! {
            biased;
            _ = generation.cancel.cancelled() => return Ok(0),
            fetched = station.fetch_playlist(format) => fetched?,
        };

        if generation.is_stale() {
            debug!(discarded = songs.len(), "Dropping stale playlist batch");
            return Ok(0);
        }
        Ok(self.buffer.add_songs(songs))
    }

    fn prefetch(self: &Arc<Self>) {
        if self.current_station().is_none() {
            return;
        }
        let Some(guard) = self.fetching.try_acquire() else {
            debug!("Playlist fetch already in flight");
            return;
        };

        let inner = self.clone();
        let generation = self.current_generation();
        self.pool.spawn_unbounded("prefetch", async move {
            let _guard = guard;
            inner.reload(&generation).await.map(|_| ())
        });
    }

    // ------------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------------

    fn on_engine_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::StateChanged { old, new } => {
                self.emit(PlayerEvent::PlaybackStateChanged { old, new });
                match new {
                    EngineState::Ended => self.track_finished(),
                    EngineState::Error => self.stream_failed(),
                    _ => {}
                }
            }
            EngineEvent::Progress { elapsed, total } => {
                self.stream_failures.store(0, Ordering::SeqCst);
                self.emit(PlayerEvent::PlaybackProgress {
                    elapsed_ms: millis(elapsed),
                    total_ms: millis(total),
                });
            }
            EngineEvent::Started { duration } => {
                debug!(duration_ms = millis(duration), "Engine started track");
            }
            EngineEvent::DownloadComplete => {
                if self.engine.state() == EngineState::Ended {
                    self.track_finished();
                }
            }
            EngineEvent::DownloadCanceled => debug!("Engine download canceled"),
        }
    }

    // Each started song advances at most once, however many end signals the
    // engine sends for it.
    fn track_finished(self: &Arc<Self>) {
        if self.current_station().is_none() {
            return;
        }
        let serial = self.play_serial.load(Ordering::SeqCst);
        if self.ended_serial.swap(serial, Ordering::SeqCst) == serial {
            debug!("Track end already handled");
            return;
        }
        self.spawn_advance("auto_advance");
    }

    fn stream_failed(self: &Arc<Self>) {
        if self.current_station().is_none() {
            return;
        }
        // A failed open is recovered by the advance that attempted it; once
        // that advance has moved on the engine no longer reports an error.
        let Some(guard) = self.advancing.try_acquire() else {
            debug!("Stream failure handled by the running advance");
            return;
        };
        if self.engine.state() != EngineState::Error {
            debug!("Stale engine error ignored");
            return;
        }

        let inner = self.clone();
        let generation = self.current_generation();
        self.pool.spawn("stream_recovery", async move {
            let _guard = guard;
            inner.recover_stream(&generation).await?;
            inner.advance(&generation).await
        });
    }

    fn on_playlist_event(self: &Arc<Self>, event: PlaylistEvent) {
        match event {
            PlaylistEvent::PlaylistLow { remaining } => {
                debug!(remaining, "Playlist low");
                self.prefetch();
            }
            PlaylistEvent::PlayedSongAdded { song } => {
                self.emit(PlayerEvent::PlayedSongAdded { song: song.info() });
            }
            PlaylistEvent::PlayedSongRemoved { song } => {
                self.emit(PlayerEvent::PlayedSongRemoved { song: song.info() });
            }
            PlaylistEvent::Expired { discarded } => debug!(discarded, "Playlist expired"),
            PlaylistEvent::Exhausted => debug!("Playlist exhausted"),
            PlaylistEvent::Cleared => {}
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Background loops
// ============================================================================

fn spawn_engine_listener(inner: &Arc<Inner>) {
    let mut events = inner.engine.subscribe();
    let shutdown = inner.shutdown.clone();
    let inner = inner.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => inner.on_engine_event(event),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Engine events lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Engine listener stopped");
    });
}

fn spawn_playlist_listener(inner: &Arc<Inner>) {
    let mut events = inner.buffer.subscribe();
    let shutdown = inner.shutdown.clone();
    let inner = inner.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => inner.on_playlist_event(event),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Playlist events lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Playlist listener stopped");
    });
}
