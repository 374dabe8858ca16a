//! Player orchestration tests
//!
//! Runs the player against the scripted tuner and an in-memory playback
//! engine. This test suite verifies:
//! - Connect/disconnect and the connection events
//! - Station loading, auto-advance and history
//! - Stream failure retries and the retry budget
//! - Drop-duplicate guards and no-op commands without a station
//! - Station management through the exception funnel

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::playback::{EngineEvent, EngineState, PlaybackEngine};
use core_runtime::config::{AudioFormat, CoreConfig};
use core_runtime::events::{
    CatalogEvent, CoreEvent, PlayerEvent, PlayerState, Receiver, RecvError, SessionEvent,
};
use core_service::Player;
use core_session::testing::FakeTuner;
use core_session::FaultCode;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Fake playback engine
// ============================================================================

struct FakeEngine {
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    played: Mutex<Vec<String>>,
    failures: AtomicUsize,
    error_on_failure: AtomicBool,
}

impl FakeEngine {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(EngineState::Idle),
            events,
            played: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            error_on_failure: AtomicBool::new(false),
        }
    }

    /// Also publish `StateChanged(Error)` when a `play` call fails, the way
    /// real engines do.
    fn report_failures(&self) {
        self.error_on_failure.store(true, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `play`.
    fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    fn set_state(&self, new: EngineState) {
        let old = std::mem::replace(&mut *self.state.lock(), new);
        let _ = self.events.send(EngineEvent::StateChanged { old, new });
    }

    fn send(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PlaybackEngine for FakeEngine {
    async fn play(&self, url: &str, _gain_db: f32) -> BridgeResult<()> {
        self.played.lock().push(url.to_string());
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            if self.error_on_failure.load(Ordering::SeqCst) {
                self.set_state(EngineState::Error);
            }
            return Err(BridgeError::StreamOpen(url.to_string()));
        }
        self.set_state(EngineState::Playing);
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.set_state(EngineState::Paused);
        Ok(())
    }

    async fn resume(&self) -> BridgeResult<()> {
        self.set_state(EngineState::Playing);
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        self.set_state(EngineState::Stopped);
        Ok(())
    }

    async fn seek(&self, _position: Duration) -> BridgeResult<()> {
        Ok(())
    }

    fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    tuner: Arc<FakeTuner>,
    engine: Arc<FakeEngine>,
    player: Player,
    events: Receiver<CoreEvent>,
}

fn build() -> Harness {
    build_with(FakeTuner::new())
}

fn build_with(tuner: FakeTuner) -> Harness {
    let tuner = Arc::new(tuner);
    tuner.add_station("10", "Jazz");
    tuner.add_station("20", "Ambient");
    tuner.add_quick_mix("5", &["10"]);

    let engine = Arc::new(FakeEngine::new());
    let config = CoreConfig::builder()
        .http_client(tuner.clone())
        .playback_engine(engine.clone())
        .partner(FakeTuner::partner())
        .low_playlist_count(0)
        .audio_format(AudioFormat::AacPlus)
        .build()
        .unwrap();

    let player = Player::new(config).unwrap();
    let events = player.subscribe();
    Harness {
        tuner,
        engine,
        player,
        events,
    }
}

async fn connected() -> Harness {
    connected_with(FakeTuner::new()).await
}

async fn connected_with(tuner: FakeTuner) -> Harness {
    let harness = build_with(tuner);
    harness
        .player
        .connect(FakeTuner::USERNAME, FakeTuner::PASSWORD)
        .wait()
        .await;
    assert_eq!(harness.player.state(), PlayerState::Connected);
    harness
}

fn batch(prefix: &str) -> Vec<Value> {
    (1..=3)
        .map(|n| FakeTuner::track(&format!("{}{}", prefix, n)))
        .collect()
}

fn url(track_token: &str) -> String {
    format!("http://audio.test/{}.m4a", track_token)
}

async fn wait_for<F>(events: &mut Receiver<CoreEvent>, mut matches: F) -> CoreEvent
where
    F: FnMut(&CoreEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn song_started(token: &'static str) -> impl FnMut(&CoreEvent) -> bool {
    move |event| {
        matches!(event, CoreEvent::Player(PlayerEvent::SongStarted { song }) if song.track_token == token)
    }
}

fn exception(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Exception(_))
}

fn exception_code(event: CoreEvent) -> u32 {
    match event {
        CoreEvent::Exception(e) => e.code,
        other => panic!("not an exception: {:?}", other),
    }
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn test_connect_loads_stations() {
    let mut h = build();
    h.player
        .connect(FakeTuner::USERNAME, FakeTuner::PASSWORD)
        .wait()
        .await;

    let refreshed = wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Catalog(CatalogEvent::StationsRefreshed { .. }))
    })
    .await;
    let CoreEvent::Catalog(CatalogEvent::StationsRefreshed { stations }) = refreshed else {
        unreachable!()
    };
    let published: Vec<(&str, &str)> = stations
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();
    assert_eq!(published.len(), 3);
    assert!(stations[0].is_quick_mix);
    assert!(published.contains(&("10", "Jazz")));
    assert!(published.contains(&("20", "Ambient")));

    let event = wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Session(SessionEvent::Connection { .. }))
    })
    .await;
    assert_eq!(
        event,
        CoreEvent::Session(SessionEvent::Connection {
            connected: true,
            fault_code: None,
            subscriber: false,
        })
    );
    assert_eq!(h.player.state(), PlayerState::Connected);
    assert!(h.player.is_connected());
    let ids: Vec<String> = h.player.stations().iter().map(|s| s.id.clone()).collect();
    let published_ids: Vec<String> = stations.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, published_ids);
}

#[tokio::test]
async fn test_connect_with_bad_password_reports_fault() {
    let mut h = build();
    h.player.connect(FakeTuner::USERNAME, "wrong").wait().await;

    let event = wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Session(SessionEvent::Connection { .. }))
    })
    .await;
    assert_eq!(
        event,
        CoreEvent::Session(SessionEvent::Connection {
            connected: false,
            fault_code: Some(FaultCode::InvalidLogin.as_u32()),
            subscriber: false,
        })
    );
    assert_eq!(h.player.state(), PlayerState::Disconnected);
    assert!(h.player.stations().is_empty());
}

#[tokio::test]
async fn test_second_connect_is_dropped() {
    let h = build();
    let first = h.player.connect(FakeTuner::USERNAME, FakeTuner::PASSWORD);
    let second = h.player.connect(FakeTuner::USERNAME, FakeTuner::PASSWORD);

    assert!(first.was_dispatched());
    assert!(!second.was_dispatched());
    first.wait().await;
    assert_eq!(h.tuner.calls("auth.userLogin"), 1);
}

#[tokio::test]
async fn test_disconnect_clears_everything() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    h.player.disconnect().wait().await;

    wait_for(&mut h.events, |e| {
        matches!(
            e,
            CoreEvent::Session(SessionEvent::Connection {
                connected: false,
                fault_code: None,
                ..
            })
        )
    })
    .await;
    assert_eq!(h.player.state(), PlayerState::Disconnected);
    assert!(h.player.current_station().is_none());
    assert!(h.player.current_song().is_none());
    assert!(h.player.stations().is_empty());
    assert!(!h.player.is_connected());
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_supersedes_connect_in_flight() {
    let mut h = build_with(FakeTuner::new().with_latency(Duration::from_millis(100)));

    let connect = h.player.connect(FakeTuner::USERNAME, FakeTuner::PASSWORD);
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.player.disconnect().wait().await;
    connect.wait().await;

    assert_eq!(h.player.state(), PlayerState::Disconnected);
    assert!(!h.player.is_connected());
    assert!(h.player.stations().is_empty());

    let mut went_online = false;
    while let Ok(event) = h.events.try_recv() {
        went_online |= matches!(
            event,
            CoreEvent::Session(SessionEvent::Connection { connected: true, .. })
        );
    }
    assert!(!went_online);
}

// ============================================================================
// Playback
// ============================================================================

#[tokio::test]
async fn test_play_station_starts_first_song() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));

    h.player.play_station("Jazz").wait().await;

    wait_for(&mut h.events, song_started("a1")).await;
    assert_eq!(h.player.state(), PlayerState::Playing);
    assert_eq!(h.player.current_station().unwrap().id, "10");
    assert_eq!(h.player.current_song().unwrap().track_token, "a1");
    assert_eq!(h.engine.played(), vec![url("a1")]);
}

#[tokio::test]
async fn test_empty_first_batch_is_end_of_playlist() {
    let mut h = connected().await;

    h.player.play_station("10").wait().await;

    let event = wait_for(&mut h.events, exception).await;
    assert_eq!(exception_code(event), FaultCode::EndOfPlaylist.as_u32());
    assert_eq!(h.player.state(), PlayerState::Stopped);
    assert!(h.engine.played().is_empty());
}

#[tokio::test]
async fn test_unknown_station_is_reported() {
    let mut h = connected().await;

    h.player.play_station("Polka").wait().await;

    let event = wait_for(&mut h.events, exception).await;
    assert_eq!(exception_code(event), FaultCode::StationDoesNotExist.as_u32());
    assert!(h.player.current_station().is_none());
}

#[tokio::test]
async fn test_track_end_advances_once_and_fills_history() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    // two end signals for the same track
    h.engine.set_state(EngineState::Ended);
    h.engine.send(EngineEvent::DownloadComplete);

    wait_for(&mut h.events, song_started("a2")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.engine.played(), vec![url("a1"), url("a2")]);
    let history: Vec<String> = h
        .player
        .history()
        .iter()
        .map(|s| s.track_token.clone())
        .collect();
    assert_eq!(history, vec!["a1"]);
}

#[tokio::test]
async fn test_low_playlist_triggers_background_fetch() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", vec![FakeTuner::track("a1")]);
    h.tuner.queue_playlist("10", batch("b"));

    assert_eq!(h.tuner.calls("station.getPlaylist"), 0);

    h.player.play_station("10").wait().await;
    wait_for(&mut h.events, song_started("a1")).await;

    // the load fetched once; dequeuing the only song crossed the watermark
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.tuner.calls("station.getPlaylist") < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tuner.calls("station.getPlaylist"), 2);

    h.player.next().wait().await;
    wait_for(&mut h.events, song_started("b1")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // two songs still queued, above the watermark
    assert_eq!(h.tuner.calls("station.getPlaylist"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_newer_station_discards_slow_load() {
    let mut h = connected_with(FakeTuner::new().with_latency(Duration::from_millis(50))).await;
    h.tuner.queue_playlist("10", batch("a"));
    h.tuner.queue_playlist("20", batch("b"));

    let first = h.player.play_station("10");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = h.player.play_station("20");
    first.wait().await;
    second.wait().await;

    wait_for(&mut h.events, song_started("b1")).await;
    assert_eq!(h.engine.played(), vec![url("b1")]);
    assert_eq!(h.player.current_station().unwrap().id, "20");

    h.player.next().wait().await;
    assert_eq!(h.player.current_song().unwrap().track_token, "b2");
    assert_eq!(h.engine.played(), vec![url("b1"), url("b2")]);
}

#[tokio::test]
async fn test_play_pause_toggles_engine() {
    let h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    h.player.play_pause().wait().await;
    assert_eq!(h.player.state(), PlayerState::Paused);
    assert_eq!(h.engine.state(), EngineState::Paused);

    h.player.play_pause().wait().await;
    assert_eq!(h.player.state(), PlayerState::Playing);
}

#[tokio::test]
async fn test_commands_without_station_are_noops() {
    let h = connected().await;

    assert!(!h.player.next().was_dispatched());
    assert!(!h.player.play_pause().was_dispatched());
    assert!(!h.player.thumb_up().was_dispatched());
    assert!(!h.player.stop().was_dispatched());
    assert_eq!(h.tuner.calls("station.getPlaylist"), 0);
}

#[tokio::test]
async fn test_stop_unloads_station() {
    let h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    h.player.stop().wait().await;

    assert_eq!(h.player.state(), PlayerState::Stopped);
    assert!(h.player.current_station().is_none());
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

// ============================================================================
// Stream failures
// ============================================================================

#[tokio::test]
async fn test_stream_failure_reloads_and_recovers() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.tuner.queue_playlist("10", batch("b"));
    h.engine.fail_next(1);

    h.player.play_station("10").wait().await;

    wait_for(&mut h.events, song_started("b1")).await;
    assert_eq!(h.engine.played(), vec![url("a1"), url("b1")]);
    assert_eq!(h.tuner.calls("station.getPlaylist"), 2);
    // the failed song never played, so it stays out of history
    assert!(h.player.history().is_empty());
}

#[tokio::test]
async fn test_stream_retry_budget_is_bounded() {
    let mut h = connected().await;
    for prefix in ["a", "b", "c", "d"] {
        h.tuner.queue_playlist("10", batch(prefix));
    }
    h.engine.fail_next(usize::MAX);

    h.player.play_station("10").wait().await;

    let event = wait_for(&mut h.events, exception).await;
    assert_eq!(exception_code(event), FaultCode::StreamError.as_u32());
    // initial fetch plus one reload per retry
    assert_eq!(h.tuner.calls("station.getPlaylist"), 3);
    assert_eq!(h.engine.played().len(), 3);
    assert_eq!(h.player.state(), PlayerState::Stopped);
}

#[tokio::test]
async fn test_engine_error_counts_as_stream_failure() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.tuner.queue_playlist("10", batch("b"));
    h.player.play_station("10").wait().await;

    h.engine.set_state(EngineState::Error);

    wait_for(&mut h.events, song_started("b1")).await;
    assert_eq!(h.tuner.calls("station.getPlaylist"), 2);
}

#[tokio::test]
async fn test_failed_first_open_recovers_once() {
    let mut h = connected().await;
    for prefix in ["a", "b", "c", "d"] {
        h.tuner.queue_playlist("10", batch(prefix));
    }
    h.engine.report_failures();
    h.engine.fail_next(1);

    h.player.play_station("10").wait().await;

    wait_for(&mut h.events, song_started("b1")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.tuner.calls("station.getPlaylist"), 2);
    assert_eq!(h.engine.played(), vec![url("a1"), url("b1")]);
    assert_eq!(h.player.current_song().unwrap().track_token, "b1");
}

// ============================================================================
// Song commands
// ============================================================================

#[tokio::test]
async fn test_thumb_down_rates_and_skips() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    h.player.thumb_down().wait().await;

    wait_for(&mut h.events, song_started("a2")).await;
    assert_eq!(h.tuner.feedback(), vec![("a1".to_string(), false)]);
}

#[tokio::test]
async fn test_overlapping_ratings_collapse() {
    let h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    let first = h.player.thumb_up();
    let second = h.player.thumb_up();
    assert!(first.was_dispatched());
    assert!(!second.was_dispatched());

    first.wait().await;
    assert_eq!(h.tuner.feedback().len(), 1);
}

#[tokio::test]
async fn test_rating_fault_goes_through_exception_funnel() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;
    h.tuner.fail_next("station.addFeedback", 1000);

    h.player.thumb_up().wait().await;

    let event = wait_for(&mut h.events, exception).await;
    assert_eq!(exception_code(event), FaultCode::ReadOnlyMode.as_u32());
    assert_eq!(
        h.player.current_song().unwrap().rating(),
        core_runtime::events::Rating::None
    );
}

// ============================================================================
// Station management
// ============================================================================

#[tokio::test]
async fn test_search_publishes_results() {
    let mut h = connected().await;
    h.tuner.set_search_results(json!({
        "songs": [],
        "artists": [{ "musicToken": "R9", "artistName": "Nina Simone", "score": 90 }]
    }));

    h.player.search("nina").wait().await;

    let event = wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Catalog(CatalogEvent::SearchResults { .. }))
    })
    .await;
    let CoreEvent::Catalog(CatalogEvent::SearchResults { query, hits }) = event else {
        unreachable!()
    };
    assert_eq!(query, "nina");
    assert_eq!(hits[0].music_token, "R9");

    h.player.create_station_from_hit(&hits[0]).wait().await;
    wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Catalog(CatalogEvent::StationCreated { .. }))
    })
    .await;
    assert_eq!(h.player.stations().len(), 4);
}

#[tokio::test]
async fn test_deleting_current_station_stops_playback() {
    let mut h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));
    h.player.play_station("10").wait().await;

    h.player.delete_station("10").wait().await;

    wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Catalog(CatalogEvent::StationDeleted { station_id }) if station_id == "10")
    })
    .await;
    assert_eq!(h.player.state(), PlayerState::Stopped);
    assert!(h.player.current_station().is_none());
    assert!(h.player.stations().iter().all(|s| s.id != "10"));
}

#[tokio::test]
async fn test_quick_mix_cannot_be_deleted() {
    let mut h = connected().await;

    h.player.delete_station("5").wait().await;

    let event = wait_for(&mut h.events, exception).await;
    assert_eq!(exception_code(event), FaultCode::CallNotAllowed.as_u32());
    assert_eq!(h.tuner.calls("station.deleteStation"), 0);
}

#[tokio::test]
async fn test_save_quick_mix_publishes_members() {
    let mut h = connected().await;

    h.player
        .save_quick_mix(vec!["10".to_string(), "20".to_string()])
        .wait()
        .await;

    let event = wait_for(&mut h.events, |e| {
        matches!(e, CoreEvent::Catalog(CatalogEvent::QuickMixSaved { .. }))
    })
    .await;
    assert_eq!(
        event,
        CoreEvent::Catalog(CatalogEvent::QuickMixSaved {
            station_ids: vec!["10".to_string(), "20".to_string()],
        })
    );
}

#[tokio::test]
async fn test_audio_format_applies_to_next_fetch() {
    let h = connected().await;
    h.tuner.queue_playlist("10", batch("a"));

    h.player.set_audio_format(AudioFormat::Mp3);
    h.player.play_station("10").wait().await;

    assert_eq!(h.engine.played(), vec!["http://audio.test/a1.mp3".to_string()]);
    assert_eq!(
        h.tuner.last_body("station.getPlaylist").unwrap()["additionalAudioUrl"],
        "HTTP_128_MP3"
    );
}
