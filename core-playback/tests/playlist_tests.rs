//! Tests for the playlist buffer
//!
//! This test suite verifies:
//! - FIFO order across batches and exclusive dequeue
//! - Low-watermark firing once per crossing
//! - Bounded history with removal events
//! - Expiry reload and end-of-playlist timeouts

use bridge_traits::time::ManualClock;
use chrono::{TimeZone, Utc};
use core_catalog::Song;
use core_playback::{BufferSettings, PlaybackError, PlaylistBuffer, PlaylistEvent};
use core_runtime::config::AudioFormat;
use core_session::testing::FakeTuner;
use core_session::SessionClient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    clock: Arc<ManualClock>,
    client: Arc<SessionClient>,
    buffer: Arc<PlaylistBuffer>,
}

fn settings(low_playlist_count: usize, max_played: usize) -> BufferSettings {
    BufferSettings {
        low_playlist_count,
        max_played,
        reload_timeout: Duration::from_secs(60),
        song_validity: Duration::from_secs(3600),
    }
}

fn fixture(settings: BufferSettings) -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let client = Arc::new(
        SessionClient::new(
            Arc::new(FakeTuner::new()),
            clock.clone(),
            FakeTuner::partner(),
        )
        .unwrap(),
    );
    let buffer = Arc::new(PlaylistBuffer::new(settings, clock.clone()).unwrap());
    Fixture {
        clock,
        client,
        buffer,
    }
}

impl Fixture {
    fn songs(&self, tokens: &[&str]) -> Vec<Arc<Song>> {
        tokens
            .iter()
            .map(|token| {
                let item = serde_json::from_value(FakeTuner::track(token)).unwrap();
                Arc::new(
                    Song::from_item(
                        self.client.clone(),
                        "1",
                        "token-1",
                        item,
                        AudioFormat::AacPlus,
                        self.clock_now(),
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use bridge_traits::time::Clock;
        self.clock.now()
    }

    async fn next_token(&self) -> String {
        self.buffer.next_song().await.unwrap().track_token.clone()
    }
}

fn drain(rx: &mut Receiver<PlaylistEvent>) -> Vec<PlaylistEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn low_count(events: &[PlaylistEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PlaylistEvent::PlaylistLow { .. }))
        .count()
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_fifo_across_batches() {
    let f = fixture(settings(1, 8));
    assert_eq!(f.buffer.add_songs(f.songs(&["a", "b"])), 2);
    assert_eq!(f.buffer.add_songs(f.songs(&["c", "d"])), 2);

    let mut served = Vec::new();
    for _ in 0..4 {
        served.push(f.next_token().await);
    }
    assert_eq!(served, vec!["a", "b", "c", "d"]);
    assert_eq!(f.buffer.current().unwrap().track_token, "d");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_never_share_a_song() {
    let f = fixture(settings(0, 8));
    let tokens: Vec<String> = (0..40).map(|n| format!("t{}", n)).collect();
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    f.buffer.add_songs(f.songs(&refs));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let buffer = f.buffer.clone();
            tokio::spawn(async move {
                let mut mine = Vec::new();
                for _ in 0..10 {
                    mine.push(buffer.next_song().await.unwrap().track_token.clone());
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for token in handle.await.unwrap() {
            assert!(seen.insert(token), "song served twice");
        }
    }
    assert_eq!(seen.len(), 40);
}

#[tokio::test(start_paused = true)]
async fn test_three_songs_then_end_of_playlist() {
    let f = fixture(settings(1, 8));
    let mut rx = f.buffer.subscribe();
    f.buffer.add_songs(f.songs(&["a", "b", "c"]));

    assert_eq!(f.next_token().await, "a");
    assert_eq!(f.next_token().await, "b");
    assert_eq!(f.next_token().await, "c");

    let started = tokio::time::Instant::now();
    let err = f.buffer.next_song().await.unwrap_err();

    assert_eq!(err, PlaybackError::EndOfPlaylist);
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, PlaylistEvent::Exhausted)));
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_fails_without_waiting() {
    let f = fixture(settings(1, 8));
    assert_eq!(f.buffer.add_songs(Vec::new()), 0);
    assert!(f.buffer.is_exhausted());

    let started = tokio::time::Instant::now();
    assert_eq!(
        f.buffer.next_song().await.unwrap_err(),
        PlaybackError::EndOfPlaylist
    );
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_consumer_woken_by_refill() {
    let f = fixture(settings(1, 8));
    let mut rx = f.buffer.subscribe();

    let buffer = f.buffer.clone();
    let consumer = tokio::spawn(async move { buffer.next_song().await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(low_count(&drain(&mut rx)), 1);

    f.buffer.add_songs(f.songs(&["late"]));
    let song = consumer.await.unwrap().unwrap();
    assert_eq!(song.track_token, "late");
}

// ============================================================================
// Low-watermark
// ============================================================================

#[tokio::test]
async fn test_low_watermark_fires_once_per_crossing() {
    let f = fixture(settings(1, 8));
    let mut rx = f.buffer.subscribe();
    f.buffer.add_songs(f.songs(&["a", "b", "c", "d"]));

    f.next_token().await;
    f.next_token().await;
    assert_eq!(low_count(&drain(&mut rx)), 0);

    f.next_token().await;
    let events = drain(&mut rx);
    assert_eq!(low_count(&events), 1);
    assert!(matches!(
        events.last(),
        Some(PlaylistEvent::PlaylistLow { remaining: 1 })
    ));

    f.next_token().await;
    assert_eq!(low_count(&drain(&mut rx)), 0);

    // refill re-arms
    f.buffer.add_songs(f.songs(&["e", "f"]));
    f.next_token().await;
    assert_eq!(low_count(&drain(&mut rx)), 1);
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_history_is_bounded() {
    let max_played = 3;
    let extra = 2;
    let f = fixture(settings(0, max_played));
    let mut rx = f.buffer.subscribe();

    let tokens: Vec<String> = (0..max_played + extra).map(|n| format!("t{}", n)).collect();
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    f.buffer.add_songs(f.songs(&refs));

    for _ in 0..max_played + extra {
        f.buffer.next_song().await.unwrap().mark_played();
    }
    f.buffer.retire_current();

    let history: Vec<String> = f
        .buffer
        .history()
        .iter()
        .map(|s| s.track_token.clone())
        .collect();
    assert_eq!(history, vec!["t2", "t3", "t4"]);

    let removed: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PlaylistEvent::PlayedSongRemoved { song } => Some(song.track_token.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec!["t0", "t1"]);
}

#[tokio::test]
async fn test_skipped_songs_stay_out_of_history() {
    let f = fixture(settings(0, 8));
    f.buffer.add_songs(f.songs(&["played", "skipped", "next"]));

    f.buffer.next_song().await.unwrap().mark_played();
    f.buffer.next_song().await.unwrap();
    f.buffer.next_song().await.unwrap();

    let history: Vec<String> = f
        .buffer
        .history()
        .iter()
        .map(|s| s.track_token.clone())
        .collect();
    assert_eq!(history, vec!["played"]);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_batch_is_reloaded_once() {
    let f = fixture(settings(1, 8));
    f.buffer.add_songs(f.songs(&["old1", "old2", "old3"]));
    f.clock.advance(chrono::Duration::hours(2));
    let mut rx = f.buffer.subscribe();

    let buffer = f.buffer.clone();
    let consumer = tokio::spawn(async move { buffer.next_song().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let events = drain(&mut rx);
    let expired: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            PlaylistEvent::Expired { discarded } => Some(*discarded),
            _ => None,
        })
        .collect();
    assert_eq!(expired, vec![3]);
    assert_eq!(low_count(&events), 1);
    assert_eq!(f.buffer.pending_len(), 0);

    f.buffer.add_songs(f.songs(&["fresh"]));
    let song = consumer.await.unwrap().unwrap();
    assert_eq!(song.track_token, "fresh");
    assert!(drain(&mut rx)
        .iter()
        .all(|e| !matches!(e, PlaylistEvent::Expired { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_after_empty_refill_still_waits_for_reload() {
    let f = fixture(settings(1, 8));
    f.buffer.add_songs(f.songs(&["old1", "old2"]));
    f.buffer.add_songs(Vec::new());
    assert!(f.buffer.is_exhausted());
    f.clock.advance(chrono::Duration::hours(2));

    let buffer = f.buffer.clone();
    let consumer = tokio::spawn(async move { buffer.next_song().await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!consumer.is_finished());
    assert!(!f.buffer.is_exhausted());

    f.buffer.add_songs(f.songs(&["fresh"]));
    let song = consumer.await.unwrap().unwrap();
    assert_eq!(song.track_token, "fresh");
}

#[tokio::test]
async fn test_clear_keeps_history_and_rearms() {
    let f = fixture(settings(1, 8));
    f.buffer.add_songs(f.songs(&["a", "b", "c"]));
    f.buffer.next_song().await.unwrap().mark_played();
    f.buffer.next_song().await.unwrap();

    f.buffer.clear();
    assert_eq!(f.buffer.pending_len(), 0);
    assert_eq!(f.buffer.history().len(), 1);

    f.buffer.reset();
    assert!(f.buffer.history().is_empty());
    assert!(f.buffer.current().is_none());
}

#[test]
fn test_invalid_settings_rejected() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let err = PlaylistBuffer::new(settings(1, 0), clock).unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidSettings(_)));
}
