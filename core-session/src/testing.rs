//! Scripted in-process tuner server.
//!
//! [`FakeTuner`] implements [`HttpClient`] and answers the RPC methods the
//! client uses. It decrypts bodies with the reversed partner keys, issues
//! tokens per generation, and records every call so tests can assert exact
//! counts.

use crate::cipher::{BlowfishCipher, BodyCipher};
use crate::types::StationRecord;
use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_runtime::config::PartnerConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use url::Url;

const PARTNER_ID: &str = "42";
const PARTNER_TOKEN: &str = "partner-token";
const USER_ID: &str = "7";

#[derive(Default)]
struct TunerState {
    generation: u64,
    reject_logins: bool,
    subscriber: bool,
    sync_time: i64,
    stations: Vec<StationRecord>,
    playlists: HashMap<String, VecDeque<Vec<Value>>>,
    feedback_counts: HashMap<String, (usize, usize)>,
    feedback: Vec<(String, bool)>,
    search_results: Option<Value>,
    faults: HashMap<String, VecDeque<i64>>,
    calls: HashMap<String, usize>,
    last_bodies: HashMap<String, Value>,
    next_id: u64,
}

impl TunerState {
    fn user_token(&self) -> String {
        format!("user-token-{}", self.generation)
    }
}

/// Fake tuner service for tests.
pub struct FakeTuner {
    cipher: BlowfishCipher,
    latency: Option<Duration>,
    state: Mutex<TunerState>,
}

impl FakeTuner {
    pub const USERNAME: &'static str = "listener@example.com";
    pub const PASSWORD: &'static str = "correct-horse";
    pub const ENCRYPT_KEY: &'static str = "client-encrypt-key";
    pub const DECRYPT_KEY: &'static str = "client-decrypt-key";

    /// Partner settings matching this server's keys.
    pub fn partner() -> PartnerConfig {
        PartnerConfig::new(
            "android",
            "partner-secret",
            "android-generic",
            Self::ENCRYPT_KEY,
            Self::DECRYPT_KEY,
        )
        .with_rpc_host("tuner.test")
    }

    pub fn new() -> Self {
        let cipher = BlowfishCipher::new(Self::DECRYPT_KEY, Self::ENCRYPT_KEY)
            .expect("fixture keys are valid");
        Self {
            cipher,
            latency: None,
            state: Mutex::new(TunerState {
                sync_time: 1_700_000_000,
                next_id: 1000,
                ..TunerState::default()
            }),
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Server time reported by the partner login.
    pub fn with_sync_time(self, sync_time: i64) -> Self {
        self.state.lock().sync_time = sync_time;
        self
    }

    pub fn with_subscriber(self, subscriber: bool) -> Self {
        self.state.lock().subscriber = subscriber;
        self
    }

    pub fn station_token(station_id: &str) -> String {
        format!("token-{}", station_id)
    }

    pub fn add_station(&self, station_id: &str, name: &str) -> StationRecord {
        let record = StationRecord {
            station_id: station_id.to_string(),
            station_token: Self::station_token(station_id),
            station_name: name.to_string(),
            is_quick_mix: false,
            art_url: Some(format!("http://art.test/{}.jpg", station_id)),
            quick_mix_station_ids: Vec::new(),
        };
        self.state.lock().stations.push(record.clone());
        record
    }

    pub fn add_quick_mix(&self, station_id: &str, members: &[&str]) -> StationRecord {
        let record = StationRecord {
            station_id: station_id.to_string(),
            station_token: Self::station_token(station_id),
            station_name: "QuickMix".to_string(),
            is_quick_mix: true,
            art_url: None,
            quick_mix_station_ids: members.iter().map(|id| id.to_string()).collect(),
        };
        self.state.lock().stations.push(record.clone());
        record
    }

    pub fn stations(&self) -> Vec<StationRecord> {
        self.state.lock().stations.clone()
    }

    /// Queue one `station.getPlaylist` answer for the station.
    pub fn queue_playlist(&self, station_id: &str, items: Vec<Value>) {
        self.state
            .lock()
            .playlists
            .entry(Self::station_token(station_id))
            .or_default()
            .push_back(items);
    }

    /// Playlist item with both an AAC and an MP3 URL.
    pub fn track(track_token: &str) -> Value {
        json!({
            "trackToken": track_token,
            "artistName": format!("Artist {}", track_token),
            "albumName": format!("Album {}", track_token),
            "songName": format!("Song {}", track_token),
            "trackGain": "-2.5",
            "songRating": 0,
            "albumArtUrl": format!("http://art.test/{}.jpg", track_token),
            "songDetailUrl": format!("http://detail.test/song/{}", track_token),
            "audioUrlMap": {
                "highQuality": { "audioUrl": format!("http://audio.test/{}.m4a", track_token), "bitrate": "64" },
                "lowQuality": { "audioUrl": format!("http://audio.test/{}-low.m4a", track_token), "bitrate": "32" }
            },
            "additionalAudioUrl": format!("http://audio.test/{}.mp3", track_token),
        })
    }

    pub fn ad() -> Value {
        json!({ "adToken": "ad-token" })
    }

    pub fn set_feedback_counts(&self, station_id: &str, up: usize, down: usize) {
        self.state
            .lock()
            .feedback_counts
            .insert(Self::station_token(station_id), (up, down));
    }

    pub fn set_search_results(&self, results: Value) {
        self.state.lock().search_results = Some(results);
    }

    /// Feedback recorded by `station.addFeedback`, as `(track_token, positive)`.
    pub fn feedback(&self) -> Vec<(String, bool)> {
        self.state.lock().feedback.clone()
    }

    /// Answer the next call to `method` with fault `code`.
    pub fn fail_next(&self, method: &str, code: i64) {
        self.state
            .lock()
            .faults
            .entry(method.to_string())
            .or_default()
            .push_back(code);
    }

    /// Invalidate every user token issued so far.
    pub fn expire_tokens(&self) {
        self.state.lock().generation += 1;
    }

    pub fn reject_logins(&self, reject: bool) {
        self.state.lock().reject_logins = reject;
    }

    /// Number of calls received for `method` (`"GET"` for plain downloads).
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Decrypted body of the most recent call to `method`.
    pub fn last_body(&self, method: &str) -> Option<Value> {
        self.state.lock().last_bodies.get(method).cloned()
    }

    fn open_body(&self, method: &str, raw: &[u8]) -> Result<Value> {
        let plain = if method == "auth.partnerLogin" {
            raw.to_vec()
        } else {
            let text = std::str::from_utf8(raw)
                .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
            let mut plain = self
                .cipher
                .decrypt(text)
                .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
            while plain.last() == Some(&0) {
                plain.pop();
            }
            plain
        };
        serde_json::from_slice(&plain).map_err(|e| BridgeError::OperationFailed(e.to_string()))
    }

    fn handle(&self, method: &str, query: &HashMap<String, String>, body: Value) -> Value {
        let mut state = self.state.lock();
        *state.calls.entry(method.to_string()).or_default() += 1;
        state.last_bodies.insert(method.to_string(), body.clone());

        if let Some(code) = state.faults.get_mut(method).and_then(VecDeque::pop_front) {
            return fail(code);
        }

        match method {
            "auth.partnerLogin" => {
                let sync_time = format!("\u{1}\u{2}\u{3}\u{4}{}", state.sync_time);
                ok(json!({
                    "partnerId": PARTNER_ID,
                    "partnerAuthToken": PARTNER_TOKEN,
                    "syncTime": self.cipher.encrypt(sync_time.as_bytes()),
                }))
            }
            "auth.userLogin" => {
                let accepted = !state.reject_logins
                    && query.get("auth_token").map(String::as_str) == Some(PARTNER_TOKEN)
                    && body["partnerAuthToken"] == PARTNER_TOKEN
                    && body["username"] == Self::USERNAME
                    && body["password"] == Self::PASSWORD;
                if !accepted {
                    return fail(1002);
                }
                ok(json!({
                    "userId": USER_ID,
                    "userAuthToken": state.user_token(),
                    "hasAudioAds": !state.subscriber,
                }))
            }
            _ => {
                let token = state.user_token();
                let valid = query.get("auth_token") == Some(&token)
                    && body["userAuthToken"].as_str() == Some(token.as_str());
                if !valid {
                    return fail(1001);
                }
                Self::handle_authenticated(&mut state, method, &body)
            }
        }
    }

    fn handle_authenticated(state: &mut TunerState, method: &str, body: &Value) -> Value {
        let station_token = body["stationToken"].as_str().unwrap_or_default().to_string();
        let station_index = state
            .stations
            .iter()
            .position(|station| station.station_token == station_token);

        match method {
            "user.getStationList" => ok(json!({ "stations": state.stations })),
            "station.getPlaylist" => {
                if station_index.is_none() {
                    return fail(1006);
                }
                let items = state
                    .playlists
                    .get_mut(&station_token)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_default();
                ok(json!({ "items": items }))
            }
            "station.addFeedback" => {
                state.next_id += 1;
                let track = body["trackToken"].as_str().unwrap_or_default().to_string();
                let positive = body["isPositive"].as_bool().unwrap_or(false);
                state.feedback.push((track, positive));
                ok(json!({ "feedbackId": format!("fb-{}", state.next_id) }))
            }
            "station.getStation" => {
                let Some(index) = station_index else {
                    return fail(1006);
                };
                let (up, down) = state
                    .feedback_counts
                    .get(&station_token)
                    .copied()
                    .unwrap_or_default();
                let record = |positive: bool, n: usize| {
                    json!({ "feedbackId": format!("f{}", n), "isPositive": positive })
                };
                ok(json!({
                    "stationId": state.stations[index].station_id,
                    "stationName": state.stations[index].station_name,
                    "feedback": {
                        "thumbsUp": (0..up).map(|n| record(true, n)).collect::<Vec<_>>(),
                        "thumbsDown": (0..down).map(|n| record(false, n)).collect::<Vec<_>>(),
                    }
                }))
            }
            "music.search" => ok(state
                .search_results
                .clone()
                .unwrap_or_else(|| json!({ "songs": [], "artists": [] }))),
            "station.createStation" => {
                state.next_id += 1;
                let id = state.next_id.to_string();
                let record = StationRecord {
                    station_token: Self::station_token(&id),
                    station_name: format!("Station {}", id),
                    station_id: id,
                    is_quick_mix: false,
                    art_url: None,
                    quick_mix_station_ids: Vec::new(),
                };
                state.stations.push(record.clone());
                ok(json!(record))
            }
            "station.renameStation" => match station_index {
                Some(index) => {
                    let name = body["stationName"].as_str().unwrap_or_default();
                    state.stations[index].station_name = name.to_string();
                    ok(Value::Null)
                }
                None => fail(1006),
            },
            "station.deleteStation" => match station_index {
                Some(index) => {
                    state.stations.remove(index);
                    ok(Value::Null)
                }
                None => fail(1006),
            },
            "user.setQuickMix" => {
                let ids: Vec<String> =
                    serde_json::from_value(body["quickMixStationIds"].clone()).unwrap_or_default();
                if let Some(mix) = state.stations.iter_mut().find(|s| s.is_quick_mix) {
                    mix.quick_mix_station_ids = ids;
                }
                ok(Value::Null)
            }
            "station.deleteFeedback"
            | "user.sleepSong"
            | "bookmark.addSongBookmark"
            | "bookmark.addArtistBookmark" => ok(Value::Null),
            _ => fail(14),
        }
    }
}

impl Default for FakeTuner {
    fn default() -> Self {
        Self::new()
    }
}

fn ok(result: Value) -> Value {
    json!({ "stat": "ok", "result": result })
}

fn fail(code: i64) -> Value {
    json!({ "stat": "fail", "code": code, "message": format!("fault {}", code) })
}

fn respond(body: impl Into<Bytes>) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: HashMap::new(),
        body: body.into(),
    }
}

#[async_trait]
impl HttpClient for FakeTuner {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let url = Url::parse(&request.url)
            .map_err(|e| BridgeError::OperationFailed(format!("bad url: {}", e)))?;

        if request.method == HttpMethod::Get {
            *self.state.lock().calls.entry("GET".to_string()).or_default() += 1;
            return Ok(respond(format!("bytes:{}", url.path())));
        }

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let method = query.get("method").cloned().unwrap_or_default();
        let raw = request.body.unwrap_or_default();
        let body = self.open_body(&method, &raw)?;

        let reply = self.handle(&method, &query, body);
        Ok(respond(reply.to_string()))
    }
}
