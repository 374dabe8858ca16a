//! Session/RPC client.
//!
//! [`SessionClient`] owns the tokens produced by the two-step login and hides
//! token expiry from callers: a call rejected with an expired token triggers
//! a single shared reauthentication and is then retried exactly once.
//!
//! # Reauthentication
//!
//! Every successful or failed login bumps an epoch counter while holding the
//! reauth mutex. A caller whose call failed with an expired token records the
//! epoch it started under and takes the mutex (bounded by `reauth_wait`):
//!
//! - epoch unchanged: this caller runs the login with the stored credentials;
//! - epoch moved on: another caller already re-logged in, so the recorded
//!   outcome is reused without touching the network.
//!
//! When reauthentication fails the original fault is returned.

use crate::cipher::{BlowfishCipher, BodyCipher};
use crate::envelope;
use crate::error::{Fault, FaultCode, FaultKind, Result};
use crate::session::{parse_sync_time, Credentials, Session};
use crate::types::{
    FeedbackResult, PartnerLoginResult, PlaylistItem, PlaylistResult, SearchResult,
    StationDetails, StationListResult, StationRecord, StationSeed, UserLoginResult,
};
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::config::{AudioFormat, CoreConfig, PartnerConfig};
use core_runtime::logging::{redact_if_sensitive, url_host};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Default bound on waiting for another caller's reauthentication.
pub const DEFAULT_REAUTH_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ReauthOutcome {
    succeeded: bool,
}

/// Authenticated RPC client for the tuner service.
pub struct SessionClient {
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    cipher: Arc<dyn BodyCipher>,
    partner: PartnerConfig,
    session: RwLock<Option<Arc<Session>>>,
    credentials: RwLock<Option<Credentials>>,
    rpc_sequence: AtomicU64,
    epoch: AtomicU64,
    reauth: Mutex<ReauthOutcome>,
    reauth_wait: Duration,
}

impl SessionClient {
    /// Create a client using the default Blowfish body cipher.
    pub fn new(
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        partner: PartnerConfig,
    ) -> Result<Self> {
        let cipher = BlowfishCipher::new(&partner.encrypt_key, &partner.decrypt_key)?;
        Ok(Self::with_cipher(http, clock, partner, Arc::new(cipher)))
    }

    pub fn with_cipher(
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        partner: PartnerConfig,
        cipher: Arc<dyn BodyCipher>,
    ) -> Self {
        Self {
            http,
            clock,
            cipher,
            partner,
            session: RwLock::new(None),
            credentials: RwLock::new(None),
            rpc_sequence: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            reauth: Mutex::new(ReauthOutcome::default()),
            reauth_wait: DEFAULT_REAUTH_WAIT,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        Ok(Self::new(
            config.http_client.clone(),
            config.clock.clone(),
            config.partner.clone(),
        )?
        .with_reauth_wait(config.settings.reauth_wait))
    }

    pub fn with_reauth_wait(mut self, wait: Duration) -> Self {
        self.reauth_wait = wait;
        self
    }

    /// Current session snapshot.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn is_subscriber(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|session| session.subscriber)
            .unwrap_or(false)
    }

    /// Number of requests dispatched so far, logins included.
    pub fn rpc_sequence(&self) -> u64 {
        self.rpc_sequence.load(Ordering::SeqCst)
    }

    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    /// Run the partner and user logins and store the credentials for later
    /// reauthentication. Faults from either step are returned unchanged.
    #[instrument(skip_all, fields(username = %redact_if_sensitive("username", username)))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let credentials = Credentials::new(username, password);
        let mut outcome = self.reauth.lock().await;

        let result = self.login(&credentials).await;
        outcome.succeeded = result.is_ok();
        self.epoch.fetch_add(1, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                *self.credentials.write() = Some(credentials);
                info!(subscriber = self.is_subscriber(), "Authenticated");
            }
            Err(fault) => warn!(code = %fault.code, error = %fault, "Authentication failed"),
        }
        result
    }

    /// Drop the session and stored credentials.
    pub fn logout(&self) {
        *self.session.write() = None;
        *self.credentials.write() = None;
        info!("Session cleared");
    }

    /// Perform an authenticated call and return its `result` payload.
    ///
    /// `params` must be a JSON object (or `null`); `userAuthToken` and
    /// `syncTime` are added before encryption.
    #[instrument(skip_all, fields(method = %method, secure = requires_ssl))]
    pub async fn call(&self, method: &str, params: Value, requires_ssl: bool) -> Result<Value> {
        let observed = self.epoch.load(Ordering::SeqCst);

        match self.dispatch(method, &params, requires_ssl).await {
            Err(fault) if fault.kind() == FaultKind::TokenExpired => {
                warn!(code = %fault.code, "Auth token rejected, reauthenticating");
                if self.reauthenticate(observed).await {
                    debug!("Retrying call after reauthentication");
                    self.dispatch(method, &params, requires_ssl).await
                } else {
                    Err(fault)
                }
            }
            other => other,
        }
    }

    async fn reauthenticate(&self, observed: u64) -> bool {
        let mut outcome = match timeout(self.reauth_wait, self.reauth.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    wait_secs = self.reauth_wait.as_secs(),
                    "Timed out waiting for reauthentication"
                );
                return false;
            }
        };

        if self.epoch.load(Ordering::SeqCst) != observed {
            debug!(succeeded = outcome.succeeded, "Reusing concurrent reauthentication");
            return outcome.succeeded;
        }

        let credentials = self.credentials.read().clone();
        let succeeded = match credentials {
            Some(credentials) => match self.login(&credentials).await {
                Ok(()) => {
                    info!("Reauthenticated");
                    true
                }
                Err(fault) => {
                    warn!(code = %fault.code, error = %fault, "Reauthentication failed");
                    false
                }
            },
            None => {
                warn!("No stored credentials for reauthentication");
                false
            }
        };

        outcome.succeeded = succeeded;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        succeeded
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        let partner = self.partner_login().await?;

        let decrypted = self.cipher.decrypt(&partner.sync_time)?;
        let server_time = parse_sync_time(&decrypted)
            .ok_or_else(|| Fault::bad_response("unreadable syncTime"))?;
        let sync_offset = server_time - self.clock.unix_timestamp();

        let user = self.user_login(&partner, credentials, sync_offset).await?;

        let session = Session {
            partner_id: partner.partner_id,
            partner_auth_token: partner.partner_auth_token,
            user_id: user.user_id,
            user_auth_token: user.user_auth_token,
            sync_offset,
            subscriber: !user.has_audio_ads,
            established_at: self.clock.now(),
        };
        *self.session.write() = Some(Arc::new(session));
        Ok(())
    }

    async fn partner_login(&self) -> Result<PartnerLoginResult> {
        let url = self.endpoint("auth.partnerLogin", true, &[])?;
        let body = json!({
            "username": self.partner.username,
            "password": self.partner.password,
            "deviceModel": self.partner.device_model,
            "version": self.partner.version,
        });

        let result = self.send(url, body.to_string()).await?;
        envelope::result_as(result)
    }

    async fn user_login(
        &self,
        partner: &PartnerLoginResult,
        credentials: &Credentials,
        sync_offset: i64,
    ) -> Result<UserLoginResult> {
        let url = self.endpoint(
            "auth.userLogin",
            true,
            &[
                ("partner_id", partner.partner_id.as_str()),
                ("auth_token", partner.partner_auth_token.as_str()),
            ],
        )?;
        let body = json!({
            "loginType": "user",
            "username": credentials.username,
            "password": credentials.password,
            "partnerAuthToken": partner.partner_auth_token,
            "syncTime": self.clock.unix_timestamp() + sync_offset,
        });

        let result = self
            .send(url, self.cipher.encrypt(body.to_string().as_bytes()))
            .await?;
        envelope::result_as(result)
    }

    async fn dispatch(&self, method: &str, params: &Value, requires_ssl: bool) -> Result<Value> {
        let session = self
            .session()
            .ok_or_else(|| Fault::new(FaultCode::NotConnected))?;

        let url = self.endpoint(
            method,
            requires_ssl,
            &[
                ("partner_id", session.partner_id.as_str()),
                ("auth_token", session.user_auth_token.as_str()),
                ("user_id", session.user_id.as_str()),
            ],
        )?;

        let mut body = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(Fault::with_message(
                    FaultCode::ParameterTypeMismatch,
                    "RPC parameters must be a JSON object",
                ))
            }
        };
        body.insert(
            "userAuthToken".to_string(),
            Value::String(session.user_auth_token.clone()),
        );
        body.insert(
            "syncTime".to_string(),
            json!(session.sync_time(self.clock.unix_timestamp())),
        );

        let plain = serde_json::to_string(&Value::Object(body))?;
        self.send(url, self.cipher.encrypt(plain.as_bytes())).await
    }

    fn endpoint(&self, method: &str, secure: bool, params: &[(&str, &str)]) -> Result<String> {
        let scheme = if secure { "https" } else { "http" };
        let mut url = Url::parse(&format!(
            "{}://{}/services/json/",
            scheme, self.partner.rpc_host
        ))
        .map_err(|e| {
            Fault::with_message(
                FaultCode::ConfigError,
                format!("Invalid RPC host '{}': {}", self.partner.rpc_host, e),
            )
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("method", method);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    async fn send(&self, url: String, body: String) -> Result<Value> {
        let sequence = self.rpc_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sequence, "Dispatching RPC");

        let response = self.http.execute(HttpRequest::post(url).text(body)).await?;
        if !response.is_success() {
            return Err(Fault::bad_response(format!("HTTP {}", response.status)));
        }
        envelope::decode(&response.body)
    }

    // ------------------------------------------------------------------
    // Typed helpers
    // ------------------------------------------------------------------

    pub async fn station_list(&self) -> Result<Vec<StationRecord>> {
        let result = self
            .call(
                "user.getStationList",
                json!({ "includeStationArtUrl": true }),
                false,
            )
            .await?;
        Ok(envelope::result_as::<StationListResult>(result)?.stations)
    }

    /// Next playlist batch for `station_token`, ads included.
    pub async fn playlist(
        &self,
        station_token: &str,
        format: AudioFormat,
    ) -> Result<Vec<PlaylistItem>> {
        let mut params = json!({ "stationToken": station_token });
        if let Some(extra) = additional_audio_format(format) {
            params["additionalAudioUrl"] = json!(extra);
        }

        let result = self.call("station.getPlaylist", params, true).await?;
        Ok(envelope::result_as::<PlaylistResult>(result)?.items)
    }

    /// Returns the new feedback id.
    pub async fn add_feedback(
        &self,
        station_token: &str,
        track_token: &str,
        is_positive: bool,
    ) -> Result<String> {
        let result = self
            .call(
                "station.addFeedback",
                json!({
                    "stationToken": station_token,
                    "trackToken": track_token,
                    "isPositive": is_positive,
                }),
                false,
            )
            .await?;
        Ok(envelope::result_as::<FeedbackResult>(result)?.feedback_id)
    }

    pub async fn delete_feedback(&self, feedback_id: &str) -> Result<()> {
        self.call(
            "station.deleteFeedback",
            json!({ "feedbackId": feedback_id }),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn station_details(&self, station_token: &str) -> Result<StationDetails> {
        let result = self
            .call(
                "station.getStation",
                json!({
                    "stationToken": station_token,
                    "includeExtendedAttributes": true,
                }),
                false,
            )
            .await?;
        envelope::result_as(result)
    }

    /// Keep the track off every station for a while.
    pub async fn sleep_song(&self, track_token: &str) -> Result<()> {
        self.call("user.sleepSong", json!({ "trackToken": track_token }), false)
            .await?;
        Ok(())
    }

    pub async fn bookmark_song(&self, track_token: &str) -> Result<()> {
        self.call(
            "bookmark.addSongBookmark",
            json!({ "trackToken": track_token }),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn bookmark_artist(&self, track_token: &str) -> Result<()> {
        self.call(
            "bookmark.addArtistBookmark",
            json!({ "trackToken": track_token }),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn search(&self, text: &str) -> Result<SearchResult> {
        let result = self
            .call("music.search", json!({ "searchText": text }), false)
            .await?;
        envelope::result_as(result)
    }

    pub async fn create_station(&self, seed: &StationSeed) -> Result<StationRecord> {
        let params = match seed {
            StationSeed::MusicToken(token) => json!({ "musicToken": token }),
            StationSeed::Song { track_token } => {
                json!({ "trackToken": track_token, "musicType": "song" })
            }
            StationSeed::Artist { track_token } => {
                json!({ "trackToken": track_token, "musicType": "artist" })
            }
        };

        let result = self.call("station.createStation", params, false).await?;
        envelope::result_as(result)
    }

    pub async fn rename_station(&self, station_token: &str, name: &str) -> Result<()> {
        self.call(
            "station.renameStation",
            json!({ "stationToken": station_token, "stationName": name }),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn delete_station(&self, station_token: &str) -> Result<()> {
        self.call(
            "station.deleteStation",
            json!({ "stationToken": station_token }),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn set_quick_mix(&self, station_ids: &[String]) -> Result<()> {
        self.call(
            "user.setQuickMix",
            json!({ "quickMixStationIds": station_ids }),
            false,
        )
        .await?;
        Ok(())
    }

    /// Plain GET for art and other static resources.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self.http.execute(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(Fault::with_message(
                FaultCode::NetworkError,
                format!("HTTP {} from {}", response.status, url_host(url)),
            ));
        }
        Ok(response.body)
    }
}

/// Extra stream format requested next to the default AAC map.
pub fn additional_audio_format(format: AudioFormat) -> Option<&'static str> {
    match format {
        AudioFormat::AacPlus => None,
        AudioFormat::Mp3 => Some("HTTP_128_MP3"),
        AudioFormat::Mp3HiFi => Some("HTTP_192_MP3"),
    }
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("partner", &self.partner)
            .field("session", &*self.session.read())
            .field("rpc_sequence", &self.rpc_sequence())
            .field("reauth_wait", &self.reauth_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTuner;
    use bridge_traits::time::ManualClock;
    use chrono::{TimeZone, Utc};

    const START: i64 = 1_700_000_000;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.timestamp_opt(START, 0).unwrap()))
    }

    fn client_with(tuner: &Arc<FakeTuner>) -> SessionClient {
        SessionClient::new(tuner.clone(), clock(), FakeTuner::partner())
            .unwrap()
            .with_reauth_wait(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_two_step_login() {
        let tuner = Arc::new(FakeTuner::new().with_sync_time(START + 90).with_subscriber(true));
        let client = client_with(&tuner);

        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        let session = client.session().unwrap();
        assert_eq!(session.sync_offset, 90);
        assert!(client.is_subscriber());
        assert_eq!(tuner.calls("auth.partnerLogin"), 1);
        assert_eq!(tuner.calls("auth.userLogin"), 1);

        let login = tuner.last_body("auth.userLogin").unwrap();
        assert_eq!(login["loginType"], "user");
        assert_eq!(login["syncTime"], START + 90);
        assert_eq!(client.rpc_sequence(), 2);
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_fault_without_retry() {
        let tuner = Arc::new(FakeTuner::new());
        let client = client_with(&tuner);

        let fault = client
            .authenticate(FakeTuner::USERNAME, "wrong")
            .await
            .unwrap_err();

        assert_eq!(fault.code, FaultCode::InvalidLogin);
        assert_eq!(fault.kind(), FaultKind::Auth);
        assert_eq!(tuner.calls("auth.userLogin"), 1);
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_call_requires_session() {
        let tuner = Arc::new(FakeTuner::new());
        let client = client_with(&tuner);

        let fault = client.station_list().await.unwrap_err();
        assert_eq!(fault.code, FaultCode::NotConnected);
        assert_eq!(tuner.calls("user.getStationList"), 0);
    }

    #[tokio::test]
    async fn test_authenticated_body_is_stamped() {
        let tuner = Arc::new(FakeTuner::new().with_sync_time(START - 10));
        tuner.add_station("1", "Jazz");
        let client = client_with(&tuner);
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        let stations = client.station_list().await.unwrap();
        assert_eq!(stations.len(), 1);

        let body = tuner.last_body("user.getStationList").unwrap();
        assert_eq!(body["syncTime"], START - 10);
        assert_eq!(body["includeStationArtUrl"], true);
        assert!(body["userAuthToken"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_expired_token_retried_exactly_once() {
        let tuner = Arc::new(FakeTuner::new());
        tuner.add_station("1", "Jazz");
        let client = client_with(&tuner);
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        tuner.expire_tokens();
        let stations = client.station_list().await.unwrap();

        assert_eq!(stations[0].station_name, "Jazz");
        assert_eq!(tuner.calls("user.getStationList"), 2);
        assert_eq!(tuner.calls("auth.userLogin"), 2);
    }

    #[tokio::test]
    async fn test_failed_reauth_returns_original_fault() {
        let tuner = Arc::new(FakeTuner::new());
        let client = client_with(&tuner);
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        tuner.expire_tokens();
        tuner.reject_logins(true);

        let fault = client.station_list().await.unwrap_err();
        assert_eq!(fault.code, FaultCode::InvalidAuthToken);
        assert_eq!(tuner.calls("user.getStationList"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_expired_calls_share_one_reauth() {
        let tuner = Arc::new(FakeTuner::new().with_latency(Duration::from_millis(50)));
        tuner.add_station("1", "Jazz");
        let client = Arc::new(client_with(&tuner));
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        tuner.expire_tokens();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.station_list().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(tuner.calls("auth.partnerLogin"), 2);
        assert_eq!(tuner.calls("auth.userLogin"), 2);
        assert_eq!(tuner.calls("user.getStationList"), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_failed_reauth() {
        let tuner = Arc::new(FakeTuner::new().with_latency(Duration::from_millis(50)));
        let client = Arc::new(client_with(&tuner));
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        tuner.expire_tokens();
        tuner.reject_logins(true);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.station_list().await })
            })
            .collect();
        for handle in handles {
            let fault = handle.await.unwrap().unwrap_err();
            assert_eq!(fault.code, FaultCode::InvalidAuthToken);
        }

        assert_eq!(tuner.calls("auth.userLogin"), 2);
    }

    #[tokio::test]
    async fn test_server_faults_pass_through() {
        let tuner = Arc::new(FakeTuner::new());
        let client = client_with(&tuner);
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        tuner.fail_next("station.deleteStation", 1006);
        let fault = client.delete_station("missing").await.unwrap_err();

        assert_eq!(fault.code, FaultCode::StationDoesNotExist);
        assert_eq!(tuner.calls("station.deleteStation"), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let tuner = Arc::new(FakeTuner::new());
        let client = client_with(&tuner);
        client
            .authenticate(FakeTuner::USERNAME, FakeTuner::PASSWORD)
            .await
            .unwrap();

        client.logout();
        assert!(!client.is_authenticated());
        assert_eq!(
            client.station_list().await.unwrap_err().code,
            FaultCode::NotConnected
        );
    }

    #[test]
    fn test_additional_audio_format() {
        assert_eq!(additional_audio_format(AudioFormat::AacPlus), None);
        assert_eq!(additional_audio_format(AudioFormat::Mp3), Some("HTTP_128_MP3"));
        assert_eq!(additional_audio_format(AudioFormat::Mp3HiFi), Some("HTTP_192_MP3"));
    }
}
