//! # Core Configuration Module
//!
//! Builder-based configuration for the radio core.
//!
//! ## Overview
//!
//! `CoreConfig` carries the host capabilities (HTTP client, playback engine,
//! clock), the partner credentials used for the device-level handshake, and
//! the player policy knobs. Validation is fail-fast: a missing capability or a
//! nonsensical setting is reported from `build()`, before any network call.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, PartnerConfig};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .playback_engine(Arc::new(MyEngine))
//!     .partner(PartnerConfig::from_env()?)
//!     .low_playlist_count(2)
//!     .build()?;
//! ```
//!
//! When the `desktop-shims` feature is enabled the reqwest-backed HTTP client
//! is injected if none was provided.

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, PlaybackEngine, ProxyConfig, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default host serving the JSON RPC endpoint.
pub const DEFAULT_RPC_HOST: &str = "tuner.pandora.com";

/// Protocol version sent during partner login.
pub const DEFAULT_PROTOCOL_VERSION: &str = "5";

/// Stream quality requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AudioFormat {
    /// AAC+ 64 kbps (the default stream).
    #[default]
    AacPlus,
    /// MP3 128 kbps.
    Mp3,
    /// MP3 192 kbps (subscribers only).
    Mp3HiFi,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudioFormat::AacPlus => "aacplus",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp3HiFi => "mp3-hifi",
        };
        write!(f, "{}", s)
    }
}

/// Ordering applied to the station list (QuickMix always stays first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StationSortOrder {
    /// Station id ascending, a proxy for creation date.
    #[default]
    DateAsc,
    DateDesc,
    AlphaAsc,
    AlphaDesc,
    RatingAsc,
    RatingDesc,
}

impl StationSortOrder {
    /// Rating orders need per-station feedback counts before sorting.
    pub fn needs_feedback_counts(&self) -> bool {
        matches!(self, StationSortOrder::RatingAsc | StationSortOrder::RatingDesc)
    }
}

/// Device-level partner credentials and wire secrets.
///
/// The cipher keys are secrets handed out per partner device; they are never
/// hard-coded in the core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerConfig {
    pub username: String,
    pub password: String,
    pub device_model: String,
    pub version: String,
    /// Key used to encrypt request bodies.
    pub encrypt_key: String,
    /// Key used to decrypt the partner sync time.
    pub decrypt_key: String,
    pub rpc_host: String,
}

impl PartnerConfig {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        device_model: impl Into<String>,
        encrypt_key: impl Into<String>,
        decrypt_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            device_model: device_model.into(),
            version: DEFAULT_PROTOCOL_VERSION.to_string(),
            encrypt_key: encrypt_key.into(),
            decrypt_key: decrypt_key.into(),
            rpc_host: DEFAULT_RPC_HOST.to_string(),
        }
    }

    pub fn with_rpc_host(mut self, host: impl Into<String>) -> Self {
        self.rpc_host = host.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Reads `RADIO_PARTNER_USERNAME`, `RADIO_PARTNER_PASSWORD`,
    /// `RADIO_PARTNER_DEVICE`, `RADIO_PARTNER_ENCRYPT_KEY`,
    /// `RADIO_PARTNER_DECRYPT_KEY`, and optionally `RADIO_PARTNER_VERSION` and
    /// `RADIO_RPC_HOST`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| {
                Error::Config(format!("Environment variable {} is not set", name))
            })
        };

        let mut config = Self::new(
            var("RADIO_PARTNER_USERNAME")?,
            var("RADIO_PARTNER_PASSWORD")?,
            var("RADIO_PARTNER_DEVICE")?,
            var("RADIO_PARTNER_ENCRYPT_KEY")?,
            var("RADIO_PARTNER_DECRYPT_KEY")?,
        );
        if let Ok(version) = std::env::var("RADIO_PARTNER_VERSION") {
            config.version = version;
        }
        if let Ok(host) = std::env::var("RADIO_RPC_HOST") {
            config.rpc_host = host;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("username", &self.username),
            ("password", &self.password),
            ("device model", &self.device_model),
            ("version", &self.version),
            ("encrypt key", &self.encrypt_key),
            ("decrypt key", &self.decrypt_key),
            ("RPC host", &self.rpc_host),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("Partner {} cannot be empty", name)));
            }
        }
        if self.rpc_host.contains('/') {
            return Err(Error::Config(
                "RPC host must be a bare host name without scheme or path".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PartnerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartnerConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("device_model", &self.device_model)
            .field("version", &self.version)
            .field("encrypt_key", &"[REDACTED]")
            .field("decrypt_key", &"[REDACTED]")
            .field("rpc_host", &self.rpc_host)
            .finish()
    }
}

/// Player policy. None of these values are protocol requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Remaining pending songs at or below which a refill is requested.
    pub low_playlist_count: usize,
    /// History length.
    pub max_played: usize,
    /// How long `next_song` waits for a refill before giving up.
    pub reload_timeout: Duration,
    /// How long a caller waits for an in-flight reauthentication.
    pub reauth_wait: Duration,
    /// Playlist reloads attempted after a stream fails to open.
    pub stream_retry_budget: u32,
    /// Server-enforced lifetime of a fetched playlist.
    pub song_validity: Duration,
    pub audio_format: AudioFormat,
    pub station_sort_order: StationSortOrder,
    /// Concurrent background commands.
    pub worker_count: usize,
    pub event_buffer: usize,
    pub proxy: Option<ProxyConfig>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            low_playlist_count: 1,
            max_played: 8,
            reload_timeout: Duration::from_secs(60),
            reauth_wait: Duration::from_secs(30),
            stream_retry_budget: 2,
            song_validity: Duration::from_secs(60 * 60),
            audio_format: AudioFormat::default(),
            station_sort_order: StationSortOrder::default(),
            worker_count: 4,
            event_buffer: crate::events::DEFAULT_EVENT_BUFFER_SIZE,
            proxy: None,
        }
    }
}

impl PlayerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_played == 0 {
            return Err(Error::Config(
                "max_played must be at least 1".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(Error::Config(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(Error::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.reload_timeout.is_zero() || self.reauth_wait.is_zero() {
            return Err(Error::Config(
                "reload_timeout and reauth_wait must be non-zero".to_string(),
            ));
        }
        if self.song_validity.is_zero() {
            return Err(Error::Config(
                "song_validity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Core configuration. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub http_client: Arc<dyn HttpClient>,
    pub playback_engine: Arc<dyn PlaybackEngine>,
    pub clock: Arc<dyn Clock>,
    pub partner: PartnerConfig,
    pub settings: PlayerSettings,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"<HttpClient>")
            .field("playback_engine", &"<PlaybackEngine>")
            .field("partner", &self.partner)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.partner.validate()?;
        self.settings.validate()
    }
}

fn playback_engine_missing_error() -> Error {
    Error::missing(
        "PlaybackEngine",
        "No playback engine provided. The host must inject an audio engine \
         that can open stream URLs (see bridge_traits::PlaybackEngine).",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::missing(
        "HttpClient",
        "No HTTP client implementation provided. \
         Desktop: enable the `desktop-shims` feature. \
         Other hosts: inject a platform-native adapter.",
    ))
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    playback_engine: Option<Arc<dyn PlaybackEngine>>,
    clock: Option<Arc<dyn Clock>>,
    partner: Option<PartnerConfig>,
    settings: PlayerSettings,
}

impl CoreConfigBuilder {
    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest client is used when the `desktop-shims`
    /// feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the playback engine (required).
    pub fn playback_engine(mut self, engine: Arc<dyn PlaybackEngine>) -> Self {
        self.playback_engine = Some(engine);
        self
    }

    /// Overrides the time source. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the partner credentials (required).
    pub fn partner(mut self, partner: PartnerConfig) -> Self {
        self.partner = Some(partner);
        self
    }

    /// Replaces all player settings at once.
    pub fn settings(mut self, settings: PlayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn low_playlist_count(mut self, count: usize) -> Self {
        self.settings.low_playlist_count = count;
        self
    }

    pub fn max_played(mut self, count: usize) -> Self {
        self.settings.max_played = count;
        self
    }

    pub fn reload_timeout(mut self, timeout: Duration) -> Self {
        self.settings.reload_timeout = timeout;
        self
    }

    pub fn reauth_wait(mut self, wait: Duration) -> Self {
        self.settings.reauth_wait = wait;
        self
    }

    pub fn stream_retry_budget(mut self, budget: u32) -> Self {
        self.settings.stream_retry_budget = budget;
        self
    }

    pub fn song_validity(mut self, validity: Duration) -> Self {
        self.settings.song_validity = validity;
        self
    }

    pub fn audio_format(mut self, format: AudioFormat) -> Self {
        self.settings.audio_format = format;
        self
    }

    pub fn station_sort_order(mut self, order: StationSortOrder) -> Self {
        self.settings.station_sort_order = order;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.settings.worker_count = count;
        self
    }

    pub fn event_buffer(mut self, size: usize) -> Self {
        self.settings.event_buffer = size;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.settings.proxy = Some(proxy);
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing` when the playback engine, or the HTTP
    ///   client without `desktop-shims`, is missing
    /// - `Error::Config` when partner credentials are missing or a setting is
    ///   out of range
    pub fn build(self) -> Result<CoreConfig> {
        let partner = self.partner.ok_or_else(|| {
            Error::Config(
                "Partner credentials are required. Use .partner() to set them.".to_string(),
            )
        })?;

        let playback_engine = self
            .playback_engine
            .ok_or_else(playback_engine_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            http_client,
            playback_engine,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            partner,
            settings: self.settings,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::playback::{EngineEvent, EngineState};
    use tokio::sync::broadcast;

    struct NullHttpClient;

    #[async_trait]
    impl HttpClient for NullHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    struct NullEngine {
        events: broadcast::Sender<EngineEvent>,
    }

    impl NullEngine {
        fn new() -> Self {
            let (events, _) = broadcast::channel(4);
            Self { events }
        }
    }

    #[async_trait]
    impl PlaybackEngine for NullEngine {
        async fn play(&self, _url: &str, _gain_db: f32) -> BridgeResult<()> {
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn resume(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn stop(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek(&self, _position: Duration) -> BridgeResult<()> {
            Ok(())
        }
        fn state(&self) -> EngineState {
            EngineState::Idle
        }
        fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
            self.events.subscribe()
        }
    }

    fn partner() -> PartnerConfig {
        PartnerConfig::new("android", "secret", "android-generic", "enc", "dec")
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(NullHttpClient))
            .playback_engine(Arc::new(NullEngine::new()))
            .partner(partner())
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.partner.version, DEFAULT_PROTOCOL_VERSION);
        assert_eq!(config.partner.rpc_host, DEFAULT_RPC_HOST);
        assert_eq!(config.settings, PlayerSettings::default());
        assert_eq!(config.settings.reload_timeout, Duration::from_secs(60));
        assert_eq!(config.settings.reauth_wait, Duration::from_secs(30));
        assert_eq!(config.settings.stream_retry_budget, 2);
    }

    #[test]
    fn test_builder_requires_partner() {
        let err = CoreConfig::builder()
            .http_client(Arc::new(NullHttpClient))
            .playback_engine(Arc::new(NullEngine::new()))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("Partner credentials are required"));
    }

    #[test]
    fn test_builder_requires_playback_engine() {
        let err = CoreConfig::builder()
            .http_client(Arc::new(NullHttpClient))
            .partner(partner())
            .build()
            .unwrap_err();

        assert_eq!(err.missing_capability(), Some("PlaybackEngine"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client_without_shims() {
        let err = CoreConfig::builder()
            .playback_engine(Arc::new(NullEngine::new()))
            .partner(partner())
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("HttpClient"));
    }

    #[test]
    fn test_settings_validation() {
        assert!(complete_builder().max_played(0).build().is_err());
        assert!(complete_builder().worker_count(0).build().is_err());
        assert!(complete_builder()
            .reload_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(complete_builder()
            .low_playlist_count(0)
            .max_played(1)
            .build()
            .is_ok());
    }

    #[test]
    fn test_partner_validation() {
        let mut bad = partner();
        bad.encrypt_key.clear();
        assert!(bad.validate().unwrap_err().to_string().contains("encrypt key"));

        let hosted = partner().with_rpc_host("https://tuner.example.com/");
        assert!(hosted.validate().is_err());
    }

    #[test]
    fn test_partner_debug_redacts_secrets() {
        let rendered = format!("{:?}", partner());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("\"enc\""));
        assert!(rendered.contains("android-generic"));
    }

    #[test]
    fn test_rating_orders_need_feedback() {
        assert!(StationSortOrder::RatingDesc.needs_feedback_counts());
        assert!(!StationSortOrder::AlphaAsc.needs_feedback_counts());
        assert_eq!(AudioFormat::Mp3HiFi.to_string(), "mp3-hifi");
    }
}
