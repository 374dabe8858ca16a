//! Wire records returned by the tuner service.
//!
//! Field names follow the service's camelCase JSON. Optional fields default
//! so that sparse records (ads, QuickMix) still decode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PartnerLoginResult {
    pub partner_id: String,
    pub partner_auth_token: String,
    pub sync_time: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserLoginResult {
    pub user_id: String,
    pub user_auth_token: String,
    #[serde(default)]
    pub has_audio_ads: bool,
}

/// One entry of `user.getStationList`, also returned by `station.createStation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRecord {
    pub station_id: String,
    pub station_token: String,
    pub station_name: String,
    #[serde(default)]
    pub is_quick_mix: bool,
    #[serde(default)]
    pub art_url: Option<String>,
    #[serde(default)]
    pub quick_mix_station_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StationListResult {
    #[serde(default)]
    pub stations: Vec<StationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUrl {
    pub audio_url: String,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUrlMap {
    #[serde(default)]
    pub high_quality: Option<AudioUrl>,
    #[serde(default)]
    pub medium_quality: Option<AudioUrl>,
    #[serde(default)]
    pub low_quality: Option<AudioUrl>,
}

/// `additionalAudioUrl` is a string for one requested format and an array
/// for several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalAudioUrl {
    One(String),
    Many(Vec<String>),
}

impl AdditionalAudioUrl {
    pub fn first(&self) -> Option<&str> {
        match self {
            AdditionalAudioUrl::One(url) => Some(url.as_str()),
            AdditionalAudioUrl::Many(urls) => urls.first().map(String::as_str),
        }
    }
}

/// One item of `station.getPlaylist`. Ad slots carry only `adToken`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistItem {
    pub track_token: Option<String>,
    pub ad_token: Option<String>,
    pub artist_name: String,
    pub album_name: String,
    pub song_name: String,
    pub audio_url_map: Option<AudioUrlMap>,
    pub additional_audio_url: Option<AdditionalAudioUrl>,
    pub track_gain: Option<String>,
    pub song_rating: i32,
    pub song_detail_url: Option<String>,
    pub album_detail_url: Option<String>,
    pub artist_detail_url: Option<String>,
    pub album_art_url: Option<String>,
}

impl PlaylistItem {
    pub fn is_ad(&self) -> bool {
        self.ad_token.is_some() || self.track_token.is_none()
    }

    /// Replay gain in dB; the service sends it as a decimal string.
    pub fn gain_db(&self) -> f32 {
        self.track_gain
            .as_deref()
            .and_then(|gain| gain.trim().parse().ok())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PlaylistResult {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackResult {
    pub feedback_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    pub song_name: String,
    pub artist_name: String,
    pub is_positive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StationFeedback {
    pub thumbs_up: Vec<FeedbackRecord>,
    pub thumbs_down: Vec<FeedbackRecord>,
}

/// Extended attributes from `station.getStation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StationDetails {
    pub station_id: String,
    pub station_name: String,
    pub feedback: StationFeedback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongMatch {
    pub music_token: String,
    pub song_name: String,
    pub artist_name: String,
    #[serde(default)]
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistMatch {
    pub music_token: String,
    pub artist_name: String,
    #[serde(default)]
    pub score: u32,
}

/// Result of `music.search`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    pub songs: Vec<SongMatch>,
    pub artists: Vec<ArtistMatch>,
}

/// Seed for `station.createStation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationSeed {
    /// Token from a search hit.
    MusicToken(String),
    /// The song behind a playing track.
    Song { track_token: String },
    /// The artist behind a playing track.
    Artist { track_token: String },
}
