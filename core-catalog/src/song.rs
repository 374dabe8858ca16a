//! Playable track with listener-side state.

use crate::error::Result;
use chrono::{DateTime, Utc};
use core_runtime::config::AudioFormat;
use core_runtime::events::{Rating, SongInfo};
use core_session::{Fault, FaultCode, PlaylistItem, SessionClient};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Default)]
struct SongState {
    rating: Rating,
    feedback_id: Option<String>,
    tired: bool,
    played: bool,
}

/// A track from a station playlist.
///
/// Core fields are fixed at construction. Rating, tiredness and the played
/// flag change through the methods below; rating changes are applied locally
/// only after the server accepted them.
pub struct Song {
    client: Arc<SessionClient>,
    pub track_token: String,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub audio_url: String,
    pub gain_db: f32,
    pub song_detail_url: Option<String>,
    pub album_detail_url: Option<String>,
    pub artist_detail_url: Option<String>,
    pub album_art_url: Option<String>,
    pub station_id: String,
    pub station_token: String,
    /// When the batch containing this song was fetched.
    pub playlist_time: DateTime<Utc>,
    state: Mutex<SongState>,
}

impl Song {
    /// Build a song from a playlist item, picking the stream URL for `format`.
    ///
    /// Fails with `NoAudioUrls` when the item has no URL for the format.
    pub fn from_item(
        client: Arc<SessionClient>,
        station_id: &str,
        station_token: &str,
        item: PlaylistItem,
        format: AudioFormat,
        fetched_at: DateTime<Utc>,
    ) -> std::result::Result<Self, Fault> {
        let audio_url = select_audio_url(&item, format).ok_or_else(|| {
            Fault::with_message(
                FaultCode::NoAudioUrls,
                format!("No {} stream for '{}'", format, item.song_name),
            )
        })?;
        let track_token = item
            .track_token
            .clone()
            .ok_or_else(|| Fault::bad_response("playlist item without trackToken"))?;

        let rating = match item.song_rating {
            r if r > 0 => Rating::Love,
            r if r < 0 => Rating::Ban,
            _ => Rating::None,
        };

        Ok(Self {
            client,
            gain_db: item.gain_db(),
            track_token,
            artist: item.artist_name,
            album: item.album_name,
            title: item.song_name,
            audio_url,
            song_detail_url: item.song_detail_url,
            album_detail_url: item.album_detail_url,
            artist_detail_url: item.artist_detail_url,
            album_art_url: item.album_art_url,
            station_id: station_id.to_string(),
            station_token: station_token.to_string(),
            playlist_time: fetched_at,
            state: Mutex::new(SongState {
                rating,
                ..SongState::default()
            }),
        })
    }

    pub fn rating(&self) -> Rating {
        self.state.lock().rating
    }

    pub fn feedback_id(&self) -> Option<String> {
        self.state.lock().feedback_id.clone()
    }

    pub fn is_tired(&self) -> bool {
        self.state.lock().tired
    }

    pub fn is_played(&self) -> bool {
        self.state.lock().played
    }

    pub fn mark_played(&self) {
        self.state.lock().played = true;
    }

    /// Still inside the server's playlist lifetime at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now - self.playlist_time < window,
            Err(_) => true,
        }
    }

    /// Change the rating. Unchanged ratings make no request.
    #[instrument(skip(self), fields(track = %self.track_token))]
    pub async fn rate(&self, rating: Rating) -> Result<()> {
        let (current, feedback_id) = {
            let state = self.state.lock();
            (state.rating, state.feedback_id.clone())
        };

        if current == rating {
            debug!(%rating, "Rating unchanged");
            return Ok(());
        }

        match rating {
            Rating::None => {
                let feedback_id = match feedback_id {
                    Some(id) => Some(id),
                    None => self.lookup_feedback_id().await?,
                };
                if let Some(id) = feedback_id {
                    self.client.delete_feedback(&id).await?;
                }
                let mut state = self.state.lock();
                state.rating = Rating::None;
                state.feedback_id = None;
            }
            Rating::Love | Rating::Ban => {
                let id = self
                    .client
                    .add_feedback(
                        &self.station_token,
                        &self.track_token,
                        rating == Rating::Love,
                    )
                    .await?;
                let mut state = self.state.lock();
                state.rating = rating;
                state.feedback_id = Some(id);
            }
        }

        info!(old = %current, new = %rating, "Song rated");
        Ok(())
    }

    // Ratings that arrived with the playlist carry no feedback id.
    async fn lookup_feedback_id(&self) -> Result<Option<String>> {
        let details = self.client.station_details(&self.station_token).await?;
        let found = details
            .feedback
            .thumbs_up
            .iter()
            .chain(details.feedback.thumbs_down.iter())
            .find(|record| record.song_name == self.title && record.artist_name == self.artist)
            .map(|record| record.feedback_id.clone());
        Ok(found)
    }

    /// Ask the service to rest this track for a while.
    #[instrument(skip(self), fields(track = %self.track_token))]
    pub async fn set_tired(&self) -> Result<()> {
        if self.is_tired() {
            return Ok(());
        }
        self.client.sleep_song(&self.track_token).await?;
        self.state.lock().tired = true;
        info!("Song marked tired");
        Ok(())
    }

    pub async fn bookmark(&self) -> Result<()> {
        self.client.bookmark_song(&self.track_token).await?;
        Ok(())
    }

    pub async fn bookmark_artist(&self) -> Result<()> {
        self.client.bookmark_artist(&self.track_token).await?;
        Ok(())
    }

    pub fn info(&self) -> SongInfo {
        let state = self.state.lock();
        SongInfo {
            track_token: self.track_token.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            station_id: self.station_id.clone(),
            album_art_url: self.album_art_url.clone(),
            rating: state.rating,
            tired: state.tired,
        }
    }
}

impl fmt::Debug for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Song")
            .field("track_token", &self.track_token)
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("station_id", &self.station_id)
            .field("playlist_time", &self.playlist_time)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

fn select_audio_url(item: &PlaylistItem, format: AudioFormat) -> Option<String> {
    match format {
        AudioFormat::AacPlus => item.audio_url_map.as_ref().and_then(|map| {
            map.high_quality
                .as_ref()
                .or(map.medium_quality.as_ref())
                .or(map.low_quality.as_ref())
                .map(|url| url.audio_url.clone())
        }),
        AudioFormat::Mp3 | AudioFormat::Mp3HiFi => item
            .additional_audio_url
            .as_ref()
            .and_then(|urls| urls.first())
            .map(str::to_string),
    }
    .filter(|url| !url.is_empty())
}
