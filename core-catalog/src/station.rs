//! Station entity.

use crate::error::{CatalogError, Result};
use crate::song::Song;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::config::AudioFormat;
use core_runtime::events::StationInfo;
use core_session::{FaultKind, SessionClient, StationRecord};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// A station in the listener's catalog.
pub struct Station {
    client: Arc<SessionClient>,
    clock: Arc<dyn Clock>,
    pub id: String,
    pub id_token: String,
    pub is_quick_mix: bool,
    pub art_url: Option<String>,
    name: RwLock<String>,
    quick_mix_station_ids: RwLock<Vec<String>>,
    art: OnceCell<Bytes>,
    feedback_counts: RwLock<Option<(usize, usize)>>,
}

impl Station {
    pub fn from_record(
        client: Arc<SessionClient>,
        clock: Arc<dyn Clock>,
        record: StationRecord,
    ) -> Self {
        Self {
            client,
            clock,
            id: record.station_id,
            id_token: record.station_token,
            is_quick_mix: record.is_quick_mix,
            art_url: record.art_url,
            name: RwLock::new(record.station_name),
            quick_mix_station_ids: RwLock::new(record.quick_mix_station_ids),
            art: OnceCell::new(),
            feedback_counts: RwLock::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Member station ids when this is the QuickMix.
    pub fn quick_mix_station_ids(&self) -> Vec<String> {
        self.quick_mix_station_ids.read().clone()
    }

    pub(crate) fn set_quick_mix_station_ids(&self, ids: Vec<String>) {
        *self.quick_mix_station_ids.write() = ids;
    }

    /// Thumbs-up count, once [`Station::load_feedback_counts`] has run.
    pub fn thumbs_up(&self) -> Option<usize> {
        self.feedback_counts.read().map(|(up, _)| up)
    }

    pub fn thumbs_down(&self) -> Option<usize> {
        self.feedback_counts.read().map(|(_, down)| down)
    }

    pub fn info(&self) -> StationInfo {
        StationInfo {
            id: self.id.clone(),
            name: self.name(),
            is_quick_mix: self.is_quick_mix,
            art_url: self.art_url.clone(),
        }
    }

    /// Fetch the next playlist batch.
    ///
    /// Ads are skipped and songs without a stream for `format` are dropped.
    /// A skip-limit or end-of-playlist fault yields an empty batch.
    #[instrument(skip(self), fields(station_id = %self.id))]
    pub async fn fetch_playlist(&self, format: AudioFormat) -> Result<Vec<Arc<Song>>> {
        let items = match self.client.playlist(&self.id_token, format).await {
            Ok(items) => items,
            Err(fault) if fault.kind() == FaultKind::EndOfPlaylist => {
                warn!(code = %fault.code, "Playlist limit reached");
                return Ok(Vec::new());
            }
            Err(fault) => return Err(fault.into()),
        };

        let fetched_at = self.clock.now();
        let songs: Vec<Arc<Song>> = items
            .into_iter()
            .filter(|item| !item.is_ad())
            .filter_map(|item| {
                match Song::from_item(
                    self.client.clone(),
                    &self.id,
                    &self.id_token,
                    item,
                    format,
                    fetched_at,
                ) {
                    Ok(song) => Some(Arc::new(song)),
                    Err(fault) => {
                        warn!(code = %fault.code, error = %fault, "Dropping playlist item");
                        None
                    }
                }
            })
            .collect();

        info!(count = songs.len(), "Fetched playlist");
        Ok(songs)
    }

    /// Load and cache the thumbs-up/down counters.
    pub async fn load_feedback_counts(&self) -> Result<(usize, usize)> {
        if let Some(counts) = *self.feedback_counts.read() {
            return Ok(counts);
        }

        let details = self.client.station_details(&self.id_token).await?;
        let counts = (
            details.feedback.thumbs_up.len(),
            details.feedback.thumbs_down.len(),
        );
        *self.feedback_counts.write() = Some(counts);
        Ok(counts)
    }

    /// Station art, downloaded on first use.
    pub async fn fetch_art(&self) -> Result<Option<Bytes>> {
        let Some(url) = self.art_url.as_deref() else {
            return Ok(None);
        };

        let bytes = self
            .art
            .get_or_try_init(|| self.client.fetch_bytes(url))
            .await?;
        Ok(Some(bytes.clone()))
    }

    #[instrument(skip(self), fields(station_id = %self.id))]
    pub async fn rename(&self, new_name: &str) -> Result<()> {
        if self.is_quick_mix {
            return Err(CatalogError::QuickMixNotAllowed("rename"));
        }
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(CatalogError::InvalidName(
                "station name cannot be empty".to_string(),
            ));
        }

        self.client.rename_station(&self.id_token, new_name).await?;
        *self.name.write() = new_name.to_string();
        info!("Station renamed");
        Ok(())
    }

    #[instrument(skip(self), fields(station_id = %self.id))]
    pub async fn delete(&self) -> Result<()> {
        if self.is_quick_mix {
            return Err(CatalogError::QuickMixNotAllowed("delete"));
        }
        self.client.delete_station(&self.id_token).await?;
        info!("Station deleted");
        Ok(())
    }
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("is_quick_mix", &self.is_quick_mix)
            .field("feedback_counts", &*self.feedback_counts.read())
            .finish_non_exhaustive()
    }
}
