//! The listener's station list.
//!
//! [`Catalog`] mirrors the server-side station list, keeps it in the
//! configured [`StationSortOrder`], and routes station management through
//! the session client. The QuickMix station always sorts first and is never
//! renamed, deleted or used as a QuickMix member.

use crate::error::{CatalogError, Result};
use crate::song::Song;
use crate::station::Station;
use bridge_traits::time::Clock;
use core_runtime::config::StationSortOrder;
use core_runtime::events::{SearchHit, SearchHitKind};
use core_session::{SessionClient, StationSeed};
use futures::future::join_all;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct Catalog {
    client: Arc<SessionClient>,
    clock: Arc<dyn Clock>,
    stations: RwLock<Vec<Arc<Station>>>,
    sort_order: RwLock<StationSortOrder>,
}

impl Catalog {
    pub fn new(client: Arc<SessionClient>, clock: Arc<dyn Clock>, order: StationSortOrder) -> Self {
        Self {
            client,
            clock,
            stations: RwLock::new(Vec::new()),
            sort_order: RwLock::new(order),
        }
    }

    /// Reload the station list from the server and sort it.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Vec<Arc<Station>>> {
        let records = self.client.station_list().await?;
        let mut stations: Vec<Arc<Station>> = records
            .into_iter()
            .map(|record| {
                Arc::new(Station::from_record(
                    self.client.clone(),
                    self.clock.clone(),
                    record,
                ))
            })
            .collect();

        let order = self.sort_order();
        prepare_sort(&stations, order).await;
        sort_stations(&mut stations, order);

        info!(count = stations.len(), "Station list refreshed");
        *self.stations.write() = stations.clone();
        Ok(stations)
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.stations.read().clone()
    }

    pub fn clear(&self) {
        self.stations.write().clear();
    }

    pub fn sort_order(&self) -> StationSortOrder {
        *self.sort_order.read()
    }

    pub fn station_by_id(&self, id: &str) -> Option<Arc<Station>> {
        self.stations.read().iter().find(|s| s.id == id).cloned()
    }

    /// Exact match first, then case-insensitive.
    pub fn station_by_name(&self, name: &str) -> Option<Arc<Station>> {
        let stations = self.stations.read();
        stations
            .iter()
            .find(|s| s.name() == name)
            .or_else(|| stations.iter().find(|s| s.name().eq_ignore_ascii_case(name)))
            .cloned()
    }

    pub fn quick_mix(&self) -> Option<Arc<Station>> {
        self.stations.read().iter().find(|s| s.is_quick_mix).cloned()
    }

    /// Re-sort with `order`, fetching feedback counts first when the order
    /// needs them.
    pub async fn sort(&self, order: StationSortOrder) {
        *self.sort_order.write() = order;
        prepare_sort(&self.stations(), order).await;
        // the list may have changed while counts were loading
        sort_stations(&mut self.stations.write(), order);
        debug!(?order, "Stations sorted");
    }

    /// Songs and artists matching `query`, best score first.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let result = self.client.search(query).await?;

        let mut hits: Vec<SearchHit> = result
            .songs
            .into_iter()
            .map(|song| SearchHit {
                display_name: format!("{} by {}", song.song_name, song.artist_name),
                music_token: song.music_token,
                kind: SearchHitKind::Song,
                score: song.score,
            })
            .chain(result.artists.into_iter().map(|artist| SearchHit {
                display_name: artist.artist_name,
                music_token: artist.music_token,
                kind: SearchHitKind::Artist,
                score: artist.score,
            }))
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));

        debug!(count = hits.len(), "Search finished");
        Ok(hits)
    }

    pub async fn create_from_music_token(&self, music_token: &str) -> Result<Arc<Station>> {
        self.create(StationSeed::MusicToken(music_token.to_string()))
            .await
    }

    pub async fn create_from_song(&self, song: &Song) -> Result<Arc<Station>> {
        self.create(StationSeed::Song {
            track_token: song.track_token.clone(),
        })
        .await
    }

    pub async fn create_from_artist(&self, song: &Song) -> Result<Arc<Station>> {
        self.create(StationSeed::Artist {
            track_token: song.track_token.clone(),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn create(&self, seed: StationSeed) -> Result<Arc<Station>> {
        let record = self.client.create_station(&seed).await?;

        if let Some(existing) = self.station_by_id(&record.station_id) {
            debug!(station_id = %existing.id, "Station already in catalog");
            return Ok(existing);
        }

        let station = Arc::new(Station::from_record(
            self.client.clone(),
            self.clock.clone(),
            record,
        ));
        let order = self.sort_order();
        prepare_sort(std::slice::from_ref(&station), order).await;
        {
            let mut stations = self.stations.write();
            if let Some(existing) = stations.iter().find(|s| s.id == station.id) {
                return Ok(existing.clone());
            }
            stations.push(station.clone());
            sort_stations(&mut stations, order);
        }

        info!(station_id = %station.id, "Station created");
        Ok(station)
    }

    pub async fn rename_station(&self, station_id: &str, name: &str) -> Result<Arc<Station>> {
        let station = self.require(station_id)?;
        station.rename(name).await?;

        let order = self.sort_order();
        sort_stations(&mut self.stations.write(), order);
        Ok(station)
    }

    pub async fn delete_station(&self, station_id: &str) -> Result<()> {
        let station = self.require(station_id)?;
        station.delete().await?;
        self.stations.write().retain(|s| s.id != station_id);
        Ok(())
    }

    /// Replace the QuickMix membership.
    #[instrument(skip(self))]
    pub async fn save_quick_mix(&self, station_ids: &[String]) -> Result<()> {
        for id in station_ids {
            let station = self.require(id)?;
            if station.is_quick_mix {
                return Err(CatalogError::QuickMixNotAllowed("add to QuickMix"));
            }
        }

        self.client.set_quick_mix(station_ids).await?;
        if let Some(mix) = self.quick_mix() {
            mix.set_quick_mix_station_ids(station_ids.to_vec());
        }
        info!(count = station_ids.len(), "QuickMix saved");
        Ok(())
    }

    fn require(&self, station_id: &str) -> Result<Arc<Station>> {
        self.station_by_id(station_id)
            .ok_or_else(|| CatalogError::StationNotFound(station_id.to_string()))
    }
}

// Rating orders need counters for every station. Lookups are independent, so
// they run concurrently; a failed lookup sorts as zero.
async fn prepare_sort(stations: &[Arc<Station>], order: StationSortOrder) {
    if !order.needs_feedback_counts() {
        return;
    }

    let lookups = stations
        .iter()
        .filter(|s| !s.is_quick_mix)
        .map(|station| async move {
            if let Err(error) = station.load_feedback_counts().await {
                warn!(station_id = %station.id, %error, "Feedback counts unavailable");
            }
        });
    join_all(lookups).await;
}

/// Sort in place: QuickMix first, then by `order`.
pub fn sort_stations(stations: &mut [Arc<Station>], order: StationSortOrder) {
    stations.sort_by(|a, b| {
        b.is_quick_mix
            .cmp(&a.is_quick_mix)
            .then_with(|| compare(a, b, order))
    });
}

fn compare(a: &Station, b: &Station, order: StationSortOrder) -> Ordering {
    let by_name = || a.name().to_lowercase().cmp(&b.name().to_lowercase());
    let thumbs = |s: &Station| s.thumbs_up().unwrap_or(0);

    match order {
        StationSortOrder::DateAsc => compare_ids(&a.id, &b.id),
        StationSortOrder::DateDesc => compare_ids(&b.id, &a.id),
        StationSortOrder::AlphaAsc => by_name(),
        StationSortOrder::AlphaDesc => by_name().reverse(),
        StationSortOrder::RatingAsc => thumbs(a).cmp(&thumbs(b)).then_with(by_name),
        StationSortOrder::RatingDesc => thumbs(b).cmp(&thumbs(a)).then_with(by_name),
    }
}

// Station ids grow with creation time.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
