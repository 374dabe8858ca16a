//! # Catalog Module
//!
//! Stations and songs produced by the session client.
//!
//! - [`Station`]: playlist fetch, feedback counters, art, rename and delete
//! - [`Song`]: stream URL and gain for the configured format, plus rating,
//!   tired and bookmark operations that call back into the client
//! - [`Catalog`]: the sorted station list, search, station creation and QuickMix

pub mod catalog;
pub mod error;
pub mod song;
pub mod station;

pub use catalog::{sort_stations, Catalog};
pub use error::{CatalogError, Result};
pub use song::Song;
pub use station::Station;
