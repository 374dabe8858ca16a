//! Core service façade.
//!
//! Wires the host-provided bridges (HTTP client, playback engine, clock) into
//! a [`Player`]. Desktop hosts enable the `desktop-shims` feature so the
//! reqwest HTTP client is injected when none is given; other hosts pass
//! their own adapters through [`CoreConfig::builder`].
//!
//! ```rust,ignore
//! use core_service::{CoreConfig, Player};
//!
//! let config = CoreConfig::builder()
//!     .playback_engine(engine)
//!     .partner(PartnerConfig::from_env()?)
//!     .build()?;
//! let player = Player::new(config)?;
//! let mut events = player.events();
//!
//! player.connect("listener@example.com", "secret");
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.description());
//! }
//! ```

pub mod error;
pub mod player;
pub mod tasks;

pub use error::{CoreError, Result};
pub use player::Player;
pub use tasks::{TaskHandle, TaskPool};

pub use core_runtime::config::{CoreConfig, PartnerConfig, PlayerSettings};
pub use core_runtime::events::{CoreEvent, EventStream};
