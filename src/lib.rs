//! Workspace façade crate.
//!
//! Host applications can depend on `radio-workspace` and enable the
//! `desktop-shims` feature to pull in the player orchestrator together with the
//! reqwest-backed HTTP bridge, without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
