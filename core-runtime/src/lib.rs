//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the radio core:
//! - Logging and tracing bootstrap
//! - Configuration management (host capabilities, partner secrets, player policy)
//! - Event bus carrying the unified UI event stream
//!
//! Every other core crate depends on this one for its event payload types and
//! its configuration structs.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
