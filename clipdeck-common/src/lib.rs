//! # clipdeck Common Library
//!
//! Shared code for the clipdeck crates:
//! - Player event types and the broadcast event bus
//! - Configuration file discovery and loading
//! - Common error type

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
