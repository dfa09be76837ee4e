//! # clipdeck audio player library (clipdeck-ap)
//!
//! On-demand clip player with a single live output stream.
//!
//! **Purpose:** Decode clips from a folder, play one at a time on a chosen
//! output device, queue the rest, and pass every sample through volume
//! scaling and a peak limiter.
//!
//! **Architecture:** symphonia decode, rubato conversion, cpal output. The
//! device pulls bytes through a fill callback that decodes on demand into
//! a ring buffer.

pub mod audio;
pub mod config;
pub mod console;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::PlaybackEngine;
