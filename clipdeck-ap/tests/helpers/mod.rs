//! Test helper modules for clipdeck-ap integration tests
//!
//! - MockBackend: device layer driven by hand, with failure injection
//! - audio_generator: deterministic WAV fixtures

#![allow(dead_code)]

pub mod audio_generator;
pub mod mock_backend;

pub use audio_generator::{generate_sine_wav, write_clip_folder};
pub use mock_backend::MockBackend;

use clipdeck_ap::config::PlayerSettings;
use clipdeck_ap::playback::PlaybackEngine;
use clipdeck_common::EventBus;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine on `backend` using the current tokio runtime
pub fn engine_with(backend: &MockBackend, settings: &PlayerSettings) -> Arc<PlaybackEngine> {
    PlaybackEngine::new(
        Arc::new(backend.clone()),
        settings,
        EventBus::new(256),
        tokio::runtime::Handle::current(),
    )
    .expect("engine init")
}

/// Pump the started device until `done` holds or `timeout` passes
pub async fn pump_until<F>(backend: &MockBackend, frames: usize, timeout: Duration, done: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        backend.pump(frames);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    done()
}
