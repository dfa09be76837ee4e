//! Status accessors
//!
//! Read-only views for the console, the event printer and tests.

use super::core::PlaybackEngine;
use crate::audio::device_manager::DeviceState;
use crate::audio::output::DeviceInfo;
use crate::audio::resampler::ResamplerKind;
use crate::playback::track::AudioTrack;
use clipdeck_common::events::PlayerEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Snapshot of fill callback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackStatsSnapshot {
    pub fills: u64,
    pub contended: u64,
    pub convert_errors: u64,
    pub decode_errors: u64,
    pub ring_overruns: u64,
}

impl PlaybackEngine {
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Queued tracks in play order
    pub fn queue_snapshot(&self) -> Vec<Arc<AudioTrack>> {
        self.queue.lock().snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn queue_limit(&self) -> usize {
        self.queue.lock().limit()
    }

    /// Track holding the device, if any
    pub fn current_track(&self) -> Option<Arc<AudioTrack>> {
        self.switch.lock().current.clone()
    }

    /// Index of the started device, if any
    pub fn current_device(&self) -> Option<usize> {
        self.switch.lock().device
    }

    pub fn is_playing(&self) -> bool {
        self.switch.lock().current.is_some()
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.switch.lock().devices.devices().to_vec()
    }

    pub fn selected_device(&self) -> Option<usize> {
        self.switch.lock().devices.selected()
    }

    pub fn default_device(&self) -> Option<usize> {
        self.switch.lock().devices.default_index()
    }

    /// Devices with a running stream
    pub fn started_devices(&self) -> Vec<usize> {
        self.switch.lock().devices.started_devices()
    }

    pub fn device_state(&self) -> DeviceState {
        self.switch.lock().devices.state()
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.lock().sample_rate
    }

    pub fn resampler(&self) -> ResamplerKind {
        self.params.lock().resampler
    }

    pub fn global_volume(&self) -> f32 {
        f32::from_bits(self.global_volume.load(Ordering::Relaxed))
    }

    pub fn limiter_threshold(&self) -> f32 {
        self.params.lock().threshold_db
    }

    pub fn attack_ms(&self) -> f32 {
        self.params.lock().attack_ms
    }

    pub fn release_ms(&self) -> f32 {
        self.params.lock().release_ms
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn callback_stats(&self) -> CallbackStatsSnapshot {
        CallbackStatsSnapshot {
            fills: self.stats.fills.load(Ordering::Relaxed),
            contended: self.stats.contended.load(Ordering::Relaxed),
            convert_errors: self.stats.convert_errors.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            ring_overruns: self.output.lock().ring.overruns(),
        }
    }
}
