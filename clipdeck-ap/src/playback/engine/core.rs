//! Core playback engine - state, lifecycle and configuration
//!
//! **Responsibilities:**
//! - PlaybackEngine struct definition and initialization
//! - Starting a track on a device and finishing it (queue advancement)
//! - Configuration changes that touch every track (sample rate, resampler)
//! - Runtime setters for volumes and limiter parameters

use crate::audio::device_manager::DeviceManager;
use crate::audio::dynamics::DynamicsProcessor;
use crate::audio::output::{AudioBackend, FillCallback, BYTES_PER_FRAME};
use crate::audio::resampler::ResamplerKind;
use crate::config::{self, PlayerSettings};
use crate::error::{Error, Result};
use crate::playback::catalog::TrackCatalog;
use crate::playback::queue::PlaybackQueue;
use crate::playback::ring_buffer::OutputRing;
use crate::playback::track::AudioTrack;
use chrono::Utc;
use clipdeck_common::events::{EventBus, PlayerEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Device slots and the track that owns the active one
///
/// Guarded by the playback-switch lock.
pub(super) struct SwitchState {
    pub(super) current: Option<Arc<AudioTrack>>,
    /// Index of the started device, if any
    pub(super) device: Option<usize>,
    pub(super) devices: DeviceManager,
    /// Bumped on every start; completions from older starts are ignored
    pub(super) generation: u64,
}

/// State read and written by the fill callback
pub(super) struct OutputState {
    /// Track the callback decodes from; cleared by the callback on completion
    pub(super) current: Option<Arc<AudioTrack>>,
    /// Start generation of `current`
    pub(super) generation: u64,
    pub(super) ring: OutputRing,
    /// Ring holds more than one device buffer; skip decoding this cycle
    pub(super) draining: bool,
    /// Shared compressor, created on first play
    pub(super) dynamics: Option<DynamicsProcessor>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Params {
    pub(super) sample_rate: u32,
    pub(super) resampler: ResamplerKind,
    pub(super) attack_ms: f32,
    pub(super) release_ms: f32,
    pub(super) threshold_db: f32,
}

/// Counters maintained by the fill callback
#[derive(Debug, Default)]
pub(super) struct CallbackStats {
    pub(super) fills: AtomicU64,
    /// Cycles that produced silence because a lock was busy
    pub(super) contended: AtomicU64,
    pub(super) convert_errors: AtomicU64,
    pub(super) decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StartMode {
    /// New playback from the beginning
    Fresh,
    /// Restart after a configuration change, keeping the decode position
    Resume,
}

/// Result of [`PlaybackEngine::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Nothing was playing, so the track started right away
    Started,
    /// Appended; `position` is 0-based
    Queued { position: usize },
}

/// One-stream clip player
///
/// Created behind an `Arc`; asynchronous completion work holds its own
/// reference. Call [`PlaybackEngine::shutdown`] before dropping the last
/// handle so device streams are torn down off the audio thread.
pub struct PlaybackEngine {
    pub(super) self_ref: Weak<PlaybackEngine>,
    pub(super) rt: Handle,
    pub(super) events: EventBus,
    pub(super) catalog: RwLock<TrackCatalog>,
    pub(super) queue: Mutex<PlaybackQueue>,
    pub(super) switch: Mutex<SwitchState>,
    pub(super) output: Mutex<OutputState>,
    pub(super) params: Mutex<Params>,
    /// Percent, f32 bits; read every fill cycle
    pub(super) global_volume: AtomicU32,
    pub(super) shut_down: AtomicBool,
    pub(super) stats: CallbackStats,
}

/// One second of output
pub(super) fn ring_capacity(sample_rate: u32) -> usize {
    sample_rate as usize * BYTES_PER_FRAME
}

impl PlaybackEngine {
    /// Build the engine and open every output device
    ///
    /// `rt` runs completion and queue-advance tasks.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        settings: &PlayerSettings,
        events: EventBus,
        rt: Handle,
    ) -> Result<Arc<Self>> {
        let params = Params {
            sample_rate: settings.sample_rate,
            resampler: settings.resampler_kind(),
            attack_ms: settings.attack_ms,
            release_ms: settings.release_ms,
            threshold_db: settings.limiter_threshold,
        };

        let engine = Arc::new_cyclic(|weak: &Weak<PlaybackEngine>| {
            let callback_ref = weak.clone();
            let fill: FillCallback = Arc::new(move |dst: &mut [u8], frames: usize| {
                if let Some(engine) = callback_ref.upgrade() {
                    engine.fill(dst, frames);
                }
            });
            let devices = DeviceManager::new(
                backend,
                fill,
                settings.sample_rate,
                settings.device_order.clone(),
            );

            PlaybackEngine {
                self_ref: weak.clone(),
                rt,
                events,
                catalog: RwLock::new(TrackCatalog::default()),
                queue: Mutex::new(PlaybackQueue::new(settings.queue_limit)),
                switch: Mutex::new(SwitchState {
                    current: None,
                    device: None,
                    devices,
                    generation: 0,
                }),
                output: Mutex::new(OutputState {
                    current: None,
                    generation: 0,
                    ring: OutputRing::new(ring_capacity(settings.sample_rate)),
                    draining: false,
                    dynamics: None,
                }),
                params: Mutex::new(params),
                global_volume: AtomicU32::new(settings.global_volume.to_bits()),
                shut_down: AtomicBool::new(false),
                stats: CallbackStats::default(),
            }
        });

        {
            let mut sw = engine.switch.lock();
            sw.devices.initialize()?;
            if !settings.device.is_empty() {
                if let Err(e) = sw.devices.select_by_name(&settings.device) {
                    warn!("Configured device not available, using default: {}", e);
                }
            }
            info!(
                "Playback engine ready: {} Hz, {} devices, resampler {}",
                params.sample_rate,
                sw.devices.devices().len(),
                params.resampler.name()
            );
        }

        Ok(engine)
    }

    /// Play `track` now, replacing whatever is playing
    ///
    /// `device` of `None` uses the default device.
    /// If the track cannot be started the queue advances as if it had
    /// finished.
    pub fn play(&self, track: Arc<AudioTrack>, device: Option<usize>) -> Result<()> {
        let mut sw = self.switch.lock();
        let result = self.start_locked(&mut sw, track, device, StartMode::Fresh);
        if result.is_err() && sw.current.is_none() {
            self.advance_locked(&mut sw);
        }
        result
    }

    /// Play immediately on the selected device, bypassing the queue
    pub fn force_play(&self, track: Arc<AudioTrack>) -> Result<()> {
        let selected = self.switch.lock().devices.selected();
        self.play(track, selected)
    }

    /// Stop the active device and release every handle
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sw = self.switch.lock();
        self.stop_current_locked(&mut sw);
        sw.devices.uninitialize_devices();
        info!("Playback engine shut down");
    }

    pub(super) fn start_locked(
        &self,
        sw: &mut SwitchState,
        track: Arc<AudioTrack>,
        device: Option<usize>,
        mode: StartMode,
    ) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("Engine is shut down".to_string()));
        }

        self.stop_current_locked(sw);

        let params = *self.params.lock();
        let prepared = track.resources().prepare(
            track.path(),
            params.sample_rate,
            params.resampler,
            mode == StartMode::Fresh,
        );
        if let Err(e) = prepared {
            error!("Cannot play '{}': {}", track.name(), e);
            self.abandon(&track, &e);
            return Err(e);
        }

        let Some(index) = sw.devices.resolve(device) else {
            let e = Error::DeviceUnavailable("No output devices".to_string());
            error!("Cannot play '{}': {}", track.name(), e);
            self.abandon(&track, &e);
            return Err(e);
        };
        sw.generation += 1;

        {
            let mut guard = self.output.lock();
            let out = &mut *guard;
            let dynamics = out.dynamics.get_or_insert_with(|| {
                DynamicsProcessor::new(
                    params.sample_rate,
                    params.attack_ms,
                    params.release_ms,
                    params.threshold_db,
                )
            });
            dynamics.configure(
                params.sample_rate,
                params.attack_ms,
                params.release_ms,
                params.threshold_db,
            );
            out.ring.clear();
            out.draining = false;
            out.current = Some(Arc::clone(&track));
            out.generation = sw.generation;
        }
        sw.current = Some(Arc::clone(&track));
        sw.device = Some(index);

        let reinits_before = sw.devices.reinit_count();
        let started = sw.devices.start_device(index);
        if sw.devices.reinit_count() != reinits_before {
            self.events.emit_lossy(PlayerEvent::DevicesReinitialized {
                device_count: sw.devices.devices().len(),
                timestamp: Utc::now(),
            });
        }

        match started {
            Ok(actual) => {
                sw.device = Some(actual);
                if mode == StartMode::Fresh {
                    info!("Playing '{}' on device {}", track.name(), actual);
                    self.events.emit_lossy(PlayerEvent::TrackStarted {
                        track_id: track.id(),
                        name: track.name().to_string(),
                        device_index: Some(actual),
                        timestamp: Utc::now(),
                    });
                } else {
                    debug!("Resumed '{}' on device {}", track.name(), actual);
                }
                Ok(())
            }
            Err(e) => {
                error!("Device start failed for '{}': {}", track.name(), e);
                self.clear_output();
                sw.current = None;
                sw.device = None;
                self.abandon(&track, &e);
                Err(e)
            }
        }
    }

    /// Stop the active device and drop the current track
    pub(super) fn stop_current_locked(&self, sw: &mut SwitchState) {
        if let Some(index) = sw.device.take() {
            sw.devices.stop_device(index);
        }
        self.clear_output();
        if let Some(prev) = sw.current.take() {
            if prev.is_removed() && !self.queue.lock().contains(&prev) {
                prev.release();
            }
        }
    }

    pub(super) fn clear_output(&self) {
        let mut out = self.output.lock();
        out.current = None;
        out.draining = false;
        out.ring.clear();
    }

    fn abandon(&self, track: &Arc<AudioTrack>, err: &Error) {
        if track.is_removed() && !self.queue.lock().contains(track) {
            track.release();
        }
        self.events
            .emit_lossy(PlayerEvent::error(format!("{}: {}", track.name(), err)));
    }

    /// Pop queued tracks until one starts or the queue is empty
    pub(super) fn advance_locked(&self, sw: &mut SwitchState) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(next) = next else {
                break;
            };
            self.emit_queue_changed();
            let selected = sw.devices.selected();
            match self.start_locked(sw, next, selected, StartMode::Fresh) {
                Ok(()) => break,
                Err(e) => warn!("Skipping queued track: {}", e),
            }
        }
    }

    /// Completion of `track`, run off the audio thread
    ///
    /// `generation` is the start the callback was serving. When the track
    /// has been started again since, only the event and release checks run.
    pub(super) fn finish_track(&self, track: Arc<AudioTrack>, generation: u64) {
        let mut sw = self.switch.lock();
        let still_current = sw.generation == generation
            && sw
                .current
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, &track));
        if !still_current {
            debug!(
                "Completion of '{}' is stale (generation {} vs {})",
                track.name(),
                generation,
                sw.generation
            );
        }
        if still_current {
            if let Some(index) = sw.device.take() {
                sw.devices.stop_device(index);
            }
            sw.current = None;
        }

        let replayed = sw
            .current
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, &track));
        if track.is_removed() && !replayed && !self.queue.lock().contains(&track) {
            track.release();
        }

        info!("Finished '{}'", track.name());
        self.events.emit_lossy(PlayerEvent::TrackFinished {
            track_id: track.id(),
            name: track.name().to_string(),
            timestamp: Utc::now(),
        });

        if still_current && !self.shut_down.load(Ordering::SeqCst) {
            self.advance_locked(&mut sw);
        }
    }

    /// Hand a finished track to a blocking task
    pub(super) fn spawn_finish(&self, track: Arc<AudioTrack>, generation: u64) {
        if let Some(engine) = self.self_ref.upgrade() {
            self.rt
                .spawn_blocking(move || engine.finish_track(track, generation));
        }
    }

    pub(super) fn emit_queue_changed(&self) {
        let queue_len = self.queue.lock().len();
        self.events.emit_lossy(PlayerEvent::QueueChanged {
            queue_len,
            timestamp: Utc::now(),
        });
    }

    /// Drop converter state of every known track
    fn clear_conversion_all(&self, sw: &SwitchState) {
        for track in self.catalog.read().tracks() {
            track.resources().clear_conversion();
        }
        for track in self.queue.lock().snapshot() {
            track.resources().clear_conversion();
        }
        if let Some(track) = &sw.current {
            track.resources().clear_conversion();
        }
    }

    /// Change the output sample rate
    ///
    /// Stops the active device, drops every converter, reopens all devices
    /// at the new rate and resumes the current track where it was.
    pub fn set_sample_rate(&self, sample_rate: u32) -> Result<()> {
        let sample_rate = config::validate_sample_rate(sample_rate).map_err(|e| {
            warn!("Rejected sample rate change: {}", e);
            e
        })?;

        let mut sw = self.switch.lock();
        let resume = sw.current.clone();
        let device = sw.device;
        if let Some(index) = sw.device.take() {
            sw.devices.stop_device(index);
        }
        {
            let mut out = self.output.lock();
            out.current = None;
            out.draining = false;
            out.ring = OutputRing::new(ring_capacity(sample_rate));
        }

        self.params.lock().sample_rate = sample_rate;
        self.clear_conversion_all(&sw);
        sw.current = None;

        sw.devices.set_sample_rate(sample_rate);
        if let Err(e) = sw.devices.initialize_devices() {
            error!("Failed to reopen devices at {} Hz: {}", sample_rate, e);
            self.events.emit_lossy(PlayerEvent::error(e.to_string()));
            return Err(e);
        }
        self.events.emit_lossy(PlayerEvent::DevicesReinitialized {
            device_count: sw.devices.devices().len(),
            timestamp: Utc::now(),
        });
        info!("Output sample rate set to {} Hz", sample_rate);

        if let Some(track) = resume {
            if let Err(e) = self.start_locked(&mut sw, track, device, StartMode::Resume) {
                warn!("Could not resume after sample rate change: {}", e);
                self.advance_locked(&mut sw);
            }
        }
        Ok(())
    }

    /// Switch the conversion algorithm (id 0..=4)
    pub fn set_resampler(&self, id: i64) -> Result<()> {
        let kind = config::validate_resampler(id).map_err(|e| {
            warn!("Rejected resampler change: {}", e);
            e
        })?;

        let mut sw = self.switch.lock();
        if self.params.lock().resampler == kind {
            return Ok(());
        }
        let resume = sw.current.clone();
        let device = sw.device;
        if let Some(index) = sw.device.take() {
            sw.devices.stop_device(index);
        }
        self.clear_output();

        self.params.lock().resampler = kind;
        self.clear_conversion_all(&sw);
        sw.current = None;
        info!("Resampler set to {}", kind.name());

        if let Some(track) = resume {
            if let Err(e) = self.start_locked(&mut sw, track, device, StartMode::Resume) {
                warn!("Could not resume after resampler change: {}", e);
                self.advance_locked(&mut sw);
            }
        }
        Ok(())
    }

    /// Global volume in percent
    pub fn set_global_volume(&self, volume: f32) -> Result<()> {
        let volume = config::validate_volume(volume).map_err(|e| {
            warn!("Rejected global volume: {}", e);
            e
        })?;
        self.global_volume.store(volume.to_bits(), Ordering::Relaxed);
        debug!("Global volume set to {:.1}%", volume);
        Ok(())
    }

    pub fn set_track_volume(&self, id: i64, volume: f32) -> Result<()> {
        let volume = config::validate_volume(volume).map_err(|e| {
            warn!("Rejected volume for track {}: {}", id, e);
            e
        })?;
        let track = self
            .catalog
            .read()
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Track {}", id)))?;
        track.set_volume(volume);
        Ok(())
    }

    /// Limiter threshold in dB; applies to the live processor immediately
    pub fn set_limiter_threshold(&self, threshold_db: f32) -> Result<()> {
        let threshold_db = config::validate_threshold(threshold_db).map_err(|e| {
            warn!("Rejected limiter threshold: {}", e);
            e
        })?;
        self.params.lock().threshold_db = threshold_db;
        if let Some(dynamics) = self.output.lock().dynamics.as_mut() {
            dynamics.set_threshold(threshold_db);
        }
        Ok(())
    }

    /// Gain attack time; used from the next track start
    pub fn set_attack_ms(&self, attack_ms: f32) -> Result<()> {
        let attack_ms = config::validate_time_ms(attack_ms).map_err(|e| {
            warn!("Rejected attack time: {}", e);
            e
        })?;
        self.params.lock().attack_ms = attack_ms;
        Ok(())
    }

    /// Gain release time; used from the next track start
    pub fn set_release_ms(&self, release_ms: f32) -> Result<()> {
        let release_ms = config::validate_time_ms(release_ms).map_err(|e| {
            warn!("Rejected release time: {}", e);
            e
        })?;
        self.params.lock().release_ms = release_ms;
        Ok(())
    }

    /// 0 removes the limit; entries already queued are kept
    pub fn set_queue_limit(&self, limit: usize) {
        self.queue.lock().set_limit(limit);
    }

    /// Select the output device by name; empty selects the default device
    pub fn select_device(&self, name: &str) -> Result<()> {
        self.switch.lock().devices.select_by_name(name)
    }

    pub fn set_binding(&self, id: i64, code: u32) -> Result<()> {
        self.catalog.read().set_binding(id, code)
    }
}
