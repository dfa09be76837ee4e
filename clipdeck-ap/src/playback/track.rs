//! Catalog tracks and their per-playback resources

use crate::audio::byte_buffer::SeekOrigin;
use crate::audio::resampler::{scratch_frames, ResamplerKind, SampleRateConverter};
use crate::audio::session::AudioSession;
use crate::error::Result;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::debug;

/// Identity given to tracks dropped from the catalog while still in use
pub const REMOVED_ID: i64 = -1;

/// Default per-track volume in percent
pub const DEFAULT_TRACK_VOLUME: f32 = 100.0;

/// Highest channel count sent to the converter; extra source channels are dropped
const MAX_OUTPUT_CHANNELS: usize = 2;

/// Decode and conversion state owned by a track while it plays
///
/// Created lazily on first play. Cleared when the track leaves the catalog
/// or when a configuration change invalidates converter state.
#[derive(Debug)]
pub struct TrackResources {
    pub session: Option<AudioSession>,
    /// Output rate / source rate; negative when unset
    pub ratio: f64,
    /// Interleaved read buffer at the source channel count
    pub scratch: Vec<f32>,
    /// First two channels of `scratch` for sources with more than two
    pub folded: Vec<f32>,
    pub converter: Option<SampleRateConverter>,
    /// Set once the session has returned 0 frames or failed
    pub decode_exhausted: bool,
}

impl Default for TrackResources {
    fn default() -> Self {
        Self {
            session: None,
            ratio: -1.0,
            scratch: Vec::new(),
            folded: Vec::new(),
            converter: None,
            decode_exhausted: false,
        }
    }
}

impl TrackResources {
    /// Get everything ready for playback at `output_rate`
    ///
    /// Opens the session on first use. An open session is rewound when
    /// `rewind` is set and otherwise continues where it stopped. Buffers
    /// and converter are rebuilt when the ratio is unknown.
    pub fn prepare(
        &mut self,
        path: &Path,
        output_rate: u32,
        kind: ResamplerKind,
        rewind: bool,
    ) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => {
                if rewind {
                    session.seek(0, SeekOrigin::Start)?;
                }
            }
            None => {
                self.session = Some(AudioSession::open(path)?);
            }
        }
        let format = match self.session.as_ref() {
            Some(session) => session.format(),
            None => return Ok(()),
        };

        if self.ratio < 0.0 || self.converter.is_none() {
            let ratio = output_rate as f64 / format.sample_rate as f64;
            let frames = scratch_frames(format.sample_rate, ratio);
            let out_channels = format.channels.min(MAX_OUTPUT_CHANNELS);

            self.scratch = vec![0.0; frames * format.channels];
            self.folded = if format.channels > MAX_OUTPUT_CHANNELS {
                vec![0.0; frames * out_channels]
            } else {
                Vec::new()
            };
            self.converter = Some(SampleRateConverter::new(kind, out_channels, frames, ratio)?);
            self.ratio = ratio;
            debug!(
                "Prepared {}: {} Hz -> {} Hz (ratio {:.4}), {} frame chunks",
                path.display(),
                format.sample_rate,
                output_rate,
                ratio,
                frames
            );
        } else if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }

        self.decode_exhausted = false;
        Ok(())
    }

    /// Forget cached conversion state, keeping the decode session
    pub fn clear_conversion(&mut self) {
        self.ratio = -1.0;
        self.scratch = Vec::new();
        self.folded = Vec::new();
        self.converter = None;
    }

    /// Drop everything, including the decode session
    pub fn release(&mut self) {
        self.clear_conversion();
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.decode_exhausted = false;
    }
}

/// One playable clip
#[derive(Debug)]
pub struct AudioTrack {
    id: AtomicI64,
    name: String,
    path: PathBuf,
    /// f32 bits, percent
    volume: AtomicU32,
    /// Opaque key code, 0 = unbound
    binding: AtomicU32,
    resources: Mutex<TrackResources>,
}

impl AudioTrack {
    pub fn new(id: i64, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: AtomicI64::new(id),
            name: name.into(),
            path: path.into(),
            volume: AtomicU32::new(DEFAULT_TRACK_VOLUME.to_bits()),
            binding: AtomicU32::new(0),
            resources: Mutex::new(TrackResources::default()),
        }
    }

    /// Track named after the file stem
    pub fn from_path(id: i64, path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(id, name, path)
    }

    pub fn id(&self) -> i64 {
        self.id.load(Ordering::Acquire)
    }

    /// Dropped from the catalog but possibly still playing or queued
    pub fn is_removed(&self) -> bool {
        self.id() == REMOVED_ID
    }

    pub fn mark_removed(&self) {
        self.id.store(REMOVED_ID, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn binding(&self) -> u32 {
        self.binding.load(Ordering::Relaxed)
    }

    pub fn set_binding(&self, code: u32) {
        self.binding.store(code, Ordering::Relaxed);
    }

    pub fn resources(&self) -> MutexGuard<'_, TrackResources> {
        self.resources.lock()
    }

    /// Non-blocking access for the audio callback
    pub fn try_resources(&self) -> Option<MutexGuard<'_, TrackResources>> {
        self.resources.try_lock()
    }

    /// Free decode and conversion state
    pub fn release(&self) {
        self.resources.lock().release();
        debug!("Released resources of '{}'", self.name);
    }
}
