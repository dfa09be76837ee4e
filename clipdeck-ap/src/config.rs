//! Player settings
//!
//! Loaded from TOML (see `clipdeck_common::config` for file discovery).
//! Every runtime change goes through the `validate_*` helpers; a rejected
//! value leaves the previous one in effect.

use crate::audio::resampler::ResamplerKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;
pub const DEFAULT_ATTACK_MS: f32 = 25.0;
pub const DEFAULT_RELEASE_MS: f32 = 50.0;
pub const DEFAULT_QUEUE_LIMIT: usize = 100;
/// Upper bound for global and per-track volume, in percent
pub const MAX_VOLUME: f32 = 1000.0;

/// Per-track overrides, keyed by path relative to the audio folder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOverride {
    pub volume: Option<f32>,
    pub binding: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// EnvFilter directive, e.g. "clipdeck_ap=debug"
    pub level: Option<String>,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub sample_rate: u32,
    /// Output device name, empty = system default
    pub device: String,
    /// Resampler id 0..=4 (sinc best, sinc medium, sinc fastest, zero-order hold, linear)
    pub resampler: i64,
    /// Percent
    pub global_volume: f32,
    /// dB
    pub limiter_threshold: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// 0 = unbounded
    pub queue_limit: usize,
    pub audio_folder: Option<PathBuf>,
    /// External device-name order the device list is aligned to
    pub device_order: Vec<String>,
    pub tracks: HashMap<String, TrackOverride>,
    pub logging: LoggingSettings,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            device: String::new(),
            resampler: ResamplerKind::Linear.id(),
            global_volume: 100.0,
            limiter_threshold: 0.0,
            attack_ms: DEFAULT_ATTACK_MS,
            release_ms: DEFAULT_RELEASE_MS,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            audio_folder: None,
            device_order: Vec::new(),
            tracks: HashMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PlayerSettings {
    /// Load from `path`; a missing file gives defaults
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: PlayerSettings = clipdeck_common::config::load_toml_or_default(path)?;
        settings.normalize();
        Ok(settings)
    }

    /// Replace invalid values with defaults, clamping the resampler id
    pub fn normalize(&mut self) {
        let defaults = PlayerSettings::default();

        self.resampler = ResamplerKind::from_id_clamped(self.resampler).id();
        if let Err(e) = validate_sample_rate(self.sample_rate) {
            warn!("{}; using {}", e, defaults.sample_rate);
            self.sample_rate = defaults.sample_rate;
        }
        if let Err(e) = validate_volume(self.global_volume) {
            warn!("{}; using {}", e, defaults.global_volume);
            self.global_volume = defaults.global_volume;
        }
        if let Err(e) = validate_threshold(self.limiter_threshold) {
            warn!("{}; using {}", e, defaults.limiter_threshold);
            self.limiter_threshold = defaults.limiter_threshold;
        }
        if let Err(e) = validate_time_ms(self.attack_ms) {
            warn!("Attack: {}; using {}", e, defaults.attack_ms);
            self.attack_ms = defaults.attack_ms;
        }
        if let Err(e) = validate_time_ms(self.release_ms) {
            warn!("Release: {}; using {}", e, defaults.release_ms);
            self.release_ms = defaults.release_ms;
        }
        self.tracks.retain(|key, o| match o.volume.map(validate_volume) {
            Some(Err(e)) => {
                warn!("Dropping override for {}: {}", key, e);
                false
            }
            _ => true,
        });
    }

    pub fn resampler_kind(&self) -> ResamplerKind {
        ResamplerKind::from_id_clamped(self.resampler)
    }
}

pub fn validate_sample_rate(rate: u32) -> Result<u32> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(Error::Config(format!(
            "Sample rate {} outside {}..={}",
            rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )))
    }
}

pub fn validate_volume(volume: f32) -> Result<f32> {
    if volume.is_finite() && (0.0..=MAX_VOLUME).contains(&volume) {
        Ok(volume)
    } else {
        Err(Error::Config(format!("Volume {} outside 0..={}", volume, MAX_VOLUME)))
    }
}

pub fn validate_threshold(threshold_db: f32) -> Result<f32> {
    if threshold_db.is_finite() {
        Ok(threshold_db)
    } else {
        Err(Error::Config(format!("Threshold {} is not a number", threshold_db)))
    }
}

pub fn validate_time_ms(time_ms: f32) -> Result<f32> {
    if time_ms.is_finite() && time_ms >= 0.0 {
        Ok(time_ms)
    } else {
        Err(Error::Config(format!("Time {} ms must be finite and >= 0", time_ms)))
    }
}

pub fn validate_resampler(id: i64) -> Result<ResamplerKind> {
    ResamplerKind::try_from(id)
}

/// Parse text input from a form or console line
pub fn parse_sample_rate(text: &str) -> Result<u32> {
    let rate = text
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("'{}' is not a sample rate", text.trim())))?;
    validate_sample_rate(rate)
}

pub fn parse_volume(text: &str) -> Result<f32> {
    validate_volume(parse_f32(text)?)
}

pub fn parse_threshold(text: &str) -> Result<f32> {
    validate_threshold(parse_f32(text)?)
}

pub fn parse_time_ms(text: &str) -> Result<f32> {
    validate_time_ms(parse_f32(text)?)
}

pub fn parse_queue_limit(text: &str) -> Result<usize> {
    text.trim()
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("'{}' is not a queue limit", text.trim())))
}

fn parse_f32(text: &str) -> Result<f32> {
    text.trim()
        .parse::<f32>()
        .map_err(|_| Error::Config(format!("'{}' is not a number", text.trim())))
}
