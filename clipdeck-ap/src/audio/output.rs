//! Audio output devices
//!
//! The playback engine talks to hardware through two small traits so the
//! device layer can be swapped (cpal in production, a manual pump in tests).
//! Every device is opened with the engine's fill callback and delivers
//! interleaved stereo f32 little-endian bytes.

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, PauseStreamError, PlayStreamError, Stream, StreamConfig, StreamError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Output channel count of every device
pub const OUTPUT_CHANNELS: usize = 2;

/// Bytes per output frame (two f32 samples)
pub const BYTES_PER_FRAME: usize = OUTPUT_CHANNELS * std::mem::size_of::<f32>();

/// Called on the audio thread with a zeroed destination and its frame count
pub type FillCallback = Arc<dyn Fn(&mut [u8], usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Host audio API
pub trait AudioBackend: Send + Sync {
    /// (Re)create the host context
    fn initialize_context(&self) -> Result<()>;

    /// Enumerate output devices; at most one entry is marked default
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a device in the stopped state
    fn open_device(
        &self,
        info: &DeviceInfo,
        sample_rate: u32,
        fill: FillCallback,
    ) -> Result<Box<dyn OutputDevice>>;
}

/// One opened output device
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    /// Begin pulling audio; [`Error::DeviceUnavailable`] when the device is gone
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn is_started(&self) -> bool;
}

/// cpal-backed device layer on the platform default host
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn initialize_context(&self) -> Result<()> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices: Vec<DeviceInfo> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .map(|name| DeviceInfo {
                is_default: false,
                name,
            })
            .collect();

        if let Some(default_name) = default_name {
            if let Some(d) = devices.iter_mut().find(|d| d.name == default_name) {
                d.is_default = true;
            }
        }

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    fn open_device(
        &self,
        info: &DeviceInfo,
        sample_rate: u32,
        fill: FillCallback,
    ) -> Result<Box<dyn OutputDevice>> {
        let host = cpal::default_host();
        let found = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(info.name.as_str()));
        let device = match found {
            Some(device) => device,
            None if info.is_default => host
                .default_output_device()
                .ok_or_else(|| Error::DeviceUnavailable("No default output device".to_string()))?,
            None => return Err(Error::DeviceUnavailable(format!("Device '{}' is gone", info.name))),
        };

        let config = StreamConfig {
            channels: OUTPUT_CHANNELS as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        let device_name = info.name.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                    let frames = data.len() / OUTPUT_CHANNELS;
                    fill(bytemuck::cast_slice_mut(data), frames);
                },
                move |err| {
                    error!("Audio stream error on '{}': {}", device_name, err);
                    if matches!(err, StreamError::DeviceNotAvailable) {
                        lost_flag.store(true, Ordering::SeqCst);
                    }
                },
                None,
            )
            .map_err(|e| match e {
                BuildStreamError::DeviceNotAvailable => {
                    Error::DeviceUnavailable(format!("Device '{}' not available", info.name))
                }
                other => Error::AudioOutput(format!("Failed to build stream on '{}': {}", info.name, other)),
            })?;

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Initial pause on '{}' failed: {}", info.name, e);
        }

        info!("Opened output device '{}' at {} Hz", info.name, sample_rate);
        Ok(Box::new(CpalDevice {
            name: info.name.clone(),
            stream,
            lost,
            started: false,
        }))
    }
}

pub struct CpalDevice {
    name: String,
    stream: Stream,
    lost: Arc<AtomicBool>,
    started: bool,
}

// cpal::Stream is !Send on some platforms. The stream is only driven through
// play/pause and dropped by whoever owns the device slot, always under the
// engine's switch lock.
unsafe impl Send for CpalDevice {}

impl OutputDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable(format!("Device '{}' was lost", self.name)));
        }
        self.stream.play().map_err(|e| match e {
            PlayStreamError::DeviceNotAvailable => {
                Error::DeviceUnavailable(format!("Device '{}' not available", self.name))
            }
            other => Error::AudioOutput(format!("Failed to start stream: {}", other)),
        })?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.stream.pause().map_err(|e| match e {
            PauseStreamError::DeviceNotAvailable => {
                Error::DeviceUnavailable(format!("Device '{}' not available", self.name))
            }
            other => Error::AudioOutput(format!("Failed to pause stream: {}", other)),
        })
    }

    fn is_started(&self) -> bool {
        self.started
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
