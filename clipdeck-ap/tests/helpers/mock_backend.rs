//! Hand-driven audio backend
//!
//! Devices never pull audio on their own: `pump` calls the fill callback of
//! the started device. Start failures can be queued up to exercise the
//! rebuild-and-retry path.

use clipdeck_ap::audio::{AudioBackend, DeviceInfo, FillCallback, OutputDevice};
use clipdeck_ap::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct DeviceSlot {
    name: String,
    sample_rate: u32,
    fill: FillCallback,
    started: AtomicBool,
    closed: AtomicBool,
}

impl DeviceSlot {
    fn live(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Shared {
    devices: Mutex<Vec<DeviceInfo>>,
    slots: Mutex<Vec<Arc<DeviceSlot>>>,
    /// Upcoming starts that report the device as gone
    failing_starts: AtomicUsize,
    context_inits: AtomicUsize,
    starts: AtomicUsize,
    max_live: AtomicUsize,
}

impl Shared {
    fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.live()).count()
    }
}

#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    /// Backend exposing `names`; the first one is the default device
    pub fn new(names: &[&str]) -> Self {
        let devices = names
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo {
                name: name.to_string(),
                is_default: i == 0,
            })
            .collect();
        let shared = Shared {
            devices: Mutex::new(devices),
            ..Default::default()
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.shared.failing_starts.store(count, Ordering::SeqCst);
    }

    pub fn context_inits(&self) -> usize {
        self.shared.context_inits.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously started devices seen so far
    pub fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    pub fn live_devices(&self) -> Vec<String> {
        self.shared
            .slots
            .lock()
            .iter()
            .filter(|s| s.live())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Sample rate the most recent handle for `name` was opened with
    pub fn opened_rate(&self, name: &str) -> Option<u32> {
        self.shared
            .slots
            .lock()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.sample_rate)
    }

    /// Pull `frames` stereo frames from the started device
    ///
    /// Returns `None` when no device is started.
    pub fn pump(&self, frames: usize) -> Option<Vec<f32>> {
        let slot = self
            .shared
            .slots
            .lock()
            .iter()
            .find(|s| s.live())
            .cloned()?;
        let mut bytes = vec![0u8; frames * 8];
        (slot.fill)(&mut bytes, frames);
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }
}

impl AudioBackend for MockBackend {
    fn initialize_context(&self) -> Result<()> {
        self.shared.context_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.shared.devices.lock().clone())
    }

    fn open_device(
        &self,
        info: &DeviceInfo,
        sample_rate: u32,
        fill: FillCallback,
    ) -> Result<Box<dyn OutputDevice>> {
        let slot = Arc::new(DeviceSlot {
            name: info.name.clone(),
            sample_rate,
            fill,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.shared.slots.lock().push(Arc::clone(&slot));
        Ok(Box::new(MockDevice {
            slot,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockDevice {
    slot: Arc<DeviceSlot>,
    shared: Arc<Shared>,
}

impl OutputDevice for MockDevice {
    fn name(&self) -> &str {
        &self.slot.name
    }

    fn start(&mut self) -> Result<()> {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        let failing = self.shared.failing_starts.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_starts.store(failing - 1, Ordering::SeqCst);
            return Err(Error::DeviceUnavailable(format!("{} unplugged", self.slot.name)));
        }
        self.slot.started.store(true, Ordering::SeqCst);
        let live = self.shared.live_count();
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.slot.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.slot.live()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.slot.started.store(false, Ordering::SeqCst);
        self.slot.closed.store(true, Ordering::SeqCst);
    }
}
