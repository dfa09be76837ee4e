//! Output device bookkeeping and failure recovery
//!
//! Holds the ordered device list, one opened handle per device, and the
//! default/selected indices. Starting a device that turns out to be gone
//! triggers one full teardown and rebuild of the audio context before the
//! start is retried.

use super::output::{AudioBackend, DeviceInfo, FillCallback, OutputDevice};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Recovery state of the device layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Ready,
    /// A start failed with "unavailable"; a rebuild is about to run
    Degraded,
    Reinitializing,
    /// The rebuild or the retried start failed
    Failed,
}

/// Reorder `devices` so that position `i` holds the device named `names[i]`
///
/// Devices missing from `names` (or names with no device) keep their
/// relative order. Matching is by exact name.
pub fn align_by_names(devices: &mut [DeviceInfo], names: &[String]) {
    let limit = names.len().min(devices.len());
    for i in 0..limit {
        if devices[i].name == names[i] {
            continue;
        }
        if let Some(j) = (i + 1..devices.len()).find(|&j| devices[j].name == names[i]) {
            devices.swap(i, j);
        }
    }
}

pub struct DeviceManager {
    backend: Arc<dyn AudioBackend>,
    fill: FillCallback,
    sample_rate: u32,
    /// External device-name order to align with
    name_order: Vec<String>,
    devices: Vec<DeviceInfo>,
    handles: Vec<Option<Box<dyn OutputDevice>>>,
    selected: Option<usize>,
    /// Name behind `selected`, used to find it again after a rebuild
    selected_name: Option<String>,
    default: Option<usize>,
    state: DeviceState,
    /// Completed or attempted full rebuilds
    reinit_count: u64,
}

impl DeviceManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        fill: FillCallback,
        sample_rate: u32,
        name_order: Vec<String>,
    ) -> Self {
        Self {
            backend,
            fill,
            sample_rate,
            name_order,
            devices: Vec::new(),
            handles: Vec::new(),
            selected: None,
            selected_name: None,
            default: None,
            state: DeviceState::Ready,
            reinit_count: 0,
        }
    }

    /// Context, device list and handles in one go
    pub fn initialize(&mut self) -> Result<()> {
        self.initialize_context()?;
        self.list_devices()?;
        self.initialize_devices()
    }

    pub fn initialize_context(&self) -> Result<()> {
        self.backend.initialize_context()
    }

    /// Refresh the device list and the default/selected indices
    pub fn list_devices(&mut self) -> Result<()> {
        let mut devices = self.backend.list_devices()?;
        align_by_names(&mut devices, &self.name_order);

        self.default = devices.iter().position(|d| d.is_default);
        self.selected = self
            .selected_name
            .as_ref()
            .and_then(|name| devices.iter().position(|d| &d.name == name));
        if self.selected_name.is_some() && self.selected.is_none() {
            warn!(
                "Selected device {:?} disappeared, falling back to default",
                self.selected_name
            );
        }
        self.devices = devices;
        debug!(
            "Device list: {} devices, default {:?}, selected {:?}",
            self.devices.len(),
            self.default,
            self.selected
        );
        Ok(())
    }

    /// Open a handle for every listed device at the current sample rate
    ///
    /// A device that refuses to open keeps an empty slot; starting it later
    /// goes through the unavailable-recovery path.
    pub fn initialize_devices(&mut self) -> Result<()> {
        self.uninitialize_devices();
        let mut opened = 0;
        for info in &self.devices {
            match self
                .backend
                .open_device(info, self.sample_rate, Arc::clone(&self.fill))
            {
                Ok(handle) => {
                    opened += 1;
                    self.handles.push(Some(handle));
                }
                Err(e) => {
                    warn!("Failed to open device '{}': {}", info.name, e);
                    self.handles.push(None);
                }
            }
        }
        info!(
            "Initialized {}/{} output devices at {} Hz",
            opened,
            self.devices.len(),
            self.sample_rate
        );
        Ok(())
    }

    /// Stop and drop every handle
    pub fn uninitialize_devices(&mut self) {
        for handle in self.handles.iter_mut().flatten() {
            if let Err(e) = handle.stop() {
                debug!("Stop during teardown of '{}' failed: {}", handle.name(), e);
            }
        }
        self.handles.clear();
    }

    /// Full teardown and rebuild of the audio subsystem
    pub fn reinitialize_all(&mut self) -> Result<()> {
        self.state = DeviceState::Reinitializing;
        self.reinit_count += 1;
        info!("Reinitializing audio context and devices");
        self.uninitialize_devices();

        let result = self
            .initialize_context()
            .and_then(|_| self.list_devices())
            .and_then(|_| self.initialize_devices());

        self.state = match result {
            Ok(()) => DeviceState::Ready,
            Err(ref e) => {
                error!("Audio reinitialization failed: {}", e);
                DeviceState::Failed
            }
        };
        result
    }

    /// Resolve a requested index, falling back to the default device
    ///
    /// Callers that want the selected device pass it explicitly.
    pub fn resolve(&self, requested: Option<usize>) -> Option<usize> {
        requested
            .filter(|&i| i < self.devices.len())
            .or(self.default)
            .or(if self.devices.is_empty() { None } else { Some(0) })
    }

    /// Start the device at `index`
    ///
    /// On [`Error::DeviceUnavailable`] the whole subsystem is rebuilt and the
    /// start retried exactly once. The device is located again by name, or
    /// by index if its name is gone. Returns the index actually started.
    pub fn start_device(&mut self, index: usize) -> Result<usize> {
        let name = self.devices.get(index).map(|d| d.name.clone());
        match self.try_start(index) {
            Ok(()) => {
                self.state = DeviceState::Ready;
                return Ok(index);
            }
            Err(Error::DeviceUnavailable(msg)) => {
                warn!("Device {} unavailable ({}), rebuilding audio subsystem", index, msg);
                self.state = DeviceState::Degraded;
            }
            Err(e) => return Err(e),
        }

        self.reinitialize_all()?;

        let retry_index = name
            .and_then(|n| self.devices.iter().position(|d| d.name == n))
            .unwrap_or(index);
        match self.try_start(retry_index) {
            Ok(()) => {
                info!("Device {} started after reinitialization", retry_index);
                self.state = DeviceState::Ready;
                Ok(retry_index)
            }
            Err(e) => {
                error!("Device {} failed again after reinitialization: {}", retry_index, e);
                self.state = DeviceState::Failed;
                Err(e)
            }
        }
    }

    fn try_start(&mut self, index: usize) -> Result<()> {
        match self.handles.get_mut(index) {
            Some(Some(handle)) => handle.start(),
            Some(None) => Err(Error::DeviceUnavailable(format!("Device {} has no open handle", index))),
            None => Err(Error::DeviceUnavailable(format!("No device at index {}", index))),
        }
    }

    pub fn stop_device(&mut self, index: usize) {
        if let Some(Some(handle)) = self.handles.get_mut(index) {
            if let Err(e) = handle.stop() {
                warn!("Failed to stop device '{}': {}", handle.name(), e);
            }
        }
    }

    /// Indices of devices currently pulling audio
    pub fn started_devices(&self) -> Vec<usize> {
        self.handles
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.as_ref().filter(|h| h.is_started()).map(|_| i))
            .collect()
    }

    /// Select a device by name; an empty name selects the default device
    pub fn select_by_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            self.selected = None;
            self.selected_name = None;
            info!("Selected default output device");
            return Ok(());
        }
        let index = self
            .devices
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(format!("Output device '{}'", name)))?;
        self.selected = Some(index);
        self.selected_name = Some(name.to_string());
        info!("Selected output device {} '{}'", index, name);
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn default_index(&self) -> Option<usize> {
        self.default
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn reinit_count(&self) -> u64 {
        self.reinit_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            is_default: false,
        }
    }

    fn names(devices: &[DeviceInfo]) -> Vec<&str> {
        devices.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_align_matches_external_order() {
        let mut devices = vec![info("C"), info("A"), info("B")];
        align_by_names(&mut devices, &["A".to_string(), "B".to_string(), "C".to_string()]);
        assert_eq!(names(&devices), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_align_ignores_unknown_names() {
        let mut devices = vec![info("Speakers"), info("Headset"), info("HDMI")];
        align_by_names(
            &mut devices,
            &["Headset".to_string(), "Virtual Cable".to_string()],
        );
        assert_eq!(devices[0].name, "Headset");
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn test_align_with_more_names_than_devices() {
        let mut devices = vec![info("B"), info("A")];
        let order: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        align_by_names(&mut devices, &order);
        assert_eq!(names(&devices), vec!["A", "B"]);
    }
}
