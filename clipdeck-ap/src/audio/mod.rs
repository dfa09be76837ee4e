//! Audio subsystem: decoding, conversion, dynamics and device output

pub mod byte_buffer;
pub mod device_manager;
pub mod dynamics;
pub mod output;
pub mod resampler;
pub mod session;

pub use byte_buffer::{ByteBufferIO, SeekOrigin};
pub use device_manager::{DeviceManager, DeviceState};
pub use dynamics::DynamicsProcessor;
pub use output::{AudioBackend, CpalBackend, DeviceInfo, FillCallback, OutputDevice};
pub use resampler::{ResamplerKind, SampleRateConverter};
pub use session::{AudioFormat, AudioSession};
