//! Playback engine, track catalog and queue management

pub mod catalog;
pub mod engine;
pub mod queue;
pub mod ring_buffer;
pub mod track;

pub use catalog::TrackCatalog;
pub use engine::{CallbackStatsSnapshot, EnqueueOutcome, PlaybackEngine};
pub use queue::PlaybackQueue;
pub use ring_buffer::OutputRing;
pub use track::AudioTrack;
