//! Playback engine
//!
//! **Module Structure:**
//! - `core.rs`: engine state, construction, track start/finish, configuration changes
//! - `callback.rs`: the device fill callback (real-time path)
//! - `queue.rs`: queue operations and catalog mutation
//! - `diagnostics.rs`: status accessors
//!
//! **Locking:** `switch` (device start/stop and current-track reassignment)
//! is taken before `queue`, `output` or any track's resources. The fill
//! callback only ever uses `try_lock`.

mod callback;
mod core;
mod diagnostics;
mod queue;

pub use self::core::{EnqueueOutcome, PlaybackEngine};
pub use diagnostics::CallbackStatsSnapshot;
