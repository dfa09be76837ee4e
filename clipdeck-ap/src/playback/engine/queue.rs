//! Queue operations and catalog mutation
//!
//! **Responsibilities:**
//! - Enqueue (start right away when idle), skip, skip-all, remove
//! - Catalog replacement and track removal with sentinel marking

use super::core::{EnqueueOutcome, PlaybackEngine, StartMode, SwitchState};
use crate::error::{Error, Result};
use crate::playback::catalog::TrackCatalog;
use crate::playback::track::AudioTrack;
use std::sync::Arc;
use tracing::{debug, info};

impl PlaybackEngine {
    /// Queue `track`, or start it immediately if nothing is playing
    pub fn enqueue(&self, track: Arc<AudioTrack>) -> Result<EnqueueOutcome> {
        let mut sw = self.switch.lock();
        let idle = sw.current.is_none() && self.queue.lock().is_empty();
        if idle {
            let selected = sw.devices.selected();
            self.start_locked(&mut sw, track, selected, StartMode::Fresh)?;
            return Ok(EnqueueOutcome::Started);
        }

        let position = {
            let mut queue = self.queue.lock();
            queue.push(Arc::clone(&track)).map_err(|e| {
                info!("Not queueing '{}': {}", track.name(), e);
                e
            })?;
            queue.len() - 1
        };
        debug!("Queued '{}' at position {}", track.name(), position);
        self.emit_queue_changed();
        Ok(EnqueueOutcome::Queued { position })
    }

    /// End the current track early; the queue advances on completion
    pub fn skip(&self) {
        let sw = self.switch.lock();
        self.skip_locked(&sw);
    }

    /// Clear the queue, then skip the current track
    pub fn skip_all(&self) {
        let sw = self.switch.lock();
        let dropped = self.queue.lock().drain();
        for track in &dropped {
            if track.is_removed() && !is_current(&sw, track) {
                track.release();
            }
        }
        if !dropped.is_empty() {
            info!("Cleared {} queued tracks", dropped.len());
            self.emit_queue_changed();
        }
        self.skip_locked(&sw);
    }

    fn skip_locked(&self, sw: &SwitchState) {
        if let Some(track) = &sw.current {
            if let Some(session) = track.resources().session.as_mut() {
                session.skip_to_end();
            }
            info!("Skipping '{}'", track.name());
        }
    }

    /// Drop the queue entry at `position` (0-based)
    pub fn remove_queued(&self, position: usize) -> Result<Arc<AudioTrack>> {
        let sw = self.switch.lock();
        let track = {
            let mut queue = self.queue.lock();
            let track = queue
                .remove(position)
                .ok_or_else(|| Error::NotFound(format!("Queue position {}", position)))?;
            if track.is_removed() && !is_current(&sw, &track) && !queue.contains(&track) {
                track.release();
            }
            track
        };
        self.emit_queue_changed();
        Ok(track)
    }

    /// Swap in a new catalog
    ///
    /// Tracks of the old catalog that are playing or queued become
    /// sentinels and are released once they leave playback; the rest are
    /// released now.
    pub fn load_catalog(&self, catalog: TrackCatalog) {
        let sw = self.switch.lock();
        let count = catalog.len();
        let old = std::mem::replace(&mut *self.catalog.write(), catalog);
        let queue = self.queue.lock();
        for track in old.tracks() {
            if is_current(&sw, track) || queue.contains(track) {
                track.mark_removed();
            } else {
                track.release();
            }
        }
        info!("Catalog loaded: {} tracks ({} replaced)", count, old.len());
    }

    /// Take one track out of the catalog
    pub fn remove_track(&self, id: i64) -> Result<()> {
        let sw = self.switch.lock();
        let track = self
            .catalog
            .write()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Track {}", id)))?;
        if is_current(&sw, &track) || self.queue.lock().contains(&track) {
            track.mark_removed();
            debug!("'{}' removed while in use", track.name());
        } else {
            track.release();
        }
        Ok(())
    }

    pub fn track(&self, id: i64) -> Option<Arc<AudioTrack>> {
        self.catalog.read().get(id)
    }

    pub fn find_track(&self, name: &str) -> Option<Arc<AudioTrack>> {
        self.catalog.read().find_by_name(name)
    }

    pub fn track_for_binding(&self, code: u32) -> Option<Arc<AudioTrack>> {
        self.catalog.read().find_by_binding(code)
    }

    /// See [`TrackCatalog::search`]
    pub fn search(&self, query: &str) -> Vec<Arc<AudioTrack>> {
        self.catalog.read().search(query)
    }

    pub fn catalog_tracks(&self) -> Vec<Arc<AudioTrack>> {
        self.catalog.read().tracks().to_vec()
    }
}

fn is_current(sw: &SwitchState, track: &Arc<AudioTrack>) -> bool {
    sw.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, track))
}
