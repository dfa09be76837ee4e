//! FIFO of tracks waiting for the current one to finish

use super::track::AudioTrack;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    entries: VecDeque<Arc<AudioTrack>>,
    /// Maximum length, 0 = unbounded
    limit: usize,
}

impl PlaybackQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Append a track, refusing once a positive limit is reached
    pub fn push(&mut self, track: Arc<AudioTrack>) -> Result<()> {
        if self.limit != 0 && self.entries.len() >= self.limit {
            return Err(Error::QueueFull { limit: self.limit });
        }
        self.entries.push_back(track);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Arc<AudioTrack>> {
        self.entries.pop_front()
    }

    pub fn remove(&mut self, position: usize) -> Option<Arc<AudioTrack>> {
        self.entries.remove(position)
    }

    /// Empty the queue, handing back what was in it
    pub fn drain(&mut self) -> Vec<Arc<AudioTrack>> {
        self.entries.drain(..).collect()
    }

    pub fn contains(&self, track: &Arc<AudioTrack>) -> bool {
        self.entries.iter().any(|t| Arc::ptr_eq(t, track))
    }

    pub fn snapshot(&self) -> Vec<Arc<AudioTrack>> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Lowering the limit never evicts entries already queued
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}
