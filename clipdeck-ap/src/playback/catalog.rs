//! Track catalog: folder scan, lookups and search

use super::track::AudioTrack;
use crate::config::TrackOverride;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions picked up by a folder scan
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "ogg", "flac"];

#[derive(Debug, Default, Clone)]
pub struct TrackCatalog {
    tracks: Vec<Arc<AudioTrack>>,
}

impl TrackCatalog {
    pub fn new(tracks: Vec<Arc<AudioTrack>>) -> Self {
        Self { tracks }
    }

    /// Build a catalog from every audio file below `folder`
    ///
    /// Ids follow file-name order. `overrides` is keyed by the path relative
    /// to `folder`, using `/` separators.
    pub fn scan(folder: &Path, overrides: &HashMap<String, TrackOverride>) -> Result<Self> {
        if !folder.is_dir() {
            return Err(Error::NotFound(format!("Audio folder {}", folder.display())));
        }

        let mut files: Vec<_> = WalkDir::new(folder)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let tracks: Vec<Arc<AudioTrack>> = files
            .iter()
            .enumerate()
            .map(|(id, path)| {
                let track = AudioTrack::from_path(id as i64, path);
                let key = relative_key(folder, path);
                if let Some(o) = overrides.get(&key) {
                    if let Some(volume) = o.volume {
                        track.set_volume(volume);
                    }
                    if let Some(binding) = o.binding {
                        track.set_binding(binding);
                    }
                }
                Arc::new(track)
            })
            .collect();

        info!("Scanned {}: {} tracks", folder.display(), tracks.len());
        Ok(Self { tracks })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Arc<AudioTrack>] {
        &self.tracks
    }

    pub fn get(&self, id: i64) -> Option<Arc<AudioTrack>> {
        if id < 0 {
            return None;
        }
        self.tracks.iter().find(|t| t.id() == id).cloned()
    }

    /// Take a track out of the catalog
    pub fn remove(&mut self, id: i64) -> Option<Arc<AudioTrack>> {
        let index = self.tracks.iter().position(|t| t.id() == id)?;
        Some(self.tracks.remove(index))
    }

    /// Case-insensitive exact name match
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AudioTrack>> {
        self.tracks
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn find_by_binding(&self, code: u32) -> Option<Arc<AudioTrack>> {
        if code == 0 {
            return None;
        }
        self.tracks.iter().find(|t| t.binding() == code).cloned()
    }

    /// Bind `code` to track `id`, taking it away from any other track
    ///
    /// A code of 0 clears the binding.
    pub fn set_binding(&self, id: i64, code: u32) -> Result<()> {
        let track = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Track {}", id)))?;
        if code != 0 {
            for other in self.tracks.iter().filter(|t| t.binding() == code) {
                debug!("Binding {} moved away from '{}'", code, other.name());
                other.set_binding(0);
            }
        }
        track.set_binding(code);
        Ok(())
    }

    /// Filter tracks with a `prefix:value` query
    ///
    /// - `name:` case-insensitive substring of the track name
    /// - `id:` exact catalog id
    /// - `bind:` substring of the binding code
    ///
    /// Unknown prefixes and empty values match nothing.
    pub fn search(&self, query: &str) -> Vec<Arc<AudioTrack>> {
        let Some((prefix, value)) = query.split_once(':') else {
            return Vec::new();
        };
        let value = value.trim();
        if value.is_empty() {
            return Vec::new();
        }

        match prefix.trim().to_ascii_lowercase().as_str() {
            "name" => {
                let needle = value.to_uppercase();
                self.tracks
                    .iter()
                    .filter(|t| t.name().to_uppercase().contains(&needle))
                    .cloned()
                    .collect()
            }
            "id" => value
                .parse::<i64>()
                .ok()
                .and_then(|id| self.get(id))
                .into_iter()
                .collect(),
            "bind" => self
                .tracks
                .iter()
                .filter(|t| t.binding() != 0 && t.binding().to_string().contains(value))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn relative_key(folder: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(folder).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
