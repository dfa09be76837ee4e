//! Device fill callback
//!
//! Runs on the audio thread. Only `try_lock` is used here; when any lock is
//! busy the cycle outputs silence instead of waiting.

use super::core::PlaybackEngine;
use crate::audio::dynamics::DynamicsProcessor;
use crate::error::Result;
use crate::playback::ring_buffer::OutputRing;
use crate::playback::track::TrackResources;
use std::sync::atomic::Ordering;
use tracing::{trace, warn};

/// Decode rounds per cycle before giving up on filling the whole buffer
const MAX_DECODE_ROUNDS: usize = 16;

/// Bytes staged on the stack before a ring push
const STAGE_BYTES: usize = 1024;

impl PlaybackEngine {
    /// Fill one device buffer with interleaved stereo f32 LE bytes
    pub(crate) fn fill(&self, dst: &mut [u8], _frames: usize) {
        self.stats.fills.fetch_add(1, Ordering::Relaxed);

        let Some(mut guard) = self.output.try_lock() else {
            self.stats.contended.fetch_add(1, Ordering::Relaxed);
            dst.fill(0);
            return;
        };
        let out = &mut *guard;
        let Some(track) = out.current.clone() else {
            dst.fill(0);
            return;
        };
        let Some(mut res) = track.try_resources() else {
            self.stats.contended.fetch_add(1, Ordering::Relaxed);
            dst.fill(0);
            return;
        };

        let global_volume = f32::from_bits(self.global_volume.load(Ordering::Relaxed));
        let track_volume = track.volume();
        let mut chunk_failed = false;

        if !out.draining {
            let mut rounds = 0;
            while out.ring.occupied_len() < dst.len()
                && !res.decode_exhausted
                && rounds < MAX_DECODE_ROUNDS
            {
                rounds += 1;
                let Some(dynamics) = out.dynamics.as_mut() else {
                    break;
                };
                if let Err(e) = self.decode_chunk(
                    &mut res,
                    &mut out.ring,
                    dynamics,
                    track_volume,
                    global_volume,
                ) {
                    let count = self.stats.convert_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 1000 == 1 {
                        warn!(
                            "Conversion failed for '{}': {} (total: {})",
                            track.name(),
                            e,
                            count
                        );
                    }
                    res.decode_exhausted = true;
                    chunk_failed = true;
                    break;
                }
            }
        }

        let copied = out.ring.pop_into(dst);
        dst[copied..].fill(0);
        out.draining = chunk_failed || out.ring.occupied_len() > dst.len();

        if copied == 0 && res.decode_exhausted {
            trace!("'{}' drained", track.name());
            drop(res);
            let generation = out.generation;
            out.current = None;
            out.draining = false;
            drop(guard);
            self.spawn_finish(track, generation);
        }
    }

    /// Decode, convert and process one chunk into the ring
    ///
    /// End of stream and decode errors mark the track exhausted and return
    /// `Ok`; only conversion failures are reported.
    fn decode_chunk(
        &self,
        res: &mut TrackResources,
        ring: &mut OutputRing,
        dynamics: &mut DynamicsProcessor,
        track_volume: f32,
        global_volume: f32,
    ) -> Result<()> {
        let res = &mut *res;
        let Some(session) = res.session.as_mut() else {
            res.decode_exhausted = true;
            return Ok(());
        };
        let Some(converter) = res.converter.as_mut() else {
            res.decode_exhausted = true;
            return Ok(());
        };
        let source_channels = session.format().channels;

        let frames = match session.read_frames(&mut res.scratch) {
            Ok(frames) => frames,
            Err(e) => {
                let count = self.stats.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 1000 == 1 {
                    warn!("Decode failed: {} (total: {})", e, count);
                }
                0
            }
        };
        if frames == 0 {
            res.decode_exhausted = true;
            // Whatever is still inside the filter belongs to this track
            let ratio = res.ratio;
            let mono = converter.channels() == 1;
            let tail = converter.process(&[], ratio, true)?;
            push_processed(tail, mono, ring, dynamics, track_volume, global_volume);
            return Ok(());
        }

        let input: &[f32] = if source_channels > 2 {
            for (dst, src) in res
                .folded
                .chunks_exact_mut(2)
                .zip(res.scratch.chunks_exact(source_channels))
                .take(frames)
            {
                dst.copy_from_slice(&src[..2]);
            }
            &res.folded[..frames * 2]
        } else {
            &res.scratch[..frames * source_channels]
        };

        let ratio = res.ratio;
        let mono = converter.channels() == 1;
        let converted = converter.process(input, ratio, session.is_at_end())?;
        push_processed(converted, mono, ring, dynamics, track_volume, global_volume);
        Ok(())
    }
}

/// Apply dynamics and volume, then append LE bytes to the ring
///
/// Mono samples are written twice to fill both output channels.
fn push_processed(
    samples: &[f32],
    mono: bool,
    ring: &mut OutputRing,
    dynamics: &mut DynamicsProcessor,
    track_volume: f32,
    global_volume: f32,
) {
    let copies = if mono { 2 } else { 1 };
    let mut stage = [0u8; STAGE_BYTES];
    let mut staged = 0;
    for &sample in samples {
        let bytes = dynamics
            .process_with_volume(sample, track_volume, global_volume)
            .to_le_bytes();
        for _ in 0..copies {
            if staged + bytes.len() > STAGE_BYTES {
                ring.push(&stage[..staged]);
                staged = 0;
            }
            stage[staged..staged + bytes.len()].copy_from_slice(&bytes);
            staged += bytes.len();
        }
    }
    if staged > 0 {
        ring.push(&stage[..staged]);
    }
}
