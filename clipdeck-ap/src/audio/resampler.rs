//! Sample-rate conversion using rubato
//!
//! Converts chunks of interleaved f32 audio from a track's source rate to the
//! configured output rate. One converter belongs to one active track; all
//! working buffers are allocated up front so `process` does not allocate on
//! the audio callback thread.

use crate::error::{Error, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

/// Highest channel count a converter accepts
pub const MAX_CHANNELS: usize = 8;

/// Headroom for runtime ratio adjustments without rebuilding
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// Upper bound on silent chunks run to drain the filter at end of input
const MAX_FLUSH_ROUNDS: usize = 4;

/// Conversion algorithm, numbered like the classic resampler ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerKind {
    SincBest = 0,
    SincMedium = 1,
    SincFastest = 2,
    ZeroOrderHold = 3,
    #[default]
    Linear = 4,
}

impl ResamplerKind {
    pub const ALL: [ResamplerKind; 5] = [
        ResamplerKind::SincBest,
        ResamplerKind::SincMedium,
        ResamplerKind::SincFastest,
        ResamplerKind::ZeroOrderHold,
        ResamplerKind::Linear,
    ];

    /// Map any integer onto a valid kind, clamping to `0..=4`
    pub fn from_id_clamped(id: i64) -> Self {
        Self::ALL[id.clamp(0, 4) as usize]
    }

    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            ResamplerKind::SincBest => "sinc-best",
            ResamplerKind::SincMedium => "sinc-medium",
            ResamplerKind::SincFastest => "sinc-fastest",
            ResamplerKind::ZeroOrderHold => "zero-order-hold",
            ResamplerKind::Linear => "linear",
        }
    }

    fn sinc_parameters(self) -> Option<SincInterpolationParameters> {
        let (sinc_len, oversampling_factor, interpolation, window) = match self {
            ResamplerKind::SincBest => (
                256,
                256,
                SincInterpolationType::Cubic,
                WindowFunction::BlackmanHarris2,
            ),
            ResamplerKind::SincMedium => (
                128,
                128,
                SincInterpolationType::Linear,
                WindowFunction::Blackman2,
            ),
            ResamplerKind::SincFastest => (
                64,
                64,
                SincInterpolationType::Linear,
                WindowFunction::Hann2,
            ),
            ResamplerKind::ZeroOrderHold | ResamplerKind::Linear => return None,
        };
        Some(SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation,
            oversampling_factor,
            window,
        })
    }
}

impl TryFrom<i64> for ResamplerKind {
    type Error = Error;

    fn try_from(id: i64) -> Result<Self> {
        if (0..=4).contains(&id) {
            Ok(Self::ALL[id as usize])
        } else {
            Err(Error::Config(format!("Resampler id {} out of range 0..=4", id)))
        }
    }
}

impl From<ResamplerKind> for i64 {
    fn from(kind: ResamplerKind) -> i64 {
        kind.id()
    }
}

/// Per-track scratch size in frames for one conversion chunk
///
/// 10 ms at the source rate, stretched by the conversion ratio in whichever
/// direction it moves away from 1.
pub fn scratch_frames(source_rate: u32, ratio: f64) -> usize {
    let base = (source_rate / 100).max(1) as f64;
    let frames = if ratio < 1.0 { base / ratio } else { base * ratio };
    (frames.ceil() as usize).max(1)
}

enum Engine {
    Passthrough,
    Sinc(Box<SincFixedIn<f32>>),
    Fast(Box<FastFixedIn<f32>>),
}

/// Chunked interleaved-in, interleaved-out sample-rate converter
///
/// The filter is primed with silence on creation and on `reset`, so every
/// full chunk yields `chunk_frames * ratio` frames (within one). Audio held
/// back by the filter delay comes out when `process` is told the input has
/// ended.
pub struct SampleRateConverter {
    kind: ResamplerKind,
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    engine: Engine,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    output: Vec<f32>,
    /// Output frames still owed for input received since the last reset
    pending_out: f64,
}

impl std::fmt::Debug for SampleRateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRateConverter")
            .field("kind", &self.kind())
            .field("channels", &self.channels())
            .field("chunk_frames", &self.chunk_frames())
            .field("ratio", &self.ratio())
            .finish()
    }
}

impl SampleRateConverter {
    /// Build a converter for `channels` interleaved channels
    ///
    /// `chunk_frames` is the largest input chunk `process` will receive.
    pub fn new(kind: ResamplerKind, channels: usize, chunk_frames: usize, ratio: f64) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::Convert(format!("Unsupported channel count {}", channels)));
        }
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(Error::Convert(format!("Invalid ratio {}", ratio)));
        }
        let chunk_frames = chunk_frames.max(1);

        let engine = if ratio == 1.0 {
            Engine::Passthrough
        } else if let Some(params) = kind.sinc_parameters() {
            let sinc = SincFixedIn::<f32>::new(ratio, MAX_RELATIVE_RATIO, params, chunk_frames, channels)
                .map_err(|e| Error::Convert(format!("Failed to create sinc resampler: {}", e)))?;
            Engine::Sinc(Box::new(sinc))
        } else {
            let degree = match kind {
                ResamplerKind::ZeroOrderHold => PolynomialDegree::Nearest,
                _ => PolynomialDegree::Linear,
            };
            let fast = FastFixedIn::<f32>::new(ratio, MAX_RELATIVE_RATIO, degree, chunk_frames, channels)
                .map_err(|e| Error::Convert(format!("Failed to create resampler: {}", e)))?;
            Engine::Fast(Box::new(fast))
        };

        let (planar_in, planar_out) = match &engine {
            Engine::Passthrough => (Vec::new(), Vec::new()),
            Engine::Sinc(r) => (r.input_buffer_allocate(true), r.output_buffer_allocate(true)),
            Engine::Fast(r) => (r.input_buffer_allocate(true), r.output_buffer_allocate(true)),
        };
        let out_frames = planar_out.first().map_or(chunk_frames, Vec::len);

        let mut converter = Self {
            kind,
            channels,
            chunk_frames,
            ratio,
            engine,
            planar_in,
            planar_out,
            // Room for a final chunk plus the flushed tail
            output: Vec::with_capacity(out_frames * channels * (MAX_FLUSH_ROUNDS + 1)),
            pending_out: 0.0,
        };
        converter.prime()?;

        debug!(
            "Created {} converter: {} ch, chunk {} frames, ratio {:.4}, max out {} frames, delay {:.0} frames",
            kind.name(),
            channels,
            chunk_frames,
            ratio,
            out_frames,
            converter.pending_out
        );
        Ok(converter)
    }

    pub fn kind(&self) -> ResamplerKind {
        self.kind
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Convert one interleaved chunk
    ///
    /// `input` may hold fewer than `chunk_frames` frames; a short chunk is
    /// zero-padded internally and the output trimmed to the audio it carries.
    /// With `end_of_input` the delayed tail is appended; `input` may then be
    /// empty. The returned slice is valid until the next call.
    pub fn process(&mut self, input: &[f32], ratio: f64, end_of_input: bool) -> Result<&[f32]> {
        let frames = input.len() / self.channels;
        if frames > self.chunk_frames {
            return Err(Error::Convert(format!(
                "Chunk of {} frames exceeds capacity {}",
                frames, self.chunk_frames
            )));
        }
        if (ratio - self.ratio).abs() > f64::EPSILON {
            self.retarget(ratio)?;
        }

        self.output.clear();
        if let Engine::Passthrough = self.engine {
            self.output.extend_from_slice(&input[..frames * self.channels]);
            return Ok(&self.output);
        }

        if frames > 0 {
            for (frame_idx, frame) in input.chunks_exact(self.channels).enumerate() {
                for (ch, &sample) in frame.iter().enumerate() {
                    self.planar_in[ch][frame_idx] = sample;
                }
            }
            self.pending_out += frames as f64 * self.ratio;

            let produced = if frames == self.chunk_frames {
                self.run_full()?
            } else {
                let views: [&[f32]; MAX_CHANNELS] = std::array::from_fn(|ch| {
                    if ch < self.channels {
                        &self.planar_in[ch][..frames]
                    } else {
                        &[][..]
                    }
                });
                let views = &views[..self.channels];
                let (_, out) = match &mut self.engine {
                    Engine::Sinc(r) => r.process_partial_into_buffer(Some(views), &mut self.planar_out, None),
                    Engine::Fast(r) => r.process_partial_into_buffer(Some(views), &mut self.planar_out, None),
                    Engine::Passthrough => Ok((0, 0)),
                }
                .map_err(|e| Error::Convert(e.to_string()))?;
                out
            };
            self.emit_owed(produced);
        }

        if end_of_input {
            self.flush_tail()?;
        }
        Ok(&self.output)
    }

    /// Clear filter history so the next chunk starts from silence
    pub fn reset(&mut self) {
        match &mut self.engine {
            Engine::Passthrough => {}
            Engine::Sinc(r) => r.reset(),
            Engine::Fast(r) => r.reset(),
        }
        self.output.clear();
        if let Err(e) = self.prime() {
            warn!("Priming {} converter failed: {}", self.kind.name(), e);
            self.pending_out = 0.0;
        }
    }

    /// Push silence through until the filter delay has been consumed
    ///
    /// The frames the filter still holds back afterwards are counted as
    /// owed, so the leading silence and the final tail stay balanced.
    fn prime(&mut self) -> Result<()> {
        self.pending_out = 0.0;
        if let Engine::Passthrough = self.engine {
            return Ok(());
        }
        for channel in &mut self.planar_in {
            channel.fill(0.0);
        }
        let per_chunk = self.chunk_frames as f64 * self.ratio;
        let delay = match &self.engine {
            Engine::Sinc(r) => r.output_delay(),
            Engine::Fast(r) => r.output_delay(),
            Engine::Passthrough => 0,
        };
        let rounds = ((delay + 1) as f64 / per_chunk).ceil().max(1.0) as usize;

        let mut produced = 0;
        for _ in 0..rounds {
            produced += self.run_full()?;
        }
        self.pending_out = (rounds as f64 * per_chunk - produced as f64).max(0.0);
        Ok(())
    }

    /// Run one full chunk from `planar_in` into `planar_out`
    fn run_full(&mut self) -> Result<usize> {
        let (_, out) = match &mut self.engine {
            Engine::Sinc(r) => r.process_into_buffer(&self.planar_in, &mut self.planar_out, None),
            Engine::Fast(r) => r.process_into_buffer(&self.planar_in, &mut self.planar_out, None),
            Engine::Passthrough => Ok((0, 0)),
        }
        .map_err(|e| Error::Convert(e.to_string()))?;
        Ok(out)
    }

    /// Drain what the filter still holds for input already received
    fn flush_tail(&mut self) -> Result<()> {
        for _ in 0..MAX_FLUSH_ROUNDS {
            if self.pending_out.round() < 1.0 {
                break;
            }
            let (_, out) = match &mut self.engine {
                Engine::Sinc(r) => {
                    r.process_partial_into_buffer(None::<&[&[f32]]>, &mut self.planar_out, None)
                }
                Engine::Fast(r) => {
                    r.process_partial_into_buffer(None::<&[&[f32]]>, &mut self.planar_out, None)
                }
                Engine::Passthrough => Ok((0, 0)),
            }
            .map_err(|e| Error::Convert(e.to_string()))?;
            if out == 0 {
                break;
            }
            self.emit_owed(out);
        }
        self.pending_out = 0.0;
        Ok(())
    }

    /// Append up to the owed number of frames from `planar_out`
    fn emit_owed(&mut self, produced: usize) {
        let owed = self.pending_out.round().max(0.0) as usize;
        let keep = produced.min(owed);
        for frame_idx in 0..keep {
            for ch in 0..self.channels {
                self.output.push(self.planar_out[ch][frame_idx]);
            }
        }
        self.pending_out -= keep as f64;
    }

    fn retarget(&mut self, ratio: f64) -> Result<()> {
        let result = match &mut self.engine {
            Engine::Passthrough => {
                return Err(Error::Convert(format!(
                    "Passthrough converter cannot switch to ratio {}",
                    ratio
                )))
            }
            Engine::Sinc(r) => r.set_resample_ratio(ratio, false),
            Engine::Fast(r) => r.set_resample_ratio(ratio, false),
        };
        result.map_err(|e| Error::Convert(e.to_string()))?;
        self.ratio = ratio;
        Ok(())
    }
}
