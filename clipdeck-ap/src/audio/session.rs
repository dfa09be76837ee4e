//! Decode session over an in-memory copy of an audio file
//!
//! A session owns the format reader, the codec and the decode position for
//! one track. Opening first tries to stream straight from the file bytes. If
//! the container or codec is rejected, the file is decoded completely,
//! re-encoded as a 32-bit float WAV in memory, and that copy is streamed
//! instead.

use super::byte_buffer::{ByteBufferIO, SeekOrigin};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Room reserved for the WAV header when sizing the repair buffer
const WAV_HEADER_MARGIN: usize = 1024;

/// Stream format reported by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

pub struct AudioSession {
    path: PathBuf,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    total_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Read offset (in samples) into `sample_buf`
    pending_pos: usize,
    pending_len: usize,
    /// Frames handed out since the last seek origin
    position: u64,
    at_end: bool,
    repaired: bool,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("position", &self.position)
            .field("at_end", &self.at_end)
            .field("repaired", &self.repaired)
            .finish()
    }
}

impl AudioSession {
    /// Open a file for streaming decode
    ///
    /// Falls back to the in-memory WAV repair path once before reporting
    /// [`Error::Decode`].
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;
        let ext = extension_of(path);

        match Self::open_buffer(ByteBufferIO::from_vec(bytes), ext.as_deref(), path) {
            Ok(session) => Ok(session),
            Err(first) => {
                warn!(
                    "Direct decode of {} failed ({}), re-encoding in memory",
                    path.display(),
                    first
                );
                let repaired = repair(path)?;
                let mut session = Self::open_buffer(repaired, Some("wav"), path).map_err(|e| {
                    Error::Decode(format!("{}: unreadable after repair: {}", path.display(), e))
                })?;
                session.repaired = true;
                info!("Opened {} through repair path", path.display());
                Ok(session)
            }
        }
    }

    /// Open an in-memory source directly, with an optional extension hint
    pub fn open_buffer(buffer: ByteBufferIO, extension: Option<&str>, label: &Path) -> Result<Self> {
        let (reader, decoder, track_id, format, total_frames) =
            open_stream(Box::new(buffer), extension)?;
        let mut session = Self {
            path: label.to_path_buf(),
            reader,
            decoder,
            track_id,
            format,
            total_frames,
            sample_buf: None,
            pending_pos: 0,
            pending_len: 0,
            position: 0,
            at_end: false,
            repaired: false,
        };
        // Decode the first packet now so codec problems surface at open time
        // rather than on the audio thread.
        session.refill()?;
        debug!(
            "Opened session for {}: {} Hz, {} ch, {:?} frames",
            label.display(),
            format.sample_rate,
            format.channels,
            total_frames
        );
        Ok(session)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the repair path produced this session
    pub fn is_repaired(&self) -> bool {
        self.repaired
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    /// Fill `out` with interleaved frames
    ///
    /// Returns the number of frames written; 0 means end of stream. `out` is
    /// treated as `out.len() / channels` frames.
    pub fn read_frames(&mut self, out: &mut [f32]) -> Result<usize> {
        let channels = self.format.channels;
        let wanted = out.len() / channels * channels;
        let mut written = 0;

        while written < wanted && !self.at_end {
            if self.pending_pos >= self.pending_len {
                if !self.refill()? {
                    break;
                }
                continue;
            }
            if let Some(buf) = &self.sample_buf {
                let available = &buf.samples()[self.pending_pos..self.pending_len];
                let n = available.len().min(wanted - written);
                out[written..written + n].copy_from_slice(&available[..n]);
                self.pending_pos += n;
                written += n;
            }
        }

        let frames = written / channels;
        self.position += frames as u64;
        Ok(frames)
    }

    /// Move the decode position
    ///
    /// `position` is in frames. Seeking to the end (`End`, offset >= 0)
    /// marks the stream exhausted so the next read returns 0.
    pub fn seek(&mut self, position: i64, origin: SeekOrigin) -> Result<u64> {
        let target = match origin {
            SeekOrigin::Start => position.max(0) as u64,
            SeekOrigin::Current => (self.position as i64 + position).max(0) as u64,
            SeekOrigin::End => {
                if position >= 0 {
                    self.skip_to_end();
                    return Ok(self.total_frames.unwrap_or(self.position));
                }
                match self.total_frames {
                    Some(total) => (total as i64 + position).max(0) as u64,
                    None => {
                        self.skip_to_end();
                        return Ok(self.position);
                    }
                }
            }
        };

        if let Some(total) = self.total_frames {
            if target >= total {
                self.skip_to_end();
                return Ok(total);
            }
        }

        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: target,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| Error::Decode(format!("Seek failed: {}", e)))?;
        self.decoder.reset();
        self.pending_pos = 0;
        self.pending_len = 0;
        self.at_end = false;
        self.position = seeked.actual_ts;
        Ok(self.position)
    }

    /// Force end-of-stream; the next read returns 0 frames
    pub fn skip_to_end(&mut self) {
        self.at_end = true;
        self.pending_pos = 0;
        self.pending_len = 0;
    }

    pub fn close(self) {
        debug!("Closed session for {}", self.path.display());
    }

    /// Decode the next packet of our track into `sample_buf`
    ///
    /// Returns `false` at end of stream. Corrupt packets are skipped.
    fn refill(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.at_end = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.at_end = true;
                    return Ok(false);
                }
                Err(e) => return Err(Error::Decode(format!("Error reading packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let needed = decoded.capacity() * spec.channels.count();
                    let fits = self.sample_buf.as_ref().map_or(false, |b| b.capacity() >= needed);
                    if !fits {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        self.pending_pos = 0;
                        self.pending_len = buf.len();
                    }
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in {}: {}", self.path.display(), e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
            }
        }
    }
}

type OpenedStream = (Box<dyn FormatReader>, Box<dyn Decoder>, u32, AudioFormat, Option<u64>);

fn open_stream(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<OpenedStream> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;
    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;
    if channels == 0 {
        return Err(Error::Decode("Stream has no channels".to_string()));
    }
    let track_id = track.id;
    let n_frames = params.n_frames;

    let decoder = symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    Ok((
        reader,
        decoder,
        track_id,
        AudioFormat {
            sample_rate,
            channels,
        },
        n_frames,
    ))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Decode a whole file tolerantly, skipping packets that fail
fn decode_all(path: &Path) -> Result<(Vec<f32>, AudioFormat)> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;
    let ext = extension_of(path);
    let (mut reader, mut decoder, track_id, format, _) = open_stream(Box::new(file), ext.as_deref())?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(e) => {
                warn!("Decode error: {}", e);
                continue;
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::Decode(format!("{}: no decodable audio", path.display())));
    }
    Ok((samples, format))
}

/// Decode everything and re-encode as float WAV into a right-sized buffer
fn repair(path: &Path) -> Result<ByteBufferIO> {
    let (samples, format) = decode_all(path)?;
    let spec = hound::WavSpec {
        channels: format.channels as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut buffer = ByteBufferIO::with_len(samples.len() * 4 + WAV_HEADER_MARGIN);
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec)
            .map_err(|e| Error::Decode(format!("WAV re-encode failed: {}", e)))?;
        for &s in &samples {
            writer
                .write_sample(s)
                .map_err(|e| Error::Decode(format!("WAV re-encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Decode(format!("WAV re-encode failed: {}", e)))?;
    }
    buffer.truncate_to_written();
    buffer.seek_to(0, SeekOrigin::Start);
    debug!(
        "Re-encoded {} ({} samples) into {} bytes",
        path.display(),
        samples.len(),
        buffer.length()
    );
    Ok(buffer)
}
