//! Line-oriented control console
//!
//! Parses one command per line and runs it against the engine. Replies are
//! plain text for the terminal; state changes are also visible on the
//! event bus.

use crate::config;
use crate::error::{Error, Result};
use crate::playback::{AudioTrack, EnqueueOutcome, PlaybackEngine};
use std::fmt::Write as _;
use std::sync::Arc;

pub const HELP: &str = "\
Commands:
  list [query]              catalog, optionally filtered (name:, id:, bind:)
  play <track>              play now on the default device
  playon <device> <track>   play now on device index
  fplay <track>             play now on the selected device
  queue <track>             enqueue (starts right away when idle)
  key <code>                enqueue the track bound to a key code
  skip | skipall            end current track | also clear the queue
  remove <pos>              drop queue entry (0-based)
  status                    current track, queue and settings
  devices | device [name]   list devices | select by name (empty = default)
  volume <pct>              global volume
  tvol <track-id> <pct>     per-track volume
  threshold <db> | attack <ms> | release <ms>
  rate <hz> | resampler <0-4> | limit <n>
  bind <track-id> <code>    assign a key code (0 clears)
  quit";

/// `<track>` argument: a catalog id or an exact name
#[derive(Debug, Clone, PartialEq)]
pub enum TrackRef {
    Id(i64),
    Name(String),
}

impl TrackRef {
    fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("Missing track".to_string()));
        }
        Ok(match text.parse::<i64>() {
            Ok(id) => TrackRef::Id(id),
            Err(_) => TrackRef::Name(text.to_string()),
        })
    }

    fn resolve(&self, engine: &PlaybackEngine) -> Result<Arc<AudioTrack>> {
        let found = match self {
            TrackRef::Id(id) => engine.track(*id),
            TrackRef::Name(name) => engine.find_track(name),
        };
        found.ok_or_else(|| Error::NotFound(format!("Track {:?}", self)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List(Option<String>),
    Play { track: TrackRef, device: Option<usize> },
    ForcePlay(TrackRef),
    Queue(TrackRef),
    Key(u32),
    Skip,
    SkipAll,
    Remove(usize),
    Status,
    Devices,
    Device(String),
    Volume(f32),
    TrackVolume(i64, f32),
    Threshold(f32),
    Attack(f32),
    Release(f32),
    SampleRate(u32),
    Resampler(i64),
    QueueLimit(usize),
    Bind(i64, u32),
    Quit,
}

impl Command {
    /// Parse one console line; blank lines give `None`
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "help" | "?" => Command::Help,
            "list" | "ls" => Command::List(Some(rest.to_string()).filter(|q| !q.is_empty())),
            "play" => Command::Play {
                track: TrackRef::parse(rest)?,
                device: None,
            },
            "playon" => {
                let (device, track) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| Error::InvalidInput("Usage: playon <device> <track>".to_string()))?;
                Command::Play {
                    track: TrackRef::parse(track)?,
                    device: Some(parse_number(device, "device index")?),
                }
            }
            "fplay" => Command::ForcePlay(TrackRef::parse(rest)?),
            "queue" | "q" => Command::Queue(TrackRef::parse(rest)?),
            "key" => Command::Key(parse_number(rest, "key code")?),
            "skip" => Command::Skip,
            "skipall" => Command::SkipAll,
            "remove" | "rm" => Command::Remove(parse_number(rest, "queue position")?),
            "status" => Command::Status,
            "devices" => Command::Devices,
            "device" => Command::Device(rest.to_string()),
            "volume" | "vol" => Command::Volume(config::parse_volume(rest)?),
            "tvol" => {
                let (id, volume) = two_args(rest, "tvol <track-id> <pct>")?;
                Command::TrackVolume(parse_number(id, "track id")?, config::parse_volume(volume)?)
            }
            "threshold" => Command::Threshold(config::parse_threshold(rest)?),
            "attack" => Command::Attack(config::parse_time_ms(rest)?),
            "release" => Command::Release(config::parse_time_ms(rest)?),
            "rate" => Command::SampleRate(config::parse_sample_rate(rest)?),
            "resampler" => Command::Resampler(parse_number(rest, "resampler id")?),
            "limit" => Command::QueueLimit(config::parse_queue_limit(rest)?),
            "bind" => {
                let (id, code) = two_args(rest, "bind <track-id> <code>")?;
                Command::Bind(parse_number(id, "track id")?, parse_number(code, "key code")?)
            }
            "quit" | "exit" => Command::Quit,
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unknown command '{}' (try 'help')",
                    other
                )))
            }
        };
        Ok(Some(command))
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| Error::InvalidInput(format!("'{}' is not a valid {}", text.trim(), what)))
}

fn two_args<'a>(text: &'a str, usage: &str) -> Result<(&'a str, &'a str)> {
    text.split_once(char::is_whitespace)
        .map(|(a, b)| (a, b.trim()))
        .ok_or_else(|| Error::InvalidInput(format!("Usage: {}", usage)))
}

/// Run a command, returning the reply text
///
/// Blocks on engine locks; call from a blocking context.
pub fn execute(engine: &PlaybackEngine, command: Command) -> Result<String> {
    let reply = match command {
        Command::Help | Command::Quit => HELP.to_string(),
        Command::List(query) => {
            let tracks = match query {
                Some(q) => engine.search(&q),
                None => engine.catalog_tracks(),
            };
            let mut out = String::new();
            for track in &tracks {
                let _ = write!(out, "{:>4}  {}", track.id(), track.name());
                if track.binding() != 0 {
                    let _ = write!(out, "  [key {}]", track.binding());
                }
                if track.volume() != 100.0 {
                    let _ = write!(out, "  ({:.0}%)", track.volume());
                }
                out.push('\n');
            }
            let _ = write!(out, "{} tracks", tracks.len());
            out
        }
        Command::Play { track, device } => {
            let track = track.resolve(engine)?;
            engine.play(Arc::clone(&track), device)?;
            format!("Playing '{}'", track.name())
        }
        Command::ForcePlay(track) => {
            let track = track.resolve(engine)?;
            engine.force_play(Arc::clone(&track))?;
            format!("Playing '{}'", track.name())
        }
        Command::Queue(track) => enqueue_reply(engine, track.resolve(engine)?)?,
        Command::Key(code) => {
            let track = engine
                .track_for_binding(code)
                .ok_or_else(|| Error::NotFound(format!("Binding {}", code)))?;
            enqueue_reply(engine, track)?
        }
        Command::Skip => {
            engine.skip();
            "Skipped".to_string()
        }
        Command::SkipAll => {
            engine.skip_all();
            "Queue cleared".to_string()
        }
        Command::Remove(position) => {
            let track = engine.remove_queued(position)?;
            format!("Removed '{}' from the queue", track.name())
        }
        Command::Status => status(engine),
        Command::Devices => {
            let selected = engine.selected_device();
            let mut out = String::new();
            for (i, device) in engine.devices().iter().enumerate() {
                let marker = if Some(i) == selected { '*' } else { ' ' };
                let default = if device.is_default { " (default)" } else { "" };
                let _ = writeln!(out, "{}{:>2}  {}{}", marker, i, device.name, default);
            }
            let _ = write!(out, "State: {:?}", engine.device_state());
            out
        }
        Command::Device(name) => {
            engine.select_device(&name)?;
            if name.is_empty() {
                "Using the default device".to_string()
            } else {
                format!("Selected '{}'", name)
            }
        }
        Command::Volume(volume) => {
            engine.set_global_volume(volume)?;
            format!("Global volume {:.0}%", volume)
        }
        Command::TrackVolume(id, volume) => {
            engine.set_track_volume(id, volume)?;
            format!("Track {} volume {:.0}%", id, volume)
        }
        Command::Threshold(db) => {
            engine.set_limiter_threshold(db)?;
            format!("Limiter threshold {} dB", db)
        }
        Command::Attack(ms) => {
            engine.set_attack_ms(ms)?;
            format!("Attack {} ms (next play)", ms)
        }
        Command::Release(ms) => {
            engine.set_release_ms(ms)?;
            format!("Release {} ms (next play)", ms)
        }
        Command::SampleRate(rate) => {
            engine.set_sample_rate(rate)?;
            format!("Sample rate {} Hz", rate)
        }
        Command::Resampler(id) => {
            engine.set_resampler(id)?;
            format!("Resampler {}", engine.resampler().name())
        }
        Command::QueueLimit(limit) => {
            engine.set_queue_limit(limit);
            format!("Queue limit {}", limit)
        }
        Command::Bind(id, code) => {
            engine.set_binding(id, code)?;
            format!("Track {} bound to {}", id, code)
        }
    };
    Ok(reply)
}

fn enqueue_reply(engine: &PlaybackEngine, track: Arc<AudioTrack>) -> Result<String> {
    Ok(match engine.enqueue(Arc::clone(&track))? {
        EnqueueOutcome::Started => format!("Playing '{}'", track.name()),
        EnqueueOutcome::Queued { position } => {
            format!("Queued '{}' at position {}", track.name(), position)
        }
    })
}

fn status(engine: &PlaybackEngine) -> String {
    let mut out = String::new();
    match engine.current_track() {
        Some(track) => {
            let _ = writeln!(
                out,
                "Playing: {} (device {:?})",
                track.name(),
                engine.current_device()
            );
        }
        None => out.push_str("Idle\n"),
    }
    let queue = engine.queue_snapshot();
    let _ = writeln!(out, "Queue ({}/{}):", queue.len(), engine.queue_limit());
    for (pos, track) in queue.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", pos, track.name());
    }
    let _ = write!(
        out,
        "{} Hz, {} | volume {:.0}% | threshold {} dB, attack {} ms, release {} ms",
        engine.sample_rate(),
        engine.resampler().name(),
        engine.global_volume(),
        engine.limiter_threshold(),
        engine.attack_ms(),
        engine.release_ms()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line_is_no_command() {
        assert!(Command::parse("   ").unwrap().is_none());
    }

    #[test]
    fn test_track_refs() {
        assert_eq!(
            parse("play 3"),
            Command::Play {
                track: TrackRef::Id(3),
                device: None
            }
        );
        assert_eq!(
            parse("queue Sad Trombone"),
            Command::Queue(TrackRef::Name("Sad Trombone".to_string()))
        );
        assert_eq!(
            parse("playon 1 Air Horn"),
            Command::Play {
                track: TrackRef::Name("Air Horn".to_string()),
                device: Some(1)
            }
        );
        assert!(Command::parse("play").is_err());
    }

    #[test]
    fn test_values_go_through_validation() {
        assert_eq!(parse("volume 80"), Command::Volume(80.0));
        assert!(matches!(Command::parse("volume 2000"), Err(Error::Config(_))));
        assert_eq!(parse("rate 48000"), Command::SampleRate(48_000));
        assert!(Command::parse("rate 12").is_err());
        assert_eq!(parse("tvol 2 55"), Command::TrackVolume(2, 55.0));
        assert!(matches!(Command::parse("tvol 2"), Err(Error::InvalidInput(_))));
        assert_eq!(parse("bind 4 112"), Command::Bind(4, 112));
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("dance now").unwrap_err();
        assert!(err.to_string().contains("dance"));
    }

    #[test]
    fn test_device_selection_accepts_empty_name() {
        assert_eq!(parse("device"), Command::Device(String::new()));
        assert_eq!(parse("DEVICE USB Audio"), Command::Device("USB Audio".to_string()));
    }
}
