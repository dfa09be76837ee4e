//! Playback engine integration tests
//!
//! Run against the hand-pumped mock backend with generated WAV clips.

mod helpers;

use clipdeck_ap::audio::DeviceState;
use clipdeck_ap::config::PlayerSettings;
use clipdeck_ap::playback::{EnqueueOutcome, PlaybackEngine, TrackCatalog};
use clipdeck_ap::Error;
use clipdeck_common::PlayerEvent;
use helpers::{engine_with, generate_sine_wav, pump_until, write_clip_folder, MockBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const PUMP_FRAMES: usize = 512;
const TIMEOUT: Duration = Duration::from_secs(10);

fn setup(clips: &[(&str, u64)], settings: &PlayerSettings) -> (TempDir, MockBackend, Arc<PlaybackEngine>) {
    let dir = TempDir::new().unwrap();
    write_clip_folder(dir.path(), clips);
    let backend = MockBackend::new(&["Mock Speakers", "Mock Headset"]);
    let engine = engine_with(&backend, settings);
    engine.load_catalog(TrackCatalog::scan(dir.path(), &HashMap::new()).unwrap());
    (dir, backend, engine)
}

fn drain_events(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn started_names(events: &[PlayerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackStarted { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

async fn wait_idle(backend: &MockBackend, engine: &Arc<PlaybackEngine>) -> bool {
    pump_until(backend, PUMP_FRAMES, TIMEOUT, || {
        !engine.is_playing() && engine.queue_len() == 0
    })
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_44100_source_plays_at_48000() {
    let settings = PlayerSettings {
        sample_rate: 48_000,
        ..Default::default()
    };
    let (_dir, backend, engine) = setup(&[("intro", 500)], &settings);
    let mut rx = engine.subscribe();

    let intro = engine.find_track("intro").unwrap();
    assert_eq!(engine.enqueue(Arc::clone(&intro)).unwrap(), EnqueueOutcome::Started);

    let ratio = intro.resources().ratio;
    assert!((ratio - 48_000.0 / 44_100.0).abs() < 1e-9, "ratio {}", ratio);
    assert_eq!(backend.opened_rate("Mock Speakers"), Some(48_000));

    let samples = backend.pump(PUMP_FRAMES).expect("device started");
    assert_eq!(samples.len(), PUMP_FRAMES * 2);
    assert!(samples.iter().any(|s| s.abs() > 0.05), "first buffer is silent");
    assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));

    let events = drain_events(&mut rx);
    assert_eq!(started_names(&events), vec!["intro"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queue_limit_rejects_overflow() {
    let settings = PlayerSettings {
        queue_limit: 1,
        ..Default::default()
    };
    let (_dir, _backend, engine) = setup(&[("a", 500), ("b", 500), ("c", 500)], &settings);

    let track = |name: &str| engine.find_track(name).unwrap();
    assert_eq!(engine.enqueue(track("a")).unwrap(), EnqueueOutcome::Started);
    assert_eq!(
        engine.enqueue(track("b")).unwrap(),
        EnqueueOutcome::Queued { position: 0 }
    );
    let err = engine.enqueue(track("c")).unwrap_err();
    assert!(matches!(err, Error::QueueFull { limit: 1 }));
    assert_eq!(engine.queue_len(), 1);

    engine.set_queue_limit(0);
    assert!(engine.enqueue(track("c")).is_ok());
    assert_eq!(engine.queue_len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queue_plays_in_fifo_order() {
    let (_dir, backend, engine) = setup(
        &[("a", 60), ("b", 60), ("c", 60)],
        &PlayerSettings::default(),
    );
    let mut rx = engine.subscribe();

    for name in ["c", "a", "b"] {
        engine.enqueue(engine.find_track(name).unwrap()).unwrap();
    }
    assert!(wait_idle(&backend, &engine).await, "queue never drained");

    let events = drain_events(&mut rx);
    assert_eq!(started_names(&events), vec!["c", "a", "b"]);
    let finished = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::TrackFinished { .. }))
        .count();
    assert_eq!(finished, 3);
    assert!(backend.live_devices().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_all_clears_queue_and_ends_current() {
    let (_dir, backend, engine) = setup(
        &[("long", 5_000), ("b", 60), ("c", 60)],
        &PlayerSettings::default(),
    );
    let mut rx = engine.subscribe();

    for name in ["long", "b", "c"] {
        engine.enqueue(engine.find_track(name).unwrap()).unwrap();
    }
    backend.pump(PUMP_FRAMES);
    engine.skip_all();
    assert!(engine.queue_snapshot().is_empty());

    assert!(wait_idle(&backend, &engine).await);
    let events = drain_events(&mut rx);
    assert_eq!(started_names(&events), vec!["long"]);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::QueueChanged { queue_len: 0, .. }
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_advances_to_next() {
    let (_dir, backend, engine) = setup(&[("long", 5_000), ("next", 60)], &PlayerSettings::default());
    let mut rx = engine.subscribe();

    engine.enqueue(engine.find_track("long").unwrap()).unwrap();
    engine.enqueue(engine.find_track("next").unwrap()).unwrap();
    engine.skip();

    assert!(wait_idle(&backend, &engine).await);
    assert_eq!(started_names(&drain_events(&mut rx)), vec!["long", "next"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unavailable_device_is_rebuilt_once() {
    let (_dir, backend, engine) = setup(&[("a", 500)], &PlayerSettings::default());
    let mut rx = engine.subscribe();
    let inits_before = backend.context_inits();

    backend.fail_next_starts(1);
    engine.play(engine.find_track("a").unwrap(), Some(1)).unwrap();

    assert_eq!(backend.context_inits(), inits_before + 1);
    assert_eq!(engine.device_state(), DeviceState::Ready);
    assert_eq!(engine.current_device(), Some(1));
    assert_eq!(backend.live_devices(), vec!["Mock Headset".to_string()]);
    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::DevicesReinitialized { device_count: 2, .. })));
    assert!(backend.pump(PUMP_FRAMES).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_unavailable_aborts_play() {
    let (_dir, backend, engine) = setup(&[("a", 500)], &PlayerSettings::default());
    let mut rx = engine.subscribe();

    backend.fail_next_starts(2);
    let err = engine.play(engine.find_track("a").unwrap(), None).unwrap_err();
    assert!(matches!(err, Error::DeviceUnavailable(_)));
    assert_eq!(engine.device_state(), DeviceState::Failed);
    assert!(engine.current_track().is_none());
    assert!(backend.live_devices().is_empty());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, PlayerEvent::Error { .. })));

    // The next request gets a working device again
    engine.play(engine.find_track("a").unwrap(), None).unwrap();
    assert_eq!(engine.device_state(), DeviceState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_plays_keep_one_device_started() {
    let (_dir, backend, engine) = setup(&[("a", 500), ("b", 500)], &PlayerSettings::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let name = if i % 2 == 0 { "a" } else { "b" };
                let track = engine.find_track(name).unwrap();
                engine.play(track, Some(i % 2)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(backend.max_live(), 1);
    assert_eq!(engine.started_devices().len(), 1);
    assert!(engine.current_track().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replaced_catalog_tracks_released_after_use() {
    let (dir, backend, engine) = setup(&[("a", 60), ("b", 60), ("idle", 60)], &PlayerSettings::default());

    let a = engine.find_track("a").unwrap();
    let b = engine.find_track("b").unwrap();
    let idle = engine.find_track("idle").unwrap();
    engine.enqueue(Arc::clone(&a)).unwrap();
    engine.enqueue(Arc::clone(&b)).unwrap();

    engine.load_catalog(TrackCatalog::scan(dir.path(), &HashMap::new()).unwrap());
    assert!(a.is_removed());
    assert!(b.is_removed());
    assert!(!idle.is_removed());
    assert!(a.resources().session.is_some());

    assert!(wait_idle(&backend, &engine).await);
    assert!(a.resources().session.is_none());
    assert!(b.resources().session.is_none());
    assert!(engine.find_track("a").is_some_and(|t| !Arc::ptr_eq(&t, &a)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_queued_entry() {
    let (_dir, _backend, engine) = setup(&[("a", 500), ("b", 500), ("c", 500)], &PlayerSettings::default());
    for name in ["a", "b", "c"] {
        engine.enqueue(engine.find_track(name).unwrap()).unwrap();
    }

    let removed = engine.remove_queued(0).unwrap();
    assert_eq!(removed.name(), "b");
    let names: Vec<String> = engine
        .queue_snapshot()
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(names, vec!["c"]);
    assert!(matches!(engine.remove_queued(4), Err(Error::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mono_source_is_duplicated_to_both_channels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mono.wav");
    generate_sine_wav(&path, 300, 220.0, 0.4, 44_100, 1).unwrap();
    let backend = MockBackend::new(&["Mock Speakers"]);
    let engine = engine_with(&backend, &PlayerSettings::default());
    engine.load_catalog(TrackCatalog::scan(dir.path(), &HashMap::new()).unwrap());

    engine.play(engine.find_track("mono").unwrap(), None).unwrap();
    let samples = backend.pump(PUMP_FRAMES).unwrap();
    assert!(samples.iter().any(|s| s.abs() > 0.05));
    for frame in samples.chunks_exact(2) {
        assert_eq!(frame[0], frame[1]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_global_volume_zero_is_silent_and_bad_values_rejected() {
    let (_dir, backend, engine) = setup(&[("a", 500)], &PlayerSettings::default());
    engine.set_global_volume(0.0).unwrap();
    assert!(engine.set_global_volume(-5.0).is_err());
    assert_eq!(engine.global_volume(), 0.0);

    engine.play(engine.find_track("a").unwrap(), None).unwrap();
    let samples = backend.pump(PUMP_FRAMES).unwrap();
    assert!(samples.iter().all(|s| *s == 0.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sample_rate_change_reopens_devices_and_resumes() {
    let (_dir, backend, engine) = setup(&[("long", 3_000)], &PlayerSettings::default());
    let mut rx = engine.subscribe();
    let track = engine.find_track("long").unwrap();
    engine.play(Arc::clone(&track), None).unwrap();
    for _ in 0..4 {
        backend.pump(PUMP_FRAMES);
    }

    assert!(engine.set_sample_rate(100).is_err());
    engine.set_sample_rate(48_000).unwrap();

    assert_eq!(engine.sample_rate(), 48_000);
    assert_eq!(backend.opened_rate("Mock Speakers"), Some(48_000));
    assert!(engine.current_track().is_some_and(|t| Arc::ptr_eq(&t, &track)));
    assert!((track.resources().ratio - 48_000.0 / 44_100.0).abs() < 1e-9);
    assert!(backend.pump(PUMP_FRAMES).unwrap().iter().any(|s| s.abs() > 0.05));

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::DevicesReinitialized { .. })));
    // Resuming is not a new start
    assert_eq!(started_names(&events), vec!["long"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resampler_change_rebuilds_converter() {
    let settings = PlayerSettings {
        sample_rate: 48_000,
        ..Default::default()
    };
    let (_dir, backend, engine) = setup(&[("long", 2_000)], &settings);
    let track = engine.find_track("long").unwrap();
    engine.play(Arc::clone(&track), None).unwrap();
    backend.pump(PUMP_FRAMES);

    assert!(engine.set_resampler(7).is_err());
    engine.set_resampler(2).unwrap();
    assert_eq!(engine.resampler().id(), 2);
    let kind = track.resources().converter.as_ref().map(|c| c.kind().id());
    assert_eq!(kind, Some(2));
    assert!(backend.pump(PUMP_FRAMES).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreadable_file_reports_error_and_queue_moves_on() {
    let (dir, backend, engine) = setup(&[("good", 60)], &PlayerSettings::default());
    std::fs::write(dir.path().join("broken.wav"), b"definitely not audio").unwrap();
    engine.load_catalog(TrackCatalog::scan(dir.path(), &HashMap::new()).unwrap());
    let mut rx = engine.subscribe();

    let broken = engine.find_track("broken").unwrap();
    assert!(engine.play(broken, None).is_err());
    assert!(engine.current_track().is_none());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, PlayerEvent::Error { .. })));

    engine.enqueue(engine.find_track("good").unwrap()).unwrap();
    assert!(wait_idle(&backend, &engine).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_devices_and_refuses_play() {
    let (_dir, backend, engine) = setup(&[("a", 500)], &PlayerSettings::default());
    engine.play(engine.find_track("a").unwrap(), None).unwrap();
    engine.shutdown();

    assert!(backend.live_devices().is_empty());
    assert!(engine.is_shut_down());
    let err = engine.play(engine.find_track("a").unwrap(), None).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unspecified_device_is_default_and_force_play_uses_selected() {
    let (_dir, backend, engine) = setup(&[("a", 500)], &PlayerSettings::default());
    engine.select_device("Mock Headset").unwrap();

    engine.play(engine.find_track("a").unwrap(), None).unwrap();
    assert_eq!(backend.live_devices(), vec!["Mock Speakers".to_string()]);
    assert_eq!(engine.current_device(), Some(0));

    engine.force_play(engine.find_track("a").unwrap()).unwrap();
    assert_eq!(backend.live_devices(), vec!["Mock Headset".to_string()]);
    assert_eq!(engine.current_device(), Some(1));
}

/// A completion still waiting for a blocking thread must not end a newer
/// play of the same track.
#[test]
fn test_late_completion_leaves_replay_running() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let (_dir, backend, engine) =
            setup(&[("a", 60), ("b", 60)], &PlayerSettings::default());
        let mut rx = engine.subscribe();

        // Occupy the only blocking thread so completion work has to wait
        let (busy_tx, busy_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let blocker = tokio::task::spawn_blocking(move || {
            busy_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        busy_rx.recv().unwrap();

        let a = engine.find_track("a").unwrap();
        assert_eq!(engine.enqueue(Arc::clone(&a)).unwrap(), EnqueueOutcome::Started);
        assert_eq!(
            engine.enqueue(engine.find_track("b").unwrap()).unwrap(),
            EnqueueOutcome::Queued { position: 0 }
        );

        // 60 ms is well under 20 device buffers; the callback hands the
        // completion off but it cannot run yet
        for _ in 0..20 {
            backend.pump(PUMP_FRAMES);
        }
        assert!(engine.is_playing());

        engine.play(Arc::clone(&a), None).unwrap();
        release_tx.send(()).unwrap();
        blocker.await.unwrap();

        let stale_done = tokio::time::timeout(TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok(PlayerEvent::TrackFinished { .. }) => break,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream failed: {}", e),
                }
            }
        })
        .await;
        assert!(stale_done.is_ok(), "first completion never ran");

        let current = engine.current_track().expect("replay stopped");
        assert!(Arc::ptr_eq(&current, &a));
        assert_eq!(engine.queue_len(), 1);
        assert_eq!(backend.live_devices().len(), 1);

        assert!(wait_idle(&backend, &engine).await);
        let events = drain_events(&mut rx);
        assert_eq!(started_names(&events), vec!["b"]);
    });
}
