//! Session lifecycle through the host boundary on the virtual platform.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use recorder_encoder::{probe, StreamKind};
use recorder_engine::{ErrorCode, RecorderState, SessionLease};

use common::{distance, serial, Fixture};

#[test]
fn init_accepts_every_quality_and_rate() {
    let _serial = serial();
    let fixture = Fixture::new();
    for qb in 0..=100 {
        for fps in 10..=30 {
            assert_eq!(fixture.init(qb, fps, "matrix.avi"), 0, "qb {qb} fps {fps}");
            assert_eq!(fixture.recorder.state(), RecorderState::Initialized);
            fixture.recorder.release();
        }
    }
}

#[test]
fn start_succeeds_at_range_edges() {
    let _serial = serial();
    let fixture = Fixture::new();
    for (qb, fps) in [(0, 10), (100, 30), (50, 20)] {
        let name = format!("edge-{qb}-{fps}.avi");
        assert_eq!(fixture.init(qb, fps, &name), 0);
        fixture.recorder.start();
        assert_eq!(fixture.recorder.state(), RecorderState::Recording);
        thread::sleep(Duration::from_millis(200));
        fixture.recorder.stop();
        assert_eq!(fixture.recorder.state(), RecorderState::Stopped);
        fixture.recorder.release();

        let summary = probe(&fixture.output(&name)).unwrap();
        assert!(summary.has_index);
        assert!(summary.stream(StreamKind::Video).is_some());
        assert!(summary.stream(StreamKind::Audio).is_some());
    }
}

#[test]
fn invalid_parameters_change_nothing() {
    let _serial = serial();
    let fixture = Fixture::new();

    assert_eq!(fixture.init(150, 20, "bad.avi"), ErrorCode::InvalidQuality.as_i32());
    assert_eq!(fixture.init(50, 5, "bad.avi"), ErrorCode::InvalidFrameRate.as_i32());
    assert_eq!(
        fixture.recorder.init(50, 20, "", "", "virtual:speaker", "", ""),
        ErrorCode::InvalidOutputPath.as_i32()
    );
    let missing_dir = fixture.output("missing").join("out.avi");
    assert_eq!(
        fixture
            .recorder
            .init(50, 20, missing_dir.to_str().unwrap(), "", "", "", "virtual:mic"),
        ErrorCode::InvalidOutputPath.as_i32()
    );
    let output = fixture.output("bad.avi");
    let output = output.to_str().unwrap();
    assert_eq!(
        fixture.recorder.init(50, 20, output, "", "no-such-speaker", "", ""),
        ErrorCode::SpeakerNotFound.as_i32()
    );
    assert_eq!(
        fixture.recorder.init(50, 20, output, "", "", "Nobody's Mic", ""),
        ErrorCode::MicNotFound.as_i32()
    );

    assert_eq!(fixture.recorder.state(), RecorderState::Uninitialized);
    assert!(!SessionLease::is_held());
    assert!(!fixture.output("bad.avi").exists());
}

#[test]
fn devices_resolve_by_name_when_id_is_empty() {
    let _serial = serial();
    let fixture = Fixture::new();
    let output = fixture.output("named.avi");
    let code = fixture.recorder.init(
        30,
        15,
        output.to_str().unwrap(),
        "Virtual Speaker",
        "",
        "Virtual Microphone",
        "",
    );
    assert_eq!(code, 0);
    let [speaker, mic, camera] = fixture.recorder.controller().selected_devices().unwrap();
    assert_eq!(speaker.unwrap().id, "virtual:speaker");
    assert_eq!(mic.unwrap().id, "virtual:mic");
    assert_eq!(camera.unwrap().id, "virtual:camera");
}

#[test]
fn nothing_selected_is_rejected() {
    let _serial = serial();
    let fixture = Fixture::new();
    assert!(fixture.platform.unplug("virtual:camera"));
    let output = fixture.output("empty.avi");
    assert_eq!(
        fixture.recorder.init(50, 20, output.to_str().unwrap(), "", "", "", ""),
        ErrorCode::NoCaptureSource.as_i32()
    );
}

#[test]
fn second_session_is_busy() {
    let _serial = serial();
    let first = Fixture::new();
    let second = Fixture::new();
    assert_eq!(first.init(50, 20, "a.avi"), 0);
    assert_eq!(second.init(50, 20, "b.avi"), ErrorCode::SessionBusy.as_i32());
    assert_eq!(second.recorder.state(), RecorderState::Uninitialized);

    first.recorder.release();
    assert_eq!(second.init(50, 20, "b.avi"), 0);
}

#[test]
fn calls_in_the_wrong_state_are_ignored() {
    let _serial = serial();
    let fixture = Fixture::new();
    let (tx, rx) = unbounded();
    fixture.recorder.set_error_callback(move |code| {
        let _ = tx.send(code);
    });

    fixture.recorder.start();
    fixture.recorder.pause();
    fixture.recorder.stop();
    assert_eq!(fixture.recorder.state(), RecorderState::Uninitialized);

    assert_eq!(fixture.init(50, 20, "state.avi"), 0);
    fixture.recorder.resume();
    assert_eq!(fixture.init(50, 20, "state.avi"), ErrorCode::InvalidState.as_i32());
    assert_eq!(fixture.recorder.state(), RecorderState::Initialized);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn stop_matches_session_time() {
    let _serial = serial();
    let fixture = Fixture::new();
    let fps = 20;
    assert_eq!(fixture.init(60, fps, "stop.avi"), 0);

    fixture.recorder.start();
    thread::sleep(Duration::from_millis(700));
    fixture.recorder.stop();
    let session = fixture.recorder.duration();
    assert!(session >= Duration::from_millis(700));

    let summary = probe(&fixture.output("stop.avi")).unwrap();
    let frame = Duration::from_secs(1) / fps;
    let video = summary.stream(StreamKind::Video).unwrap();
    let audio = summary.stream(StreamKind::Audio).unwrap();
    assert!(distance(video.duration, session) <= frame, "{video:?} vs {session:?}");
    assert!(distance(audio.duration, session) <= frame, "{audio:?} vs {session:?}");

    let stats = fixture.recorder.stats();
    assert!(stats.frames_captured > 0);
    assert!(stats.frames_written > 0);
    assert!(stats.bytes_written > 0);
}

#[test]
fn pauses_are_excluded_from_the_recording() {
    let _serial = serial();
    let fixture = Fixture::new();
    let fps = 25;
    assert_eq!(fixture.init(40, fps, "pause.avi"), 0);

    fixture.recorder.start();
    thread::sleep(Duration::from_millis(400));
    fixture.recorder.pause();
    assert_eq!(fixture.recorder.state(), RecorderState::Paused);
    let paused_at = fixture.recorder.duration();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(fixture.recorder.duration(), paused_at);
    fixture.recorder.resume();
    thread::sleep(Duration::from_millis(400));
    fixture.recorder.stop();

    let session = fixture.recorder.duration();
    assert!(distance(session, Duration::from_millis(800)) < Duration::from_millis(150));

    // The resume seam is contiguous: the pause is neither padded with held
    // frames nor filled with silence.
    let stats = fixture.recorder.stats();
    assert!(stats.frames_held <= 4, "{stats:?}");
    assert!(stats.silence_inserted_ms < 150, "{stats:?}");
    assert!(stats.frames_dropped > 0, "{stats:?}");

    let summary = probe(&fixture.output("pause.avi")).unwrap();
    let frame = Duration::from_secs(1) / fps;
    let video = summary.stream(StreamKind::Video).unwrap();
    assert!(distance(video.duration, session) <= frame, "{video:?} vs {session:?}");
    let audio = summary.stream(StreamKind::Audio).unwrap();
    assert!(distance(audio.duration, session) <= frame, "{audio:?} vs {session:?}");
    assert!(distance(audio.duration, video.duration) <= frame);
}

#[test]
fn duration_ticks_while_recording_and_on_stop() {
    let _serial = serial();
    let fixture = Fixture::new();
    let (tx, rx) = unbounded();
    fixture.recorder.set_duration_callback(move |ms| {
        let _ = tx.send(ms);
    });

    assert_eq!(fixture.init(50, 20, "ticks.avi"), 0);
    fixture.recorder.start();
    thread::sleep(Duration::from_millis(450));
    fixture.recorder.stop();
    let final_ms = fixture.recorder.duration().as_millis() as u64;

    let deadline = Instant::now() + Duration::from_secs(1);
    let mut ticks = Vec::new();
    while let Ok(ms) = rx.recv_deadline(deadline) {
        ticks.push(ms);
        if ms == final_ms {
            break;
        }
    }
    assert!(ticks.len() >= 3, "{ticks:?}");
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]), "{ticks:?}");
    assert_eq!(ticks.last(), Some(&final_ms));
}

#[test]
fn waits_release_in_timestamp_order() {
    let _serial = serial();
    let fixture = Fixture::new();

    let started = Instant::now();
    assert_eq!(fixture.recorder.wait(10_000), 0);
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(fixture.init(50, 20, "wait.avi"), 0);
    fixture.recorder.start();

    let (tx, rx) = unbounded();
    thread::scope(|scope| {
        for target in [400, 150] {
            let tx = tx.clone();
            let recorder = &fixture.recorder;
            scope.spawn(move || {
                let reached = recorder.wait(target);
                let _ = tx.send((target, reached));
            });
        }
    });
    let order: Vec<_> = rx.try_iter().collect();
    assert_eq!(order.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![150, 400]);
    assert!(order.iter().all(|(target, reached)| reached >= target));

    // A time already reached returns at once.
    let started = Instant::now();
    fixture.recorder.wait(100);
    assert!(started.elapsed() < Duration::from_millis(50));
    fixture.recorder.stop();
}

#[test]
fn stop_unblocks_waiters() {
    let _serial = serial();
    let fixture = Fixture::new();
    assert_eq!(fixture.init(50, 20, "unblock.avi"), 0);
    fixture.recorder.start();

    thread::scope(|scope| {
        let recorder = &fixture.recorder;
        let waiter = scope.spawn(move || {
            let started = Instant::now();
            recorder.wait(60_000);
            started.elapsed()
        });
        thread::sleep(Duration::from_millis(150));
        recorder.stop();
        let waited = waiter.join().unwrap();
        assert!(waited < Duration::from_secs(2));
    });
}

#[test]
fn preview_sees_camera_frames() {
    let _serial = serial();
    let fixture = Fixture::new();
    let (tx, rx) = unbounded();
    fixture.recorder.set_preview_image_callback(move |image| {
        let _ = tx.send((image.width, image.height, image.format, image.size));
    });

    assert_eq!(fixture.init(50, 20, "preview.avi"), 0);
    fixture.recorder.start();
    let (width, height, format, size) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    fixture.recorder.stop();

    assert_eq!((width, height, format), (320, 240, 0));
    assert_eq!(size, 320 * 240 * 3 / 2);
}

#[test]
fn release_forgets_callbacks_and_allows_a_new_session() {
    let _serial = serial();
    let fixture = Fixture::new();
    let (tx, rx) = unbounded();
    fixture.recorder.set_duration_callback(move |ms| {
        let _ = tx.send(ms);
    });

    assert_eq!(fixture.init(50, 20, "first.avi"), 0);
    fixture.recorder.release();
    fixture.recorder.release();
    assert_eq!(fixture.recorder.state(), RecorderState::Released);
    assert!(!SessionLease::is_held());

    assert_eq!(fixture.init(50, 20, "second.avi"), 0);
    fixture.recorder.start();
    thread::sleep(Duration::from_millis(250));
    fixture.recorder.stop();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(probe(&fixture.output("second.avi")).unwrap().has_index);
}
