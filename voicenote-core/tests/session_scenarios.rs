mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;

use common::*;
use voicenote_core::processing::clock::frames_to_us;
use voicenote_core::processing::mp4_format;
use voicenote_core::*;

const FULL_RELEASE: [&str; 5] = ["capture", "agc", "ns", "encoder", "writer"];

fn closed(state: SessionState) -> RecordingResult {
    match state {
        SessionState::Closed(result) => *result,
        other => panic!("expected closed session, got {:?}", other),
    }
}

fn failed(state: SessionState) -> SessionError {
    match state {
        SessionState::Failed(e) => e,
        other => panic!("expected failed session, got {:?}", other),
    }
}

#[test]
fn two_second_recording_produces_single_track_m4a() {
    let path = temp_output("note.m4a");
    let backend = FakeBackend::new(Script::default());
    let journal = backend.journal.clone();
    let delegate = Arc::new(RecordingDelegate::default());

    let mut controller = SessionController::new(backend);
    controller.set_delegate(delegate.clone());
    let handle = controller.start(SessionConfig::new(&path)).unwrap();
    thread::sleep(Duration::from_secs(2));
    let result = closed(controller.stop(&handle));

    assert_eq!(result.file_path, path);
    assert!(path.exists());
    assert!(!part_path(&path).exists());
    assert_relative_eq!(result.duration_secs, 2.0, epsilon = 0.2);
    assert_eq!(result.checksum.len(), 64);
    assert_eq!(result.diagnostics.input_mode, "voice-communication");
    assert_eq!(result.diagnostics.effects_attached, vec!["agc", "ns"]);

    let summary = mp4_format::probe(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(summary.track_count, 1);
    assert_eq!(summary.channel_count, 1);
    assert_eq!(summary.timescale, 44100);
    assert_eq!(summary.sample_count as u64, result.diagnostics.units_written);
    // The final partial unit is padded to a full AAC frame.
    let frame_secs = 1024.0 / 44100.0;
    assert!(summary.duration_secs() >= result.duration_secs);
    assert!(summary.duration_secs() - result.duration_secs <= frame_secs + 1e-6);

    assert_eq!(journal.entries(), FULL_RELEASE);
    assert_eq!(*delegate.states.lock(), vec!["starting", "capturing", "stopping", "closed"]);
    assert_eq!(delegate.finished.lock().len(), 1);
    assert!(delegate.errors.lock().is_empty());
    assert!(*delegate.level_updates.lock() > 0);

    cleanup(&path);
}

#[test]
fn device_unavailable_fails_start_without_output() {
    let path = temp_output("none.m4a");
    let backend = FakeBackend::new(Script {
        failing_modes: InputMode::PRIORITY.to_vec(),
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let err = controller.start(config(&path)).unwrap_err();

    assert_eq!(err, SessionError::Capture(CaptureError::DeviceUnavailable));
    assert!(err.is_setup_error());
    assert_eq!(controller.state(), SessionState::Failed(err));
    assert!(controller.active_session().is_none());
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
    assert!(journal.entries().is_empty());
}

#[test]
fn falls_back_to_plain_microphone() {
    let path = temp_output("fallback.m4a");
    let backend = FakeBackend::new(Script {
        failing_modes: vec![InputMode::VoiceCommunication],
        offer_effects: false,
        ..Script::default()
    });
    let mut controller = SessionController::new(backend);

    let handle = controller.start(config(&path)).unwrap();
    thread::sleep(Duration::from_millis(100));
    let result = closed(controller.stop(&handle));

    assert_eq!(result.diagnostics.input_mode, "microphone");
    assert!(result.diagnostics.effects_attached.is_empty());
    cleanup(&path);
}

#[test]
fn setup_failure_releases_what_was_opened() {
    let path = temp_output("readonly.m4a");
    let backend = FakeBackend::new(Script {
        writer_fails: true,
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let err = controller.start(config(&path)).unwrap_err();

    assert!(matches!(err, SessionError::Write(WriteError::CannotCreate(_))));
    assert_eq!(journal.entries(), ["capture", "agc", "ns", "encoder"]);
    assert!(!path.exists());
}

#[test]
fn unsupported_encoder_releases_capture_and_effects() {
    let path = temp_output("noaac.m4a");
    let backend = FakeBackend::new(Script {
        encoder_unsupported: true,
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let err = controller.start(config(&path)).unwrap_err();

    assert!(matches!(err, SessionError::Encode(EncodeError::UnsupportedConfig(_))));
    assert_eq!(journal.entries(), ["capture", "agc", "ns"]);
    assert!(!path.exists());
}

#[test]
fn invalid_config_is_rejected_before_opening_anything() {
    let path = temp_output("bad.m4a");
    let backend = FakeBackend::new(Script::default());
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let err = controller
        .start(SessionConfig {
            sample_rate: 12345,
            ..config(&path)
        })
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidConfig(_)));
    assert!(controller.state().is_idle());
    assert!(journal.entries().is_empty());
}

#[test]
fn mid_session_encoder_failure_fails_and_leaves_no_file() {
    let path = temp_output("broken.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        fail_after_submits: Some(10),
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let delegate = Arc::new(RecordingDelegate::default());
    let mut controller = SessionController::new(backend);
    controller.set_delegate(delegate.clone());

    controller.start(config(&path)).unwrap();
    let err = failed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    assert_eq!(err, SessionError::Encode(EncodeError::CodecFailure("injected".into())));
    assert_eq!(journal.entries(), FULL_RELEASE);
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
    assert_eq!(*delegate.errors.lock(), vec![err]);
    assert!(delegate.finished.lock().is_empty());
    cleanup(&path);
}

#[test]
fn stalled_device_fails_the_session() {
    let path = temp_output("stall.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        go_silent_after: Some(5),
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    controller.start(config(&path)).unwrap();
    let err = failed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    assert_eq!(err, SessionError::Capture(CaptureError::DeviceStalled { empty_reads: 6 }));
    assert_eq!(journal.entries(), FULL_RELEASE);
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
    cleanup(&path);
}

#[test]
fn start_while_capturing_is_rejected_without_disturbing_session() {
    let first = temp_output("first.m4a");
    let second = temp_output("second.m4a");
    let mut controller = SessionController::new(FakeBackend::new(Script::default()));

    let handle = controller.start(config(&first)).unwrap();
    assert_eq!(controller.start(config(&second)), Err(SessionError::AlreadyActive));

    assert!(controller.poll_state().is_capturing());
    assert_eq!(controller.active_session(), Some(&handle));
    assert!(!second.exists());
    assert!(!part_path(&second).exists());

    thread::sleep(Duration::from_millis(200));
    let result = closed(controller.stop(&handle));
    assert_eq!(result.file_path, first);
    assert!(first.exists());
    cleanup(&first);
    cleanup(&second);
}

#[test]
fn stop_is_idempotent() {
    let path = temp_output("twice.m4a");
    let backend = FakeBackend::new(Script::default());
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let handle = controller.start(config(&path)).unwrap();
    thread::sleep(Duration::from_millis(100));
    let first = controller.stop(&handle);
    let second = controller.stop(&handle);

    assert!(matches!(first, SessionState::Closed(_)));
    assert_eq!(first, second);
    assert_eq!(journal.entries(), FULL_RELEASE);
    cleanup(&path);
}

#[test]
fn stopping_before_any_audio_leaves_nothing() {
    let path = temp_output("empty.m4a");
    let backend = FakeBackend::new(Script {
        go_silent_after: Some(0),
        ..Script::default()
    });
    let mut controller = SessionController::new(backend);

    let handle = controller
        .start(SessionConfig {
            max_empty_reads: 10_000,
            ..config(&path)
        })
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(failed(controller.stop(&handle)), SessionError::NothingRecorded);
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
    cleanup(&path);
}

#[test]
fn chunks_follow_input_capacity_with_contiguous_timestamps() {
    let path = temp_output("chunks.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        input_capacity: 300,
        refuse_each_submit: 1,
        ..Script::default()
    });
    let accepted = Arc::clone(&backend.accepted);
    let mut controller = SessionController::new(backend);

    controller
        .start(SessionConfig {
            max_duration_secs: Some(0.5),
            ..config(&path)
        })
        .unwrap();
    let result = closed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    let chunks = accepted.lock().clone();
    let mut frames = 0u64;
    for (timestamp_us, samples) in &chunks {
        assert!(*samples <= 300);
        assert_eq!(*timestamp_us, frames_to_us(frames, 44100));
        frames += *samples as u64;
    }
    assert_eq!(frames, 22050);
    assert_eq!(result.diagnostics.frames_captured, 22050);
    // Each 441-frame block splits into 300 + 141.
    assert_eq!(chunks.len(), 100);
    assert!(result.diagnostics.encoder_retries >= chunks.len() as u64);
    cleanup(&path);
}

#[test]
fn stereo_chunks_stay_frame_aligned() {
    let path = temp_output("stereo.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        input_capacity: 301,
        ..Script::default()
    });
    let accepted = Arc::clone(&backend.accepted);
    let mut controller = SessionController::new(backend);

    controller
        .start(SessionConfig {
            channel_count: 2,
            max_duration_secs: Some(0.2),
            ..config(&path)
        })
        .unwrap();
    let result = closed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    let mut frames = 0u64;
    for (timestamp_us, samples) in accepted.lock().iter() {
        assert_eq!(samples % 2, 0);
        assert!(*samples <= 300);
        assert_eq!(*timestamp_us, frames_to_us(frames, 44100));
        frames += (*samples / 2) as u64;
    }
    assert_eq!(frames, result.diagnostics.frames_captured);

    let summary = mp4_format::probe(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(summary.channel_count, 2);
    cleanup(&path);
}

#[test]
fn split_stereo_frame_keeps_channels_in_place() {
    let path = temp_output("split_frame.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        short_read: Some((2, 3)),
        ..Script::default()
    });
    let received = Arc::clone(&backend.received);
    let mut controller = SessionController::new(backend);

    let config = SessionConfig {
        channel_count: 2,
        max_duration_secs: Some(0.2),
        ..config(&path)
    };
    let gain = config.gain_db.linear();
    controller.start(config).unwrap();
    let result = closed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    let received = received.lock().clone();
    assert_eq!(received.len() % 2, 0);
    assert_eq!(received.len() as u64, result.diagnostics.frames_captured * 2);
    let mut expected = tone(0, received.len(), 44100, 2, 8000);
    apply_gain(&mut expected, gain);
    assert_eq!(received, expected);
    cleanup(&path);
}

#[test]
fn max_duration_ends_session_on_its_own() {
    let path = temp_output("capped.m4a");
    let backend = FakeBackend::new(Script {
        real_time: false,
        ..Script::default()
    });
    let mut controller = SessionController::new(backend);

    controller
        .start(SessionConfig {
            max_duration_secs: Some(0.3),
            ..config(&path)
        })
        .unwrap();
    let result = closed(wait_for_terminal(&mut controller, Duration::from_secs(5)));

    assert_relative_eq!(result.duration_secs, 0.3, epsilon = 1e-9);
    assert!(controller.active_session().is_none());
    assert!(path.exists());
    cleanup(&path);
}

#[test]
fn restart_closes_previous_session_first() {
    let first = temp_output("a.m4a");
    let second = temp_output("b.m4a");
    let mut controller = SessionController::new(FakeBackend::new(Script::default()));

    let a = controller.start(config(&first)).unwrap();
    thread::sleep(Duration::from_millis(100));
    let b = controller.restart(config(&second)).unwrap();

    assert_ne!(a, b);
    assert!(first.exists());
    assert!(controller.state().is_capturing());

    thread::sleep(Duration::from_millis(100));
    let result = closed(controller.stop(&b));
    assert_eq!(result.file_path, second);
    cleanup(&first);
    cleanup(&second);
}

#[test]
fn slow_worker_is_detached_and_still_releases() {
    let path = temp_output("slow.m4a");
    let backend = FakeBackend::new(Script {
        read_delay: Some(Duration::from_millis(400)),
        ..Script::default()
    });
    let journal = backend.journal.clone();
    let mut controller = SessionController::new(backend);

    let handle = controller
        .start(SessionConfig {
            stop_timeout_ms: 50,
            ..config(&path)
        })
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(controller.stop(&handle), SessionState::Detached);
    assert!(controller.active_session().is_none());
    assert_eq!(
        controller.start(config(&path)),
        Err(SessionError::OutputInUse(path.display().to_string()))
    );
    assert_eq!(controller.state(), SessionState::Detached);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !journal.contains("writer") && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(journal.entries(), FULL_RELEASE);
    assert!(path.exists());

    // Once the detached worker has exited, its output path is free again.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let reused = loop {
        match controller.start(config(&path)) {
            Err(SessionError::OutputInUse(_)) if std::time::Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(20));
            }
            other => break other,
        }
    };
    assert!(reused.is_ok());
    drop(controller);
    cleanup(&path);
}

#[test]
fn detached_session_does_not_block_other_outputs() {
    let path = temp_output("slow.m4a");
    let other = temp_output("next.m4a");
    let backend = FakeBackend::new(Script {
        read_delay: Some(Duration::from_millis(400)),
        ..Script::default()
    });
    let mut controller = SessionController::new(backend);

    let handle = controller
        .start(SessionConfig {
            stop_timeout_ms: 50,
            ..config(&path)
        })
        .unwrap();
    assert_eq!(controller.stop(&handle), SessionState::Detached);

    assert!(controller.start(config(&other)).is_ok());
    drop(controller);
    thread::sleep(Duration::from_millis(500));
    cleanup(&path);
    cleanup(&other);
}

#[test]
fn loud_input_with_18_db_boost_clamps() {
    let path = temp_output("loud.m4a");
    let backend = FakeBackend::new(Script {
        amplitude: 30000,
        ..Script::default()
    });
    let received = Arc::clone(&backend.received);
    let mut controller = SessionController::new(backend);

    let handle = controller
        .start(SessionConfig {
            gain_db: GainLevel::Plus18,
            ..config(&path)
        })
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    let levels = controller.current_levels();
    closed(controller.stop(&handle));

    assert!(levels.peak <= 1.0);
    assert!(levels.peak > 0.99);

    let received = received.lock().clone();
    let mut expected = tone(0, received.len(), 44100, 1, 30000);
    apply_gain(&mut expected, GainLevel::Plus18.linear());
    assert_eq!(received, expected);
    assert_eq!(received.iter().max(), Some(&i16::MAX));
    assert_eq!(received.iter().min(), Some(&i16::MIN));
    cleanup(&path);
}

#[test]
fn dropping_controller_finishes_active_session() {
    let path = temp_output("dropped.m4a");
    let backend = FakeBackend::new(Script::default());
    let journal = backend.journal.clone();
    let controller_path = path.clone();

    {
        let mut controller = SessionController::new(backend);
        controller.start(config(&controller_path)).unwrap();
        thread::sleep(Duration::from_millis(100));
    }

    assert!(path.exists());
    assert_eq!(journal.entries(), FULL_RELEASE);
    cleanup(&path);
}
