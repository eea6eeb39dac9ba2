//! Session lifecycle tests against fake devices and a scripted remote

mod common;

use tokio::sync::mpsc;

use common::{FakeBackend, FakeEndpoint, agent_chunk, drain_commands};
use parley_client::error::{AcquisitionError, SessionError};
use parley_client::voice::channel::ChannelCommand;
use parley_client::voice::manager::SessionHandle;
use parley_client::voice::meter::ActivityLevel;
use parley_client::voice::session::{Session, SessionConfig, SessionEvent, SessionState};
use parley_common::audio::{CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE};
use parley_common::{ChannelEvent, DecodeError, WireFrame, codec};

const EPSILON: f64 = 1e-9;

fn new_session() -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(SessionConfig::default(), ActivityLevel::new()).with_events(tx);
    (session, rx)
}

fn states(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    states
}

/// Start a session and deliver `Ready`
fn open_session(backend: &FakeBackend, endpoint: &FakeEndpoint) -> Session {
    let (mut session, _rx) = new_session();
    session.start(backend, endpoint).unwrap();
    session.handle_channel_event(ChannelEvent::Ready);
    assert_eq!(session.state(), &SessionState::Open);
    session
}

#[test]
fn test_open_sends_configured_setup() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let (mut session, mut rx) = new_session();

    session.start(&backend, &endpoint).unwrap();
    assert_eq!(session.state(), &SessionState::Connecting);
    assert_eq!(endpoint.opened(), 1);
    assert_eq!(
        endpoint.last_config().unwrap(),
        SessionConfig::default().channel
    );
    // Capture waits for the channel to be ready
    assert_eq!(backend.log().capture_starts, 0);

    session.handle_channel_event(ChannelEvent::Ready);
    assert_eq!(backend.log().capture_starts, 1);
    assert_eq!(
        states(&mut rx),
        vec![SessionState::Connecting, SessionState::Open]
    );
}

#[test]
fn test_chunks_play_back_to_back() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    backend.set_time(1.5);
    let mut session = open_session(&backend, &endpoint);

    let starts: Vec<f64> = (0..3)
        .map(|_| session.receive_audio(&agent_chunk(20)).unwrap().unwrap())
        .map(|handle| handle.start_time)
        .collect();

    assert!((starts[0] - 1.5).abs() < EPSILON);
    assert!((starts[1] - 1.52).abs() < EPSILON);
    assert!((starts[2] - 1.54).abs() < EPSILON);

    let scheduler = session.scheduler().unwrap();
    assert_eq!(scheduler.live_count(), 3);
    assert!((scheduler.next_start_time() - 1.56).abs() < EPSILON);
}

#[test]
fn test_chunk_after_underrun_starts_now() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);

    session.receive_audio(&agent_chunk(20)).unwrap();
    backend.set_time(3.0);
    let handle = session.receive_audio(&agent_chunk(20)).unwrap().unwrap();

    assert!((handle.start_time - 3.0).abs() < EPSILON);
}

#[test]
fn test_interrupt_silences_everything_and_resets_cursor() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let (mut session, mut rx) = new_session();
    backend.set_time(2.0);
    session.start(&backend, &endpoint).unwrap();
    session.handle_channel_event(ChannelEvent::Ready);

    for _ in 0..3 {
        session.receive_audio(&agent_chunk(20)).unwrap();
    }
    backend.set_time(2.01);
    session.handle_channel_event(ChannelEvent::Interrupted);

    let scheduler = session.scheduler().unwrap();
    assert_eq!(scheduler.live_count(), 0);
    assert!((scheduler.next_start_time() - 2.01).abs() < EPSILON);
    assert_eq!(backend.log().cancelled.len(), 3);
    assert_eq!(session.state(), &SessionState::Open);

    let interrupted = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|event| matches!(event, SessionEvent::Interrupted { .. }));
    assert_eq!(interrupted, Some(SessionEvent::Interrupted { cancelled: 3 }));

    // The next chunk starts at the interruption point, not at zero
    let handle = session.receive_audio(&agent_chunk(20)).unwrap().unwrap();
    assert!((handle.start_time - 2.01).abs() < EPSILON);
}

#[test]
fn test_malformed_chunk_leaves_scheduler_untouched() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);
    session.receive_audio(&agent_chunk(20)).unwrap();

    let before = session.scheduler().unwrap().next_start_time();

    assert!(matches!(
        session.receive_audio(&WireFrame::from_base64("not base64!")),
        Err(DecodeError::Envelope(_))
    ));
    // Three bytes cannot hold whole 16-bit samples
    assert!(matches!(
        session.receive_audio(&WireFrame::from_base64("AAAA")),
        Err(DecodeError::Misaligned { .. })
    ));

    let scheduler = session.scheduler().unwrap();
    assert_eq!(scheduler.live_count(), 1);
    assert_eq!(scheduler.next_start_time(), before);
    assert_eq!(backend.log().scheduled.len(), 1);

    // Delivered through the channel, a bad chunk is dropped and the session goes on
    session.handle_channel_event(ChannelEvent::AudioChunk(WireFrame::from_base64("AAAA")));
    assert_eq!(session.state(), &SessionState::Open);
}

#[test]
fn test_completed_playback_leaves_live_set() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);

    let first = session.receive_audio(&agent_chunk(20)).unwrap().unwrap();
    let second = session.receive_audio(&agent_chunk(20)).unwrap().unwrap();

    backend.finish(first.id);
    let live = session.scheduler().unwrap().live_handles();
    assert_eq!(live, vec![second]);
}

#[test]
fn test_outbound_frames_keep_capture_order() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);
    let mut transport = endpoint.take_transport().unwrap();

    let samples: Vec<f32> = (0..2500).map(|i| (i % 1000) as f32 / 1000.0).collect();
    session.handle_samples(&samples[..700]);
    session.handle_samples(&samples[700..]);

    let frames: Vec<WireFrame> = drain_commands(&mut transport)
        .into_iter()
        .map(|command| match command {
            ChannelCommand::SendAudio(frame) => frame,
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    assert_eq!(frames.len(), 2);

    for (n, frame) in frames.iter().enumerate() {
        let decoded = codec::decode(frame, CAPTURE_SAMPLE_RATE, 1).unwrap();
        assert_eq!(decoded.len(), CAPTURE_FRAME_SAMPLES);
        let offset = n * CAPTURE_FRAME_SAMPLES;
        for (i, sample) in decoded.channel(0).unwrap().iter().enumerate() {
            assert!((sample - samples[offset + i]).abs() < 1.0 / 16384.0);
        }
    }

    // The 452 leftover samples are discarded, never padded and sent
    session.stop();
    assert_eq!(drain_commands(&mut transport), vec![ChannelCommand::Close]);
}

#[test]
fn test_stop_releases_everything_once() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let (mut session, mut rx) = new_session();
    session.start(&backend, &endpoint).unwrap();
    session.handle_channel_event(ChannelEvent::Ready);
    session.receive_audio(&agent_chunk(20)).unwrap();
    let mut transport = endpoint.take_transport().unwrap();

    session.stop();
    session.stop();

    assert_eq!(session.state(), &SessionState::Closed);
    assert!(session.resources().is_released());
    let log = backend.log();
    assert_eq!(log.capture_stops, 1);
    assert_eq!(log.playback_closes, 1);
    assert_eq!(log.cancelled.len(), 1);
    drop(log);
    assert_eq!(drain_commands(&mut transport), vec![ChannelCommand::Close]);
    assert_eq!(
        states(&mut rx),
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
}

#[test]
fn test_stop_while_connecting_ignores_late_ready() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let (mut session, _rx) = new_session();
    session.start(&backend, &endpoint).unwrap();

    session.stop();
    assert_eq!(session.state(), &SessionState::Closed);

    session.handle_channel_event(ChannelEvent::Ready);
    session.handle_channel_event(ChannelEvent::AudioChunk(agent_chunk(20)));
    assert_eq!(session.state(), &SessionState::Closed);
    assert_eq!(backend.log().capture_starts, 0);
    assert!(backend.log().scheduled.is_empty());
    assert_eq!(backend.log().capture_stops, 1);
}

#[test]
fn test_output_failure_releases_microphone() {
    let backend = FakeBackend::new();
    backend.log().fail_playback = true;
    let endpoint = FakeEndpoint::new();
    let (mut session, mut rx) = new_session();

    let result = session.start(&backend, &endpoint);
    assert!(matches!(
        result,
        Err(SessionError::Acquisition(AcquisitionError::OutputNotFound))
    ));
    assert!(matches!(session.state(), SessionState::Error(_)));
    assert_eq!(backend.log().capture_stops, 1);
    assert_eq!(endpoint.opened(), 0);

    let seen = states(&mut rx);
    assert_eq!(seen.first(), Some(&SessionState::Connecting));
    assert!(matches!(seen.last(), Some(SessionState::Error(_))));
}

#[test]
fn test_microphone_failure_is_reported() {
    let backend = FakeBackend::new();
    backend.log().fail_capture = true;
    let endpoint = FakeEndpoint::new();
    let (mut session, _rx) = new_session();

    assert!(session.start(&backend, &endpoint).is_err());
    assert!(matches!(session.state(), SessionState::Error(reason) if reason.contains("input")));
    assert_eq!(backend.log().playback_closes, 0);
}

#[test]
fn test_endpoint_failure_releases_devices() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::failing();
    let (mut session, _rx) = new_session();

    assert!(matches!(
        session.start(&backend, &endpoint),
        Err(SessionError::Channel(_))
    ));
    assert!(matches!(session.state(), SessionState::Error(_)));
    assert!(session.resources().is_released());
    assert_eq!(backend.log().capture_stops, 1);
    assert_eq!(backend.log().playback_closes, 1);
}

#[test]
fn test_stop_after_channel_error_settles_closed() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let (mut session, mut rx) = new_session();
    session.start(&backend, &endpoint).unwrap();
    session.handle_channel_event(ChannelEvent::Ready);

    session.handle_channel_event(ChannelEvent::Error("socket reset".to_string()));
    assert_eq!(
        session.state(),
        &SessionState::Error("socket reset".to_string())
    );
    assert!(session.resources().is_released());

    // Events after the failure change nothing
    session.handle_channel_event(ChannelEvent::Ready);
    assert!(matches!(session.state(), SessionState::Error(_)));

    session.stop();
    session.stop();
    assert_eq!(session.state(), &SessionState::Closed);
    assert_eq!(session.last_error(), Some("socket reset"));
    assert_eq!(backend.log().capture_stops, 1);
    assert_eq!(backend.log().playback_closes, 1);
    assert_eq!(
        states(&mut rx),
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Error("socket reset".to_string()),
            SessionState::Closed,
        ]
    );
}

#[test]
fn test_remote_close_ends_session() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);

    session.handle_channel_event(ChannelEvent::Closed);
    assert_eq!(session.state(), &SessionState::Closed);
    assert!(session.resources().is_released());
    assert!(session.receive_audio(&agent_chunk(20)).unwrap().is_none());
}

#[test]
fn test_device_error_fails_session() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);

    session.check_devices();
    assert_eq!(session.state(), &SessionState::Open);

    backend.log().capture_error = Some("device unplugged".to_string());
    session.check_devices();
    assert!(matches!(session.state(), SessionState::Error(reason) if reason.contains("unplugged")));
    assert_eq!(backend.log().capture_stops, 1);
}

#[test]
fn test_start_twice_is_rejected() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);

    assert!(matches!(
        session.start(&backend, &endpoint),
        Err(SessionError::NotIdle(_))
    ));
    assert_eq!(session.state(), &SessionState::Open);
    assert_eq!(endpoint.opened(), 1);
}

#[test]
fn test_activity_reflects_input() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();
    let mut session = open_session(&backend, &endpoint);
    assert_eq!(session.measure_activity(), 0.0);

    let tone: Vec<f32> = (0..512)
        .map(|i| 0.8 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
        .collect();
    session.handle_samples(&tone);
    assert!(session.measure_activity() > 0.0);

    session.stop();
    assert_eq!(session.measure_activity(), 0.0);
}

#[tokio::test]
async fn test_session_handle_full_conversation() {
    let backend = FakeBackend::new();
    let endpoint = FakeEndpoint::new();

    let (handle, mut events) = SessionHandle::start(
        SessionConfig::default(),
        Box::new(backend.clone()),
        Box::new(endpoint.clone()),
    );

    let mut transport = endpoint.wait_for_transport().await;
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Connecting))
    );

    transport.emit(ChannelEvent::Ready);
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Open))
    );

    assert!(backend.speak(vec![0.1; CAPTURE_FRAME_SAMPLES]));
    match transport.commands.recv().await {
        Some(ChannelCommand::SendAudio(frame)) => assert!(!frame.is_empty()),
        other => panic!("expected audio, got {other:?}"),
    }

    transport.emit(ChannelEvent::AudioChunk(agent_chunk(20)));
    transport.emit(ChannelEvent::TurnComplete);
    assert_eq!(events.recv().await, Some(SessionEvent::TurnComplete));
    assert_eq!(backend.log().scheduled.len(), 1);

    tokio::task::spawn_blocking(move || handle.join())
        .await
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Closing))
    );
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Closed))
    );
    assert_eq!(transport.commands.recv().await, Some(ChannelCommand::Close));
    assert_eq!(backend.log().capture_stops, 1);
    assert_eq!(backend.log().playback_closes, 1);
}

#[tokio::test]
async fn test_session_handle_reports_start_failure() {
    let backend = FakeBackend::new();
    backend.log().fail_playback = true;

    let (handle, mut events) = SessionHandle::start(
        SessionConfig::default(),
        Box::new(backend),
        Box::new(FakeEndpoint::new()),
    );

    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Connecting))
    );
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Error(_)))
    ));
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .unwrap();
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::StateChanged(SessionState::Closed))
    );
    assert_eq!(events.recv().await, None);
}
