//! Integration tests: a full streaming runtime against mock collaborators.
//!
//! Each test stands up a [`StreamSession`] with a scripted transport,
//! decoder driver, control source, and audio sink, then drives the
//! external event surface the way a real session layer would.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use farplay::assembler::gap::GapAction;
use farplay::config::Settings;
use farplay::error::{Result, StreamError};
use farplay::input::mapping::{LocalButton, MappingTable};
use farplay::input::{ControlSource, ControllerSnapshot, RawInput};
use farplay::seq::SeqNum16;
use farplay::session::{
    DiagSnapshot, QuitReason, RestartProfile, SessionEvents, SessionTransport,
};
use farplay::video::decoder::{DecodeStatus, DecoderConfig, DecoderDriver, DecoderStage, Picture};
use farplay::{StreamSession, StreamSessionConfig};

// --- Mocks -----------------------------------------------------------------

#[derive(Default)]
struct TransportLog {
    idr_reasons: Vec<String>,
    restarts: Vec<RestartProfile>,
    gap_reports: Vec<GapAction>,
    controller_sends: u32,
}

struct MockTransport {
    log: Mutex<TransportLog>,
    refuse_restarts: bool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(TransportLog::default()),
            refuse_restarts: false,
        })
    }

    fn refusing_restarts() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(TransportLog::default()),
            refuse_restarts: true,
        })
    }

    fn idr_count(&self) -> usize {
        self.log.lock().unwrap().idr_reasons.len()
    }

    fn restart_count(&self) -> usize {
        self.log.lock().unwrap().restarts.len()
    }
}

impl SessionTransport for MockTransport {
    fn send_controller(&self, _snapshot: &ControllerSnapshot) {
        self.log.lock().unwrap().controller_sends += 1;
    }

    fn request_idr(&self, reason: &str) -> Result<()> {
        self.log.lock().unwrap().idr_reasons.push(reason.to_string());
        Ok(())
    }

    fn request_restart(&self, profile: &RestartProfile) -> Result<()> {
        self.log.lock().unwrap().restarts.push(*profile);
        if self.refuse_restarts {
            Err(StreamError::Transport("refused".into()))
        } else {
            Ok(())
        }
    }

    fn send_gap_report(&self, action: &GapAction) {
        self.log.lock().unwrap().gap_reports.push(*action);
    }

    fn diag_try_lock(&self) -> Option<DiagSnapshot> {
        Some(DiagSnapshot::default())
    }
}

struct MockDriver;

impl DecoderDriver for MockDriver {
    fn bring_up(&mut self, _stage: DecoderStage, _config: &DecoderConfig) -> Result<()> {
        Ok(())
    }

    fn tear_down(&mut self, _stage: DecoderStage) {}

    fn decode(&mut self, access_unit: &[u8]) -> Result<DecodeStatus> {
        Ok(DecodeStatus::Picture(Picture {
            width: 960,
            height: 544,
            data: access_unit.to_vec(),
            keyframe: false,
        }))
    }
}

#[derive(Clone, Default)]
struct ScriptedControls {
    held: Arc<Mutex<u32>>,
    rumble: Arc<Mutex<Vec<(u8, u8)>>>,
}

impl ControlSource for ScriptedControls {
    fn sample(&mut self) -> RawInput {
        RawInput {
            buttons: *self.held.lock().unwrap(),
            left_x: 0x80,
            left_y: 0x80,
            right_x: 0x80,
            right_y: 0x80,
            ..RawInput::default()
        }
    }

    fn set_actuators(&mut self, left: u8, right: u8) {
        self.rumble.lock().unwrap().push((left, right));
    }
}

#[derive(Clone, Default)]
struct CountingAudioSink {
    frames: Arc<AtomicU32>,
}

impl farplay::audio::AudioSink for CountingAudioSink {
    fn configure(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }

    fn play(&mut self, _samples: &[i16]) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

fn start_session(
    transport: Arc<MockTransport>,
    controls: ScriptedControls,
    audio: CountingAudioSink,
) -> StreamSession {
    StreamSession::start(StreamSessionConfig {
        transport,
        decoder: Box::new(MockDriver),
        control_source: Box::new(controls),
        audio_sink: Box::new(audio),
        settings: Settings::default(),
        mapping: MappingTable::standard(),
        audio_sample_rate: 48_000,
        audio_channels: 2,
    })
    .expect("session start")
}

fn unit(tag: u8) -> Vec<u8> {
    vec![0, 0, 0, 1, 0x41, tag]
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// --- Scenarios -------------------------------------------------------------

#[test]
fn out_of_order_units_render_in_order() {
    let transport = MockTransport::new();
    let session = start_session(
        transport,
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_video_unit(SeqNum16(0), &unit(0), 0, false);
    // 2 before 1: held in the reorder window until 1 arrives.
    handle.on_video_unit(SeqNum16(2), &unit(2), 0, false);
    handle.on_video_unit(SeqNum16(1), &unit(1), 0, false);

    // The frame slot is latest-wins; drain it like a renderer and watch
    // the tags arrive in nondecreasing order, ending at the last unit.
    let mut tags: Vec<u8> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while tags.last() != Some(&2) {
        assert!(Instant::now() < deadline, "frame 2 never rendered");
        session.render_latest_frame(|picture| {
            tags.push(*picture.data.last().unwrap());
        });
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(tags.windows(2).all(|w| w[0] <= w[1]), "tags: {tags:?}");

    session.finalize();
}

#[test]
fn loss_gate_trip_requests_single_idr_and_no_restart() {
    let transport = MockTransport::new();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_video_unit(SeqNum16(0), &unit(0), 0, false);
    // Three bursty loss events, each 3 frames.
    handle.on_video_unit(SeqNum16(1), &unit(1), 3, false);
    handle.on_video_unit(SeqNum16(2), &unit(2), 3, false);
    handle.on_video_unit(SeqNum16(3), &unit(3), 3, false);

    wait_until("the loss gate to trip", || transport.idr_count() >= 1);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(transport.idr_count(), 1, "exactly one IDR per gate trip");
    assert_eq!(transport.restart_count(), 0, "loss alone never restarts");

    session.finalize();
}

#[test]
fn transient_quit_triggers_reconnect() {
    let transport = MockTransport::new();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_quit(QuitReason::NetworkLost);

    wait_until("a reconnect restart request", || {
        transport.restart_count() >= 1
    });
    let overlay = session.overlay();
    let banner = overlay.banner.expect("disconnect banner");
    assert_eq!(banner.text, "Network connection lost");
    assert!(banner.requires_retry);
    assert!(session.is_streaming(), "session survives a transient quit");

    session.finalize();
}

#[test]
fn fatal_quit_ends_session_without_restart() {
    let transport = MockTransport::new();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_quit(QuitReason::RemotePlayInUse);

    wait_until("the session to stop", || !session.is_streaming());
    assert_eq!(transport.restart_count(), 0);
    let overlay = session.overlay();
    let banner = overlay.banner.expect("disconnect banner");
    assert!(!banner.requires_retry);

    session.finalize();
}

#[test]
fn failed_reconnect_retries_twice_then_gives_up() {
    let transport = MockTransport::refusing_restarts();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_quit(QuitReason::NetworkLost);

    wait_until("the session to give up", || !session.is_streaming());
    assert_eq!(
        transport.restart_count(),
        2,
        "underlying request retries exactly twice"
    );

    session.finalize();
}

#[test]
fn exit_combo_requests_stop() {
    let transport = MockTransport::new();
    let controls = ScriptedControls::default();
    let session = start_session(
        transport,
        controls.clone(),
        CountingAudioSink::default(),
    );

    *controls.held.lock().unwrap() =
        LocalButton::L.bit() | LocalButton::R.bit() | LocalButton::Start.bit();

    // 500 ticks at 2 ms ≈ 1 s of holding the combo.
    wait_until("the exit combo to fire", || !session.is_streaming());

    session.finalize();
}

#[test]
fn audio_frames_reach_the_sink() {
    let transport = MockTransport::new();
    let audio = CountingAudioSink::default();
    let session = start_session(transport, ScriptedControls::default(), audio.clone());
    let handle = session.handle();

    handle.on_audio_frame(&[0i16; 480]);
    handle.on_audio_frame(&[1i16; 480]);

    wait_until("audio frames to play", || {
        audio.frames.load(Ordering::SeqCst) >= 2
    });

    session.finalize();
}

#[test]
fn rumble_reaches_the_control_source() {
    let transport = MockTransport::new();
    let controls = ScriptedControls::default();
    let session = start_session(
        transport,
        controls.clone(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_rumble(0x80, 0x40);

    wait_until("the actuator write", || {
        controls.rumble.lock().unwrap().contains(&(0x80, 0x40))
    });

    session.finalize();
}

#[test]
fn controller_snapshots_flow_continuously() {
    let transport = MockTransport::new();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );

    wait_until("controller snapshots", || {
        transport.log.lock().unwrap().controller_sends >= 10
    });

    session.finalize();
}

#[test]
fn head_gap_produces_a_gap_report() {
    let transport = MockTransport::new();
    let session = start_session(
        transport.clone(),
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();

    handle.on_video_unit(SeqNum16(0), &unit(0), 0, false);
    // Hole at 1..=2.
    handle.on_video_unit(SeqNum16(3), &unit(3), 0, false);

    wait_until("a pending gap report", || {
        transport
            .log
            .lock()
            .unwrap()
            .gap_reports
            .iter()
            .any(|g| matches!(g, GapAction::SetPending { .. }))
    });

    session.finalize();
}

#[test]
fn finalize_is_clean_and_idempotent_with_drop() {
    let transport = MockTransport::new();
    let session = start_session(
        transport,
        ScriptedControls::default(),
        CountingAudioSink::default(),
    );
    let handle = session.handle();
    handle.on_video_unit(SeqNum16(0), &unit(0), 0, false);
    session.finalize();
    // The cloned handle outlives the session; events are ignored, not
    // panics.
    handle.on_video_unit(SeqNum16(1), &unit(1), 0, false);
    handle.on_quit(QuitReason::NetworkLost);
}
