//! Stream supervisor: session lifecycle, health aggregation, recovery.
//!
//! The supervisor is the only writer to [`SessionState`] and the recovery
//! machinery. Everything reaches it as messages: loss events from the
//! assembler, per-second [`TickReport`]s from the video pipeline, quit
//! notifications from the transport. Its loop evaluates the timed gates
//! opportunistically on that cadence and pushes control back out —
//! IDR requests, coordinated restarts, overlay state for the renderer.
//!
//! [`StreamSession`] is the assembled runtime: it wires the reorder/
//! assembly receive path, the video/audio/input pipelines, and the
//! supervisor thread around an externally provided transport, decoder
//! driver, control source, and audio sink, and owns the teardown sequence
//! behind a finalization lock.

pub mod loss;
pub mod overlay;
pub mod recovery;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::assembler::gap::GapAction;
use crate::assembler::{AssembledFrame, AssemblerSink, FrameAssembler, LossEvent};
use crate::audio::{AudioPipeline, AudioSink};
use crate::config::{LatencyMode, Resolution, Settings};
use crate::error::Result;
use crate::input::{ControlSource, InputPipeline};
use crate::input::mapping::MappingTable;
use crate::metrics::{MetricsHub, StreamMetrics};
use crate::seq::SeqNum16;
use crate::session::{
    DiagSnapshot, QuitReason, RestartProfile, SessionClock, SessionEvents, SessionFlags,
    SessionTransport,
};
use crate::video::decoder::{DecoderConfig, DecoderDriver, Picture};
use crate::video::{TickReport, VideoConfig, VideoPipeline};
use loss::{GateOutcome, GateParams, LossGate, MeasuredConditions};
use overlay::{ConnectionStage, OverlayHub, OverlayState};
use recovery::{
    DEGRADED_ENGAGE_TICKS, DEGRADED_WATCH_WINDOW_US, DegradedAction, GateStageAction,
    HEALTHY_FPS_FLOOR, HealthObservation, LossRecovery, RecoveryFsm, RestartCoordinator,
    RestartGuards, RestartOutcome,
};

/// Frames force-dropped after a stage-2 decoder resync.
const RESYNC_FORCED_DROPS: u32 = 3;

/// Per-source restart attempts after which the FSM treats the source as
/// backing off.
const SOURCE_BACKOFF_ATTEMPTS: u32 = 3;

/// Incoming FPS deficit that counts a tick as "low FPS".
const LOW_FPS_MARGIN: u32 = 5;

/// Full session state. Exclusively owned by the supervisor; other threads
/// see only the atomic [`SessionFlags`] and read-only snapshots.
#[derive(Debug, Default)]
pub struct SessionState {
    pub is_streaming: bool,
    pub session_init: bool,
    pub stop_requested: bool,
    pub fast_restart_active: bool,
    pub reconnect_overlay_active: bool,
    /// Bumped on every stream (re)start; stale callbacks compare against
    /// it.
    pub generation: u32,
    pub reconnect_generation: u32,
    pub auto_reconnect_count: u32,
    /// Cooldown before the next stream may start.
    pub next_stream_allowed_us: u64,
    pub last_restart_source: Option<String>,
    pub last_restart_failure_us: Option<u64>,
    pub restart_cooloff_until_us: u64,
    pub inputs_ready: bool,
    pub input_thread_should_exit: bool,
}

/// Messages into the supervisor loop.
#[derive(Debug)]
pub enum SupervisorEvent {
    Loss(LossEvent),
    Quit(QuitReason),
}

/// Counts low-FPS ticks after a restart; engages the degraded-mode FSM.
#[derive(Debug, Default)]
struct DegradedWatch {
    armed_at_us: Option<u64>,
    low_ticks: u32,
}

impl DegradedWatch {
    fn arm(&mut self, now_us: u64) {
        self.armed_at_us = Some(now_us);
        self.low_ticks = 0;
    }

    fn disarm(&mut self) {
        self.armed_at_us = None;
        self.low_ticks = 0;
    }

    /// Returns true when the watch decides the restarted stream is
    /// degraded.
    fn observe(&mut self, low_and_progressing: bool, now_us: u64) -> bool {
        let Some(armed_at) = self.armed_at_us else {
            return false;
        };
        if now_us.saturating_sub(armed_at) > DEGRADED_WATCH_WINDOW_US {
            self.disarm();
            return false;
        }
        if low_and_progressing {
            self.low_ticks += 1;
            if self.low_ticks >= DEGRADED_ENGAGE_TICKS {
                self.disarm();
                return true;
            }
        }
        false
    }
}

struct Supervisor {
    state: SessionState,
    gate: LossGate,
    loss_recovery: LossRecovery,
    fsm: RecoveryFsm,
    coordinator: RestartCoordinator,
    watch: DegradedWatch,

    transport: Arc<dyn SessionTransport>,
    video: Arc<VideoPipeline>,
    input: Arc<InputPipeline>,
    assembler: Arc<Mutex<FrameAssembler>>,
    overlay: Arc<OverlayHub>,
    flags: Arc<SessionFlags>,
    clock: SessionClock,

    latency_mode: LatencyMode,
    clamp_restart_bitrate: bool,
    show_network_indicator: bool,
    resolution: Resolution,
    target_fps: u32,

    last_diag: Option<DiagSnapshot>,
    quit_banner_shown: bool,
    stop_handled: bool,
}

impl Supervisor {
    fn base_profile(&self) -> RestartProfile {
        RestartProfile {
            bitrate_kbps: self.latency_mode.target_bitrate_kbps(),
            resolution: self.resolution,
            fps: self.target_fps,
        }
    }

    fn run(
        mut self,
        event_rx: Receiver<SupervisorEvent>,
        tick_rx: Receiver<TickReport>,
        shutdown: Arc<AtomicBool>,
    ) {
        enum LoopMsg {
            Event(SupervisorEvent),
            EventsClosed,
            Tick(TickReport),
            TicksClosed,
            Idle,
        }

        let mut event_rx = event_rx;
        let mut tick_rx = tick_rx;
        let mut events_open = true;
        let mut ticks_open = true;

        debug!("PIPE/supervisor: loop started");
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let msg = select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => LoopMsg::Event(event),
                    Err(_) => LoopMsg::EventsClosed,
                },
                recv(tick_rx) -> msg => match msg {
                    Ok(report) => LoopMsg::Tick(report),
                    Err(_) => LoopMsg::TicksClosed,
                },
                default(Duration::from_millis(100)) => LoopMsg::Idle,
            };
            match msg {
                LoopMsg::Event(event) => self.handle_event(event),
                LoopMsg::Tick(report) => self.handle_tick(&report),
                LoopMsg::EventsClosed => {
                    event_rx = never();
                    events_open = false;
                }
                LoopMsg::TicksClosed => {
                    tick_rx = never();
                    ticks_open = false;
                }
                LoopMsg::Idle => {}
            }
            if !events_open && !ticks_open {
                break;
            }
            self.poll_assembler();
            if self.flags.stop_requested.load(Ordering::SeqCst) && !self.stop_handled {
                self.handle_stop();
            }
        }
        debug!("PIPE/supervisor: loop exited");
    }

    /// Time-based assembler upkeep: gap-report deadlines must fire even
    /// when no further units arrive.
    fn poll_assembler(&mut self) {
        #[derive(Default)]
        struct Collected {
            frames: Vec<AssembledFrame>,
            losses: Vec<LossEvent>,
            gaps: Vec<GapAction>,
        }
        impl AssemblerSink for Collected {
            fn on_frame(&mut self, frame: AssembledFrame) {
                self.frames.push(frame);
            }
            fn on_loss(&mut self, loss: LossEvent) {
                self.losses.push(loss);
            }
            fn on_gap_action(&mut self, action: GapAction) {
                self.gaps.push(action);
            }
        }

        let mut collected = Collected::default();
        self.assembler
            .lock()
            .poll(self.clock.now_ms(), &mut collected);
        for frame in collected.frames {
            self.video.submit(frame);
        }
        for action in collected.gaps {
            self.transport.send_gap_report(&action);
        }
        for loss in collected.losses {
            self.handle_loss(loss);
        }
    }

    fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Loss(loss) => self.handle_loss(loss),
            SupervisorEvent::Quit(reason) => self.handle_quit(reason),
        }
    }

    fn handle_loss(&mut self, loss: LossEvent) {
        let now_us = self.clock.now_us();
        match self.gate.on_loss(loss.frames_lost, now_us) {
            GateOutcome::None => {}
            GateOutcome::Trip => match self.loss_recovery.on_gate_trip(now_us) {
                GateStageAction::RequestIdr => {
                    info!(frames_lost = loss.frames_lost, "PIPE/supervisor: loss gate tripped, requesting IDR");
                    if let Err(e) = self.transport.request_idr("loss gate") {
                        warn!(error = %e, "IDR request failed");
                    }
                }
                GateStageAction::DecoderResync => {
                    info!("PIPE/supervisor: repeated loss gate, decoder resync follow-up");
                    if let Err(e) = self.transport.request_idr("decoder resync") {
                        warn!(error = %e, "IDR request failed");
                    }
                    self.video.force_drops(RESYNC_FORCED_DROPS);
                }
            },
            GateOutcome::SaturationReset => {
                // One-shot, already logged by the gate. Counters are
                // zeroed; recovery re-enters at Idle.
                self.loss_recovery.reset();
                self.fsm.clear();
            }
        }
    }

    fn handle_quit(&mut self, reason: QuitReason) {
        let now_us = self.clock.now_us();
        info!(?reason, "PIPE/supervisor: transport quit");
        self.overlay.set_banner(reason, now_us);
        self.quit_banner_shown = true;

        if !reason.requires_retry() {
            self.flags.stop_requested.store(true, Ordering::SeqCst);
            return;
        }

        self.state.reconnect_generation += 1;
        self.state.reconnect_overlay_active = true;
        self.overlay.set_stage(ConnectionStage::Reconnecting);

        let profile = self.base_profile();
        let outcome = self.coordinator.coordinate(
            &mut self.state,
            self.transport.as_ref(),
            "quit-reconnect",
            profile,
            self.clamp_restart_bitrate,
            false,
            self.loss_recovery.last_action_us(),
            now_us,
        );
        match outcome {
            RestartOutcome::Requested | RestartOutcome::AlreadyActive => {
                self.after_restart_request(now_us);
            }
            RestartOutcome::Skipped => {}
            outcome => {
                warn!(?outcome, "PIPE/supervisor: reconnect not possible, ending session");
                self.state.reconnect_overlay_active = false;
                self.flags.stop_requested.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Housekeeping once a restart request is in flight: flush stale
    /// stream state and keep the console's controller view continuous.
    fn after_restart_request(&mut self, now_us: u64) {
        self.video.reset_for_restart();
        self.assembler.lock().reset();
        self.transport.send_controller(&self.input.cached_snapshot());
        self.watch.arm(now_us);
    }

    fn handle_tick(&mut self, report: &TickReport) {
        let now_us = report.now_us;

        // Re-tune the loss gate against measured conditions.
        let conditions = MeasuredConditions {
            measured_bitrate_mbps: report.windowed_bitrate_mbps,
            target_bitrate_mbps: self.latency_mode.target_bitrate_kbps() as f64 / 1000.0,
            measured_fps: report.incoming_fps,
            target_fps: self.target_fps,
            prior_retries: self.fsm.restart_attempts(),
        };
        self.gate
            .set_params(GateParams::adjusted(self.latency_mode, &conditions));

        // A flowing stream completes any in-flight fast restart.
        if self.state.fast_restart_active && report.incoming_fps > 0 {
            info!("PIPE/supervisor: restarted stream is flowing");
            self.state.fast_restart_active = false;
            self.state.reconnect_overlay_active = false;
            self.state.session_init = true;
            self.overlay.set_stage(ConnectionStage::Streaming);
        }

        let low_fps = report.incoming_fps + LOW_FPS_MARGIN < self.target_fps;
        let progressing = match (&report.diag, &self.last_diag) {
            (Some(now), Some(prev)) => now.av_total() > prev.av_total(),
            _ => false,
        };
        if let Some(diag) = report.diag {
            self.last_diag = Some(diag);
        }
        let av_distress = low_fps && (report.stale_streak >= 5 || progressing);

        if self.watch.observe(low_fps && progressing, now_us) {
            info!("PIPE/supervisor: restarted stream stayed degraded, engaging recovery");
            let action = self.fsm.trigger(now_us);
            self.apply_degraded_action(action, now_us);
        }

        let guards = RestartGuards {
            in_cooloff: now_us < self.state.restart_cooloff_until_us,
            source_backoff: self.coordinator.source_attempts() >= SOURCE_BACKOFF_ATTEMPTS,
        };
        let obs = HealthObservation {
            now_us,
            low_fps,
            healthy: report.incoming_fps >= HEALTHY_FPS_FLOOR && !av_distress,
            av_distress,
        };
        let action = self.fsm.tick(&obs, &guards);
        self.apply_degraded_action(action, now_us);

        if self.show_network_indicator {
            self.overlay.set_poor_network(low_fps || av_distress);
        }
    }

    fn apply_degraded_action(&mut self, action: DegradedAction, now_us: u64) {
        match action {
            DegradedAction::None => {}
            DegradedAction::SendIdr { hint } => {
                if let Some(hint) = hint {
                    self.overlay.set_hint(hint, false, now_us);
                }
                if let Err(e) = self.transport.request_idr("reference recovery") {
                    warn!(error = %e, "IDR request failed");
                }
            }
            DegradedAction::SoftRestart { bitrate_kbps, hint } => {
                self.overlay.set_hint(hint, false, now_us);
                self.degraded_restart("degraded-soft-restart", bitrate_kbps, now_us);
            }
            DegradedAction::GuardedRestart { bitrate_kbps, hint } => {
                self.overlay.set_hint(hint, true, now_us);
                self.degraded_restart("degraded-escalation", bitrate_kbps, now_us);
            }
        }
    }

    fn degraded_restart(&mut self, source: &str, bitrate_kbps: u32, now_us: u64) {
        let profile = RestartProfile {
            bitrate_kbps,
            ..self.base_profile()
        };
        let outcome = self.coordinator.coordinate(
            &mut self.state,
            self.transport.as_ref(),
            source,
            profile,
            self.clamp_restart_bitrate,
            false,
            self.loss_recovery.last_action_us(),
            now_us,
        );
        if matches!(outcome, RestartOutcome::Requested) {
            self.after_restart_request(now_us);
        } else {
            debug!(?outcome, source, "degraded restart did not go out");
        }
    }

    fn handle_stop(&mut self) {
        let now_us = self.clock.now_us();
        self.stop_handled = true;
        self.state.stop_requested = true;
        self.state.is_streaming = false;
        self.state.inputs_ready = false;
        self.state.input_thread_should_exit = true;
        self.state.next_stream_allowed_us = now_us + recovery::ACTION_COOLDOWN_US;
        self.flags.is_streaming.store(false, Ordering::SeqCst);
        self.flags.inputs_ready.store(false, Ordering::SeqCst);
        self.overlay.set_stage(ConnectionStage::Idle);
        if !self.quit_banner_shown {
            self.overlay.set_banner(QuitReason::StoppedByUser, now_us);
        }
        info!("PIPE/supervisor: stream stopped");
    }
}

/// Everything a [`StreamSession`] needs from the embedder.
pub struct StreamSessionConfig {
    pub transport: Arc<dyn SessionTransport>,
    pub decoder: Box<dyn DecoderDriver>,
    pub control_source: Box<dyn ControlSource>,
    pub audio_sink: Box<dyn AudioSink>,
    pub settings: Settings,
    /// Mapping table resolved by the host UI (preset or custom map).
    pub mapping: MappingTable,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

struct SessionRuntime {
    transport: Arc<dyn SessionTransport>,
    video: Arc<VideoPipeline>,
    audio: Arc<AudioPipeline>,
    input: Arc<InputPipeline>,
    assembler: Arc<Mutex<FrameAssembler>>,
    event_tx: Sender<SupervisorEvent>,
    overlay: Arc<OverlayHub>,
    hub: Arc<MetricsHub>,
    flags: Arc<SessionFlags>,
    clock: SessionClock,
}

/// A live streaming session: the four worker activities plus the
/// supervisor, assembled around an external session transport.
pub struct StreamSession {
    runtime: Arc<SessionRuntime>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    /// Finalization lock: the teardown sequence must not re-enter.
    finalize_lock: Mutex<bool>,
}

impl StreamSession {
    pub fn start(config: StreamSessionConfig) -> Result<StreamSession> {
        let clock = SessionClock::start();
        let flags = Arc::new(SessionFlags::default());
        flags.is_streaming.store(true, Ordering::SeqCst);
        flags.inputs_ready.store(true, Ordering::SeqCst);

        let overlay = Arc::new(OverlayHub::new());
        overlay.set_stage(ConnectionStage::Streaming);
        if config.settings.show_stream_exit_hint {
            overlay.show_exit_hint(clock.now_us());
        }

        let hub = Arc::new(MetricsHub::new());
        let (event_tx, event_rx) = bounded::<SupervisorEvent>(64);
        let (tick_tx, tick_rx) = bounded::<TickReport>(8);

        let negotiated_fps = config.settings.fps.0;
        let target_fps = if config.settings.force_30fps {
            30
        } else {
            negotiated_fps
        };
        let (width, height) = config.settings.resolution.dimensions();
        let scale_mode = if config.settings.stretch_video {
            crate::video::scaling::ScaleMode::Stretch
        } else {
            crate::video::scaling::ScaleMode::Preserve
        };

        let video = Arc::new(VideoPipeline::start(
            config.decoder,
            &DecoderConfig {
                width,
                height,
                max_ref_frames: crate::media::sps::LOW_LATENCY_REF_FRAMES,
            },
            VideoConfig {
                target_fps,
                negotiated_fps,
                force_30fps: config.settings.force_30fps,
                scale_mode,
                show_latency: config.settings.show_latency,
            },
            clock,
            hub.clone(),
            config.transport.clone(),
            tick_tx,
        )?);

        let audio = Arc::new(AudioPipeline::start(
            config.audio_sink,
            config.audio_sample_rate,
            config.audio_channels,
        )?);

        let input = Arc::new(InputPipeline::start(
            config.control_source,
            config.transport.clone(),
            config.mapping,
            config.settings.ps_button_dual_mode,
            flags.clone(),
            clock,
        ));

        let assembler = Arc::new(Mutex::new(FrameAssembler::default()));

        let runtime = Arc::new(SessionRuntime {
            transport: config.transport.clone(),
            video: video.clone(),
            audio,
            input: input.clone(),
            assembler: assembler.clone(),
            event_tx,
            overlay: overlay.clone(),
            hub,
            flags: flags.clone(),
            clock,
        });

        let supervisor = Supervisor {
            state: SessionState {
                is_streaming: true,
                session_init: true,
                inputs_ready: true,
                generation: 1,
                ..SessionState::default()
            },
            gate: LossGate::new(GateParams::baseline(config.settings.latency_mode)),
            loss_recovery: LossRecovery::new(),
            fsm: RecoveryFsm::new(),
            coordinator: RestartCoordinator::new(),
            watch: DegradedWatch::default(),
            transport: config.transport,
            video,
            input,
            assembler,
            overlay,
            flags,
            clock,
            latency_mode: config.settings.latency_mode,
            clamp_restart_bitrate: config.settings.clamp_soft_restart_bitrate,
            show_network_indicator: config.settings.show_network_indicator,
            resolution: config.settings.resolution,
            target_fps,
            last_diag: None,
            quit_banner_shown: false,
            stop_handled: false,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("farplay-supervisor".into())
            .spawn(move || supervisor.run(event_rx, tick_rx, loop_shutdown))
            .expect("spawn supervisor thread");

        info!(width, height, target_fps, "PIPE/session: streaming runtime started");
        Ok(StreamSession {
            runtime,
            supervisor: Mutex::new(Some(handle)),
            shutdown,
            finalize_lock: Mutex::new(false),
        })
    }

    /// Event entry points for the external session layer.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            runtime: self.runtime.clone(),
        }
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.runtime.hub.snapshot()
    }

    pub fn overlay(&self) -> OverlayState {
        self.runtime.overlay.snapshot(self.runtime.clock.now_us())
    }

    /// Renderer: draw the newest decoded frame if one is waiting.
    pub fn render_latest_frame(&self, render: impl FnOnce(&Picture)) -> bool {
        match self.runtime.video.take_latest_frame() {
            Some(picture) => {
                render(&picture);
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.runtime.flags.is_streaming.load(Ordering::SeqCst)
    }

    /// Ask the session to stop (same path as the exit combo).
    pub fn request_stop(&self) {
        self.runtime
            .flags
            .stop_requested
            .store(true, Ordering::SeqCst);
    }

    /// Tear everything down: stop workers, join threads. Safe to call
    /// once; `Drop` falls back to it.
    pub fn finalize(self) {
        self.finalize_inner();
    }

    fn finalize_inner(&self) {
        let mut finalized = self.finalize_lock.lock();
        if *finalized {
            return;
        }
        *finalized = true;

        self.runtime
            .flags
            .stop_requested
            .store(true, Ordering::SeqCst);
        self.runtime
            .flags
            .is_streaming
            .store(false, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);

        self.runtime.input.stop();
        self.runtime.video.stop();
        self.runtime.audio.stop();
        if let Some(handle) = self.supervisor.lock().take() {
            let _ = handle.join();
        }
        info!("PIPE/session: finalized");
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.finalize_inner();
    }
}

/// Cloneable event surface handed to the transport's receive threads.
#[derive(Clone)]
pub struct SessionHandle {
    runtime: Arc<SessionRuntime>,
}

struct RoutingSink<'a> {
    runtime: &'a SessionRuntime,
}

impl AssemblerSink for RoutingSink<'_> {
    fn on_frame(&mut self, frame: AssembledFrame) {
        self.runtime.video.submit(frame);
    }

    fn on_loss(&mut self, loss: LossEvent) {
        // Dropping a loss event under backpressure is acceptable; the
        // accumulators see the next one.
        let _ = self.runtime.event_tx.try_send(SupervisorEvent::Loss(loss));
    }

    fn on_gap_action(&mut self, action: GapAction) {
        self.runtime.transport.send_gap_report(&action);
    }
}

impl SessionEvents for SessionHandle {
    fn on_video_unit(&self, seq: SeqNum16, data: &[u8], frames_lost: u32, recovered: bool) {
        if !self.runtime.flags.is_streaming.load(Ordering::Relaxed) {
            return;
        }
        let now_ms = self.runtime.clock.now_ms();
        let mut sink = RoutingSink {
            runtime: &self.runtime,
        };
        self.runtime
            .assembler
            .lock()
            .push_unit(seq, data, frames_lost, recovered, now_ms, &mut sink);
    }

    fn on_audio_frame(&self, samples: &[i16]) {
        self.runtime.audio.submit(samples);
    }

    fn on_quit(&self, reason: QuitReason) {
        let _ = self.runtime.event_tx.send(SupervisorEvent::Quit(reason));
    }

    fn on_rumble(&self, left: u8, right: u8) {
        self.runtime.input.rumble(left, right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000;

    #[test]
    fn session_state_defaults() {
        let state = SessionState::default();
        assert!(!state.is_streaming);
        assert!(!state.fast_restart_active);
        assert_eq!(state.auto_reconnect_count, 0);
        assert_eq!(state.restart_cooloff_until_us, 0);
    }

    #[test]
    fn degraded_watch_engages_after_enough_low_ticks() {
        let mut watch = DegradedWatch::default();
        watch.arm(0);
        for i in 0..DEGRADED_ENGAGE_TICKS - 1 {
            assert!(!watch.observe(true, (i as u64 + 1) * SEC));
        }
        assert!(watch.observe(true, DEGRADED_ENGAGE_TICKS as u64 * SEC));
        // Engaging disarms.
        assert!(!watch.observe(true, 15 * SEC));
    }

    #[test]
    fn degraded_watch_ignores_healthy_ticks() {
        let mut watch = DegradedWatch::default();
        watch.arm(0);
        for i in 0..30 {
            assert!(!watch.observe(false, (i + 1) * SEC / 2));
        }
    }

    #[test]
    fn degraded_watch_expires() {
        let mut watch = DegradedWatch::default();
        watch.arm(0);
        // Past the 20 s watch window: the first observation disarms.
        assert!(!watch.observe(true, DEGRADED_WATCH_WINDOW_US + SEC));
        for i in 0..DEGRADED_ENGAGE_TICKS + 2 {
            assert!(!watch.observe(true, DEGRADED_WATCH_WINDOW_US + (i as u64 + 2) * SEC));
        }
    }

    #[test]
    fn unarmed_watch_never_engages() {
        let mut watch = DegradedWatch::default();
        for i in 0..20 {
            assert!(!watch.observe(true, i * SEC));
        }
    }
}
