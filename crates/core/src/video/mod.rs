//! Video pipeline: decode worker, pacing, and the per-second metrics tick.
//!
//! The pipeline exclusively owns the hardware decoder. Assembled frames
//! arrive from the receive path through a bounded queue (capacity
//! [`DECODE_QUEUE_CAPACITY`]); a dedicated worker drains it, paces output
//! against the display target, decodes, and publishes the newest picture
//! for the renderer. When the queue is full the *oldest* pending frame is
//! dropped — stalling the network receive path is never acceptable.
//!
//! Once per second the worker closes a metrics window: decode-time
//! aggregates, incoming/display FPS, the 3-sample bitrate ring, and a
//! `try_lock` copy of the transport diagnostics. The whole record is
//! published to the [`MetricsHub`] and a [`TickReport`] goes to the
//! supervisor, which runs its timed gates off that cadence.

pub mod decoder;
pub mod pacing;
pub mod scaling;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::assembler::AssembledFrame;
use crate::error::Result;
use crate::media::sps::SpsPatcher;
use crate::metrics::{BitrateRing, MetricsHub, StreamMetrics};
use crate::session::{DiagSnapshot, SessionClock, SessionTransport};
use decoder::{DecodeStatus, DecoderDriver, Picture, StagedDecoder};
use pacing::{PaceDecision, Pacer};
use scaling::ScaleMode;

/// Bounded encoded-frame queue depth.
pub const DECODE_QUEUE_CAPACITY: usize = 6;

/// Metrics window length.
const METRICS_WINDOW: Duration = Duration::from_secs(1);

/// How long a queue pop waits before the worker runs time-based upkeep.
const POP_TIMEOUT: Duration = Duration::from_millis(250);

/// Pipeline configuration derived from settings and stream negotiation.
#[derive(Debug, Clone, Copy)]
pub struct VideoConfig {
    pub target_fps: u32,
    pub negotiated_fps: u32,
    pub force_30fps: bool,
    pub scale_mode: ScaleMode,
    /// Emit a `Latency metrics —` log line per tick.
    pub show_latency: bool,
}

/// One metrics window, reported to the supervisor.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub now_us: u64,
    pub incoming_fps: u32,
    pub display_fps: u32,
    pub measured_bitrate_mbps: f64,
    pub windowed_bitrate_mbps: f64,
    /// `None` when the diag mutex was contended this tick.
    pub diag: Option<DiagSnapshot>,
    /// Consecutive contended ticks, including this one.
    pub stale_streak: u32,
}

enum PopOutcome {
    Frame(AssembledFrame),
    TimedOut,
    Closed,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<AssembledFrame>,
    closed: bool,
    drops: u32,
}

/// Bounded frame queue with drop-oldest backpressure.
struct DecodeQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl DecodeQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        }
    }

    fn push(&self, frame: AssembledFrame) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.frames.len() >= DECODE_QUEUE_CAPACITY {
            state.frames.pop_front();
            state.drops += 1;
        }
        state.frames.push_back(frame);
        self.cond.notify_one();
    }

    fn pop(&self, timeout: Duration) -> PopOutcome {
        let mut state = self.state.lock();
        let deadline = Instant::now() + timeout;
        while state.frames.is_empty() && !state.closed {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return PopOutcome::TimedOut;
            }
        }
        match state.frames.pop_front() {
            Some(frame) => PopOutcome::Frame(frame),
            None => PopOutcome::Closed,
        }
    }

    fn clear(&self) {
        self.state.lock().frames.clear();
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    fn drops(&self) -> u32 {
        self.state.lock().drops
    }
}

/// Latest decoded picture, single-slot.
///
/// The renderer is the only consumer; a publish over an unconsumed picture
/// bumps the overwrite counter.
struct FrameSlot {
    picture: Mutex<Option<Picture>>,
    overwrites: AtomicU32,
    /// Pictures the renderer consumed in the current metrics window.
    presented: AtomicU32,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            picture: Mutex::new(None),
            overwrites: AtomicU32::new(0),
            presented: AtomicU32::new(0),
        }
    }

    fn publish(&self, picture: Picture) {
        let mut slot = self.picture.lock();
        if slot.is_some() {
            self.overwrites.fetch_add(1, Ordering::Relaxed);
        }
        *slot = Some(picture);
    }

    fn take(&self) -> Option<Picture> {
        let picture = self.picture.lock().take();
        if picture.is_some() {
            self.presented.fetch_add(1, Ordering::Relaxed);
        }
        picture
    }
}

struct VideoShared {
    queue: DecodeQueue,
    slot: FrameSlot,
    pacer: Mutex<Pacer>,
    config: VideoConfig,
    clock: SessionClock,
    hub: Arc<MetricsHub>,
    transport: Arc<dyn SessionTransport>,
    tick_tx: Sender<TickReport>,
    running: AtomicBool,
    /// Re-arm the one-shot SPS patch (set across soft restarts).
    rearm_sps: AtomicBool,
}

/// The video pipeline: owns the decoder and its worker thread.
pub struct VideoPipeline {
    shared: Arc<VideoShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Bring up the decoder and start the worker.
    ///
    /// Decoder ladder failures propagate synchronously; nothing is left
    /// running on error.
    pub fn start(
        driver: Box<dyn DecoderDriver>,
        decoder_config: &decoder::DecoderConfig,
        config: VideoConfig,
        clock: SessionClock,
        hub: Arc<MetricsHub>,
        transport: Arc<dyn SessionTransport>,
        tick_tx: Sender<TickReport>,
    ) -> Result<Self> {
        let decoder = StagedDecoder::bring_up(driver, decoder_config)?;

        let shared = Arc::new(VideoShared {
            queue: DecodeQueue::new(),
            slot: FrameSlot::new(),
            pacer: Mutex::new(Pacer::new()),
            config,
            clock,
            hub,
            transport,
            tick_tx,
            running: AtomicBool::new(true),
            rearm_sps: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("farplay-decode".into())
            .spawn(move || decode_worker(worker_shared, decoder))
            .expect("spawn decode worker");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue an assembled frame. Called from the receive path; never
    /// blocks (drop-oldest on overflow).
    pub fn submit(&self, frame: AssembledFrame) {
        self.shared.queue.push(frame);
    }

    /// Newest decoded picture, if one is waiting. Renderer-only.
    pub fn take_latest_frame(&self) -> Option<Picture> {
        self.shared.slot.take()
    }

    /// Panel placement for a picture, honoring the configured scale mode.
    pub fn display_rect(&self, picture: &Picture) -> scaling::DisplayRect {
        scaling::layout(picture.width, picture.height, self.shared.config.scale_mode)
    }

    /// Supervisor: discard the next `n` frames (post-recovery resync).
    pub fn force_drops(&self, n: u32) {
        self.shared.pacer.lock().force_drops(n);
    }

    /// Flush queued frames and re-arm the one-shot SPS patch. Used across
    /// soft restarts: the renegotiated stream opens with fresh parameter
    /// sets.
    pub fn reset_for_restart(&self) {
        self.shared.queue.clear();
        self.shared.pacer.lock().reset();
        self.shared.rearm_sps.store(true, Ordering::Release);
        debug!("PIPE/video: reset for stream restart");
    }

    /// Stop the worker and tear the decoder down. Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.queue.close();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-window accumulators for the metrics tick.
#[derive(Default)]
struct TickWindow {
    incoming_frames: u32,
    incoming_bytes: u64,
    decode_total_us: u64,
    decode_max_us: u64,
    decode_count: u32,
}

fn decode_worker(shared: Arc<VideoShared>, mut decoder: StagedDecoder) {
    decoder.configure_worker_thread();

    let mut sps = SpsPatcher::new();
    let mut window = TickWindow::default();
    let mut window_started = Instant::now();
    let mut metrics = StreamMetrics {
        target_fps: shared.config.target_fps,
        negotiated_fps: shared.config.negotiated_fps,
        ..StreamMetrics::default()
    };
    let mut ring = BitrateRing::default();
    let mut incoming_fps_estimate = 0u32;
    let mut stale_streak = 0u32;

    loop {
        match shared.queue.pop(POP_TIMEOUT) {
            PopOutcome::Closed => break,
            PopOutcome::TimedOut => {}
            PopOutcome::Frame(frame) => {
                window.incoming_frames += 1;
                window.incoming_bytes += frame.data.len() as u64;

                if shared.rearm_sps.swap(false, Ordering::Acquire) {
                    sps = SpsPatcher::new();
                    shared.pacer.lock().reset();
                }

                let decimate =
                    shared.config.force_30fps || shared.config.target_fps < shared.config.negotiated_fps;
                let decision = shared.pacer.lock().next_frame(
                    shared.config.target_fps,
                    incoming_fps_estimate,
                    decimate,
                );
                if decision != PaceDecision::Present {
                    continue;
                }

                let data = match sps.maybe_patch(&frame.data) {
                    Some(patched) => patched,
                    None => frame.data,
                };

                let started = Instant::now();
                match decoder.decode(&data) {
                    Ok(DecodeStatus::Picture(mut picture)) => {
                        let decode_us = started.elapsed().as_micros() as u64;
                        picture.keyframe = frame.keyframe;
                        metrics.decode_time_us = decode_us;
                        window.decode_total_us += decode_us;
                        window.decode_max_us = window.decode_max_us.max(decode_us);
                        window.decode_count += 1;
                        shared.slot.publish(picture);
                    }
                    Ok(DecodeStatus::NoOutput) => {}
                    Ok(DecodeStatus::Busy) => {
                        debug!(seq = %frame.seq, "PIPE/video: decoder busy, frame skipped");
                    }
                    Err(e) => {
                        warn!(seq = %frame.seq, error = %e, "PIPE/video: decode error");
                    }
                }
            }
        }

        if window_started.elapsed() >= METRICS_WINDOW {
            window_started = Instant::now();
            let closed = std::mem::take(&mut window);
            incoming_fps_estimate = closed.incoming_frames;
            publish_tick(&shared, &mut metrics, &mut ring, &mut stale_streak, closed);
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
    }

    decoder.shutdown();
    debug!("PIPE/video: worker exited");
}

fn publish_tick(
    shared: &VideoShared,
    metrics: &mut StreamMetrics,
    ring: &mut BitrateRing,
    stale_streak: &mut u32,
    window: TickWindow,
) {
    metrics.measured_incoming_fps = window.incoming_frames;
    metrics.display_fps = shared.slot.presented.swap(0, Ordering::Relaxed);
    metrics.frame_overwrite_count = shared.slot.overwrites.load(Ordering::Relaxed);
    metrics.decode_queue_drops = shared.queue.drops();

    if window.decode_count > 0 {
        metrics.decode_avg_us = window.decode_total_us / window.decode_count as u64;
        metrics.decode_max_us = window.decode_max_us;
    } else {
        metrics.decode_avg_us = 0;
        metrics.decode_max_us = 0;
    }

    metrics.measured_bitrate_mbps = window.incoming_bytes as f64 * 8.0 / 1e6;
    ring.push(window.incoming_bytes, window.incoming_frames);
    let fps_for_ring = if window.incoming_frames > 0 {
        window.incoming_frames
    } else {
        shared.config.negotiated_fps
    };
    metrics.windowed_bitrate_mbps = ring.mbps(fps_for_ring).unwrap_or(0.0);

    let diag = shared.transport.diag_try_lock();
    match &diag {
        Some(snapshot) => {
            *stale_streak = 0;
            metrics.transport_drop_events = snapshot.drop_events;
            metrics.transport_drop_packets = snapshot.drop_packets;
            metrics.av_missing_ref_count = snapshot.av_missing_ref;
            metrics.av_corrupt_burst_count = snapshot.av_corrupt_burst;
            metrics.av_fec_fail_count = snapshot.av_fec_fail;
            metrics.av_sendbuf_overflow_count = snapshot.av_sendbuf_overflow;
            debug!(
                missing_ref = snapshot.av_missing_ref,
                corrupt_burst = snapshot.av_corrupt_burst,
                fec_fail = snapshot.av_fec_fail,
                sendbuf_overflow = snapshot.av_sendbuf_overflow,
                "AV diag — snapshot"
            );
        }
        None => {
            *stale_streak += 1;
            metrics.diag_trylock_failures += 1;
        }
    }
    metrics.av_diag_stale_streak = *stale_streak;

    if shared.config.show_latency {
        info!(
            incoming_fps = metrics.measured_incoming_fps,
            display_fps = metrics.display_fps,
            decode_avg_us = metrics.decode_avg_us,
            decode_max_us = metrics.decode_max_us,
            windowed_mbps = format_args!("{:.2}", metrics.windowed_bitrate_mbps),
            "Latency metrics — tick"
        );
    }

    shared.hub.publish(metrics.clone());

    let report = TickReport {
        now_us: shared.clock.now_us(),
        incoming_fps: metrics.measured_incoming_fps,
        display_fps: metrics.display_fps,
        measured_bitrate_mbps: metrics.measured_bitrate_mbps,
        windowed_bitrate_mbps: metrics.windowed_bitrate_mbps,
        diag,
        stale_streak: *stale_streak,
    };
    let _ = shared.tick_tx.send(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::gap::GapAction;
    use crate::error::StreamError;
    use crate::input::ControllerSnapshot;
    use crate::session::RestartProfile;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex as StdMutex;

    struct NullTransport {
        diag: StdMutex<Option<DiagSnapshot>>,
    }

    impl NullTransport {
        fn new() -> Self {
            Self {
                diag: StdMutex::new(Some(DiagSnapshot::default())),
            }
        }
    }

    impl SessionTransport for NullTransport {
        fn send_controller(&self, _snapshot: &ControllerSnapshot) {}
        fn request_idr(&self, _reason: &str) -> Result<()> {
            Ok(())
        }
        fn request_restart(&self, _profile: &RestartProfile) -> Result<()> {
            Err(StreamError::Transport("not supported".into()))
        }
        fn send_gap_report(&self, _action: &GapAction) {}
        fn diag_try_lock(&self) -> Option<DiagSnapshot> {
            *self.diag.lock().unwrap()
        }
    }

    struct CountingDriver;

    impl DecoderDriver for CountingDriver {
        fn bring_up(
            &mut self,
            _stage: decoder::DecoderStage,
            _config: &decoder::DecoderConfig,
        ) -> Result<()> {
            Ok(())
        }
        fn tear_down(&mut self, _stage: decoder::DecoderStage) {}
        fn decode(&mut self, access_unit: &[u8]) -> Result<DecodeStatus> {
            Ok(DecodeStatus::Picture(Picture {
                width: 960,
                height: 544,
                data: access_unit.to_vec(),
                keyframe: false,
            }))
        }
    }

    fn test_config() -> VideoConfig {
        VideoConfig {
            target_fps: 30,
            negotiated_fps: 30,
            force_30fps: false,
            scale_mode: ScaleMode::Preserve,
            show_latency: false,
        }
    }

    fn frame(seq: u16) -> AssembledFrame {
        AssembledFrame {
            seq: crate::seq::SeqNum16(seq),
            data: vec![0, 0, 0, 1, 0x41, seq as u8],
            frames_lost: 0,
            recovered: false,
            keyframe: false,
        }
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let q = DecodeQueue::new();
        for i in 0..(DECODE_QUEUE_CAPACITY as u16 + 2) {
            q.push(frame(i));
        }
        assert_eq!(q.drops(), 2);
        match q.pop(Duration::from_millis(10)) {
            PopOutcome::Frame(f) => assert_eq!(f.seq.0, 2),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn queue_pop_times_out_when_empty() {
        let q = DecodeQueue::new();
        assert!(matches!(
            q.pop(Duration::from_millis(5)),
            PopOutcome::TimedOut
        ));
    }

    #[test]
    fn queue_close_wakes_popper() {
        let q = Arc::new(DecodeQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(matches!(handle.join().unwrap(), PopOutcome::Closed));
    }

    #[test]
    fn slot_counts_overwrites_and_presents() {
        let slot = FrameSlot::new();
        let pic = Picture {
            width: 2,
            height: 2,
            data: vec![0; 6],
            keyframe: false,
        };
        slot.publish(pic.clone());
        slot.publish(pic.clone());
        assert_eq!(slot.overwrites.load(Ordering::Relaxed), 1);
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
        assert_eq!(slot.presented.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pipeline_decodes_submitted_frames() {
        let (tick_tx, _tick_rx) = unbounded();
        let pipeline = VideoPipeline::start(
            Box::new(CountingDriver),
            &decoder::DecoderConfig {
                width: 960,
                height: 544,
                max_ref_frames: 2,
            },
            test_config(),
            SessionClock::start(),
            Arc::new(MetricsHub::new()),
            Arc::new(NullTransport::new()),
            tick_tx,
        )
        .unwrap();

        pipeline.submit(frame(0));
        let deadline = Instant::now() + Duration::from_secs(2);
        let picture = loop {
            if let Some(p) = pipeline.take_latest_frame() {
                break p;
            }
            assert!(Instant::now() < deadline, "no picture decoded in time");
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(picture.width, 960);
        pipeline.stop();
    }

    #[test]
    fn forced_drops_discard_frames() {
        let (tick_tx, _tick_rx) = unbounded();
        let pipeline = VideoPipeline::start(
            Box::new(CountingDriver),
            &decoder::DecoderConfig {
                width: 960,
                height: 544,
                max_ref_frames: 2,
            },
            test_config(),
            SessionClock::start(),
            Arc::new(MetricsHub::new()),
            Arc::new(NullTransport::new()),
            tick_tx,
        )
        .unwrap();

        pipeline.force_drops(1);
        pipeline.submit(frame(0));
        thread::sleep(Duration::from_millis(100));
        assert!(pipeline.take_latest_frame().is_none());

        pipeline.submit(frame(1));
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if pipeline.take_latest_frame().is_some() {
                break;
            }
            assert!(Instant::now() < deadline, "second frame never decoded");
            thread::sleep(Duration::from_millis(5));
        }
        pipeline.stop();
    }
}
