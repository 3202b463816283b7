//! Loss accounting and the gate that arms staged recovery.
//!
//! Two saturating counters track declared losses against wall time:
//!
//! - the *window* counter accumulates `(event_count, frame_accum)` over
//!   `window_us`;
//! - the *burst* counter accumulates `frame_accum` over the much shorter
//!   `burst_window_us`.
//!
//! The gate trips when the burst accumulator crosses its threshold, or
//! when the window sees both enough events *and* enough lost frames. A
//! trip resets both counters, so recovery actions for one trip always
//! land before the next trip can re-arm.
//!
//! Counters saturate at the 32-bit max; saturation is a one-shot event
//! that forces the recovery-reset path instead of tripping normally.
//!
//! Gate parameters come from the latency mode baseline, bent by measured
//! conditions (bitrate vs. target, FPS vs. target) within documented
//! clamp ranges.

use tracing::warn;

use crate::config::LatencyMode;

/// Measured-bitrate ratio below which the gate tightens.
pub const STUCK_BITRATE_RATIO: f64 = 0.85;

/// Measured-bitrate ratio above which the gate loosens.
pub const CASCADE_ALARM_RATIO: f64 = 1.20;

const EVENT_THRESHOLD_MIN: u32 = 1;
const EVENT_THRESHOLD_MAX: u32 = 8;
const FRAME_THRESHOLD_MIN: u32 = 3;
const FRAME_THRESHOLD_MAX: u32 = 24;
const WINDOW_MIN_US: u64 = 4_000_000;
const WINDOW_MAX_US: u64 = 16_000_000;
const BURST_WINDOW_MIN_US: u64 = 120_000;
const BURST_WINDOW_MAX_US: u64 = 400_000;
const BURST_THRESHOLD_MIN: u32 = 2;
const BURST_THRESHOLD_MAX: u32 = 12;

/// Loss-gate tuning for one latency mode under current conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateParams {
    pub window_us: u64,
    /// Losses smaller than this do not count as window *events* (their
    /// frames still accumulate).
    pub min_frames: u32,
    pub event_threshold: u32,
    pub frame_threshold: u32,
    pub burst_window_us: u64,
    pub burst_frame_threshold: u32,
}

/// Measured stream conditions feeding the parameter adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasuredConditions {
    pub measured_bitrate_mbps: f64,
    pub target_bitrate_mbps: f64,
    pub measured_fps: u32,
    pub target_fps: u32,
    /// Soft-restart retries already spent this session.
    pub prior_retries: u32,
}

impl GateParams {
    /// Baseline parameters per latency mode.
    pub fn baseline(mode: LatencyMode) -> GateParams {
        match mode {
            LatencyMode::UltraLow => GateParams {
                window_us: 6_000_000,
                min_frames: 2,
                event_threshold: 2,
                frame_threshold: 6,
                burst_window_us: 180_000,
                burst_frame_threshold: 4,
            },
            LatencyMode::Low => GateParams {
                window_us: 7_000_000,
                min_frames: 2,
                event_threshold: 3,
                frame_threshold: 8,
                burst_window_us: 200_000,
                burst_frame_threshold: 4,
            },
            LatencyMode::Balanced => GateParams {
                window_us: 8_000_000,
                min_frames: 3,
                event_threshold: 3,
                frame_threshold: 9,
                burst_window_us: 220_000,
                burst_frame_threshold: 5,
            },
            LatencyMode::High => GateParams {
                window_us: 10_000_000,
                min_frames: 3,
                event_threshold: 4,
                frame_threshold: 12,
                burst_window_us: 260_000,
                burst_frame_threshold: 6,
            },
            LatencyMode::Max => GateParams {
                window_us: 12_000_000,
                min_frames: 4,
                event_threshold: 5,
                frame_threshold: 15,
                burst_window_us: 300_000,
                burst_frame_threshold: 8,
            },
        }
    }

    /// Baseline bent by measured conditions, clamped to the documented
    /// ranges.
    pub fn adjusted(mode: LatencyMode, conditions: &MeasuredConditions) -> GateParams {
        let mut p = Self::baseline(mode);

        if conditions.target_bitrate_mbps > 0.0 {
            let ratio = conditions.measured_bitrate_mbps / conditions.target_bitrate_mbps;
            if ratio <= STUCK_BITRATE_RATIO {
                // Starved stream: loss is expected noise, demand more
                // evidence before acting.
                p.event_threshold += 1;
                p.frame_threshold += 3;
                p.window_us += 2_000_000;
            } else if ratio >= CASCADE_ALARM_RATIO {
                // Overdelivering stream that still loses frames: act fast.
                p.event_threshold = p.event_threshold.saturating_sub(1);
                p.frame_threshold = p.frame_threshold.saturating_sub(3);
                p.window_us = p.window_us.saturating_sub(2_000_000);
                p.burst_window_us = p.burst_window_us.saturating_sub(40_000);
            }
        }

        if conditions.target_fps > 0 && conditions.measured_fps <= conditions.target_fps {
            p.event_threshold += 1;
            p.frame_threshold += 2;
            p.burst_frame_threshold += 1;
        }

        if mode == LatencyMode::UltraLow && conditions.prior_retries == 0 {
            p.event_threshold = p.event_threshold.saturating_sub(1);
        }

        p.event_threshold = p
            .event_threshold
            .clamp(EVENT_THRESHOLD_MIN, EVENT_THRESHOLD_MAX);
        p.frame_threshold = p
            .frame_threshold
            .clamp(FRAME_THRESHOLD_MIN, FRAME_THRESHOLD_MAX);
        p.window_us = p.window_us.clamp(WINDOW_MIN_US, WINDOW_MAX_US);
        p.burst_window_us = p
            .burst_window_us
            .clamp(BURST_WINDOW_MIN_US, BURST_WINDOW_MAX_US);
        p.burst_frame_threshold = p
            .burst_frame_threshold
            .clamp(BURST_THRESHOLD_MIN, BURST_THRESHOLD_MAX);
        p
    }
}

/// A wall-time-windowed saturating counter.
#[derive(Debug, Default)]
pub struct SlidingCounter {
    window_us: u64,
    window_start_us: Option<u64>,
    pub event_count: u32,
    pub frame_accum: u32,
    saturated_once: bool,
}

impl SlidingCounter {
    pub fn new(window_us: u64) -> Self {
        Self {
            window_us,
            ..Self::default()
        }
    }

    pub fn set_window(&mut self, window_us: u64) {
        self.window_us = window_us;
    }

    /// Record a loss. Returns `true` exactly once when a counter
    /// saturates at the 32-bit max.
    pub fn observe(&mut self, frames: u32, count_event: bool, now_us: u64) -> bool {
        match self.window_start_us {
            Some(start) if now_us.saturating_sub(start) < self.window_us => {}
            _ => {
                self.window_start_us = Some(now_us);
                self.event_count = 0;
                self.frame_accum = 0;
            }
        }

        if count_event {
            self.event_count = self.event_count.saturating_add(1);
        }
        self.frame_accum = self.frame_accum.saturating_add(frames);

        let saturated = self.event_count == u32::MAX || self.frame_accum == u32::MAX;
        if saturated && !self.saturated_once {
            self.saturated_once = true;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.window_start_us = None;
        self.event_count = 0;
        self.frame_accum = 0;
    }
}

/// What a loss observation amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    None,
    /// A threshold crossed; staged recovery should act.
    Trip,
    /// A counter saturated; reset everything and re-enter recovery at
    /// Idle.
    SaturationReset,
}

/// The loss gate: window + burst accumulators against current params.
#[derive(Debug)]
pub struct LossGate {
    params: GateParams,
    window: SlidingCounter,
    burst: SlidingCounter,
}

impl LossGate {
    pub fn new(params: GateParams) -> Self {
        Self {
            params,
            window: SlidingCounter::new(params.window_us),
            burst: SlidingCounter::new(params.burst_window_us),
        }
    }

    pub fn params(&self) -> GateParams {
        self.params
    }

    /// Re-tune without losing accumulated state.
    pub fn set_params(&mut self, params: GateParams) {
        self.params = params;
        self.window.set_window(params.window_us);
        self.burst.set_window(params.burst_window_us);
    }

    pub fn on_loss(&mut self, frames_lost: u32, now_us: u64) -> GateOutcome {
        let count_event = frames_lost >= self.params.min_frames;
        let sat_window = self.window.observe(frames_lost, count_event, now_us);
        let sat_burst = self.burst.observe(frames_lost, false, now_us);
        if sat_window || sat_burst {
            warn!("loss accumulator saturated; forcing recovery reset");
            self.reset();
            return GateOutcome::SaturationReset;
        }

        let burst_trip = self.burst.frame_accum >= self.params.burst_frame_threshold;
        let window_trip = self.window.event_count >= self.params.event_threshold
            && self.window.frame_accum >= self.params.frame_threshold;
        if burst_trip || window_trip {
            self.reset();
            GateOutcome::Trip
        } else {
            GateOutcome::None
        }
    }

    pub fn reset(&mut self) {
        self.window.reset();
        self.burst.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000;

    #[test]
    fn balanced_baseline_matches_documented_profile() {
        let p = GateParams::baseline(LatencyMode::Balanced);
        assert_eq!(p.window_us, 8_000_000);
        assert_eq!(p.event_threshold, 3);
        assert_eq!(p.frame_threshold, 9);
        assert_eq!(p.burst_window_us, 220_000);
        assert_eq!(p.burst_frame_threshold, 5);
    }

    #[test]
    fn gate_trips_on_third_of_three_bursty_losses() {
        // Balanced profile; [lost=3, lost=3, lost=3] within 600 ms trips
        // on the third event and not before.
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        assert_eq!(gate.on_loss(3, 0), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 300 * MS), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 600 * MS), GateOutcome::Trip);
        // Trip reset the counters: the next loss starts from zero.
        assert_eq!(gate.on_loss(3, 700 * MS), GateOutcome::None);
    }

    #[test]
    fn burst_gate_trips_on_dense_loss() {
        // Two losses inside one 220 ms burst window cross the burst
        // threshold regardless of the event count.
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        assert_eq!(gate.on_loss(3, 0), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 100 * MS), GateOutcome::Trip);
    }

    #[test]
    fn window_gate_needs_events_and_frames() {
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        // Three events spread past the burst window; frames 3+3+3 = 9
        // meets the frame threshold and events reach 3.
        assert_eq!(gate.on_loss(3, 0), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 500 * MS), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 1_000 * MS), GateOutcome::Trip);
    }

    #[test]
    fn small_losses_do_not_count_as_events() {
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        // min_frames = 3: lost=1 events never satisfy the event count.
        for i in 0..8 {
            // Spread beyond the burst window so the burst gate stays cold.
            assert_eq!(gate.on_loss(1, i * 500 * MS), GateOutcome::None);
        }
    }

    #[test]
    fn window_expiry_resets_accumulation() {
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        assert_eq!(gate.on_loss(3, 0), GateOutcome::None);
        assert_eq!(gate.on_loss(3, 1_000 * MS), GateOutcome::None);
        // 9 s later: outside the 8 s window, counters restart.
        assert_eq!(gate.on_loss(3, 10_000 * MS), GateOutcome::None);
    }

    #[test]
    fn saturation_is_one_shot_reset() {
        let mut gate = LossGate::new(GateParams::baseline(LatencyMode::Balanced));
        assert_eq!(gate.on_loss(u32::MAX, 0), GateOutcome::SaturationReset);
        // After the forced reset the gate behaves normally again (the
        // one-shot already fired; a second saturating add trips like an
        // ordinary huge loss).
        assert_eq!(gate.on_loss(u32::MAX, 100 * MS), GateOutcome::Trip);
    }

    #[test]
    fn tighten_when_bitrate_stuck() {
        let base = GateParams::baseline(LatencyMode::Balanced);
        let adjusted = GateParams::adjusted(
            LatencyMode::Balanced,
            &MeasuredConditions {
                measured_bitrate_mbps: 2.0,
                target_bitrate_mbps: 2.6,
                measured_fps: 60,
                target_fps: 30,
                prior_retries: 0,
            },
        );
        assert!(adjusted.event_threshold > base.event_threshold);
        assert!(adjusted.frame_threshold > base.frame_threshold);
        assert!(adjusted.window_us > base.window_us);
    }

    #[test]
    fn loosen_when_bitrate_overshoots() {
        let base = GateParams::baseline(LatencyMode::Balanced);
        let adjusted = GateParams::adjusted(
            LatencyMode::Balanced,
            &MeasuredConditions {
                measured_bitrate_mbps: 3.5,
                target_bitrate_mbps: 2.6,
                measured_fps: 60,
                target_fps: 30,
                prior_retries: 0,
            },
        );
        assert!(adjusted.event_threshold < base.event_threshold);
        assert!(adjusted.frame_threshold < base.frame_threshold);
        assert!(adjusted.window_us < base.window_us);
        assert!(adjusted.burst_window_us < base.burst_window_us);
    }

    #[test]
    fn low_fps_raises_thresholds() {
        let base = GateParams::baseline(LatencyMode::Balanced);
        let adjusted = GateParams::adjusted(
            LatencyMode::Balanced,
            &MeasuredConditions {
                measured_bitrate_mbps: 2.6,
                target_bitrate_mbps: 2.6,
                measured_fps: 25,
                target_fps: 30,
                prior_retries: 0,
            },
        );
        assert_eq!(adjusted.event_threshold, base.event_threshold + 1);
        assert_eq!(adjusted.frame_threshold, base.frame_threshold + 2);
        assert_eq!(adjusted.burst_frame_threshold, base.burst_frame_threshold + 1);
    }

    #[test]
    fn ultralow_first_session_is_hair_triggered() {
        let adjusted = GateParams::adjusted(
            LatencyMode::UltraLow,
            &MeasuredConditions {
                measured_bitrate_mbps: 1.2,
                target_bitrate_mbps: 1.2,
                measured_fps: 60,
                target_fps: 30,
                prior_retries: 0,
            },
        );
        assert_eq!(adjusted.event_threshold, 1);

        let with_retries = GateParams::adjusted(
            LatencyMode::UltraLow,
            &MeasuredConditions {
                measured_bitrate_mbps: 1.2,
                target_bitrate_mbps: 1.2,
                measured_fps: 60,
                target_fps: 30,
                prior_retries: 1,
            },
        );
        assert_eq!(with_retries.event_threshold, 2);
    }

    #[test]
    fn adjustments_clamp_to_ranges() {
        // Pile every tightening adjustment on the widest profile.
        let adjusted = GateParams::adjusted(
            LatencyMode::Max,
            &MeasuredConditions {
                measured_bitrate_mbps: 0.1,
                target_bitrate_mbps: 3.8,
                measured_fps: 10,
                target_fps: 30,
                prior_retries: 0,
            },
        );
        assert!(adjusted.event_threshold <= EVENT_THRESHOLD_MAX);
        assert!(adjusted.frame_threshold <= FRAME_THRESHOLD_MAX);
        assert!(adjusted.window_us <= WINDOW_MAX_US);
    }
}
