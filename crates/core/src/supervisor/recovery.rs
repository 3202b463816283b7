//! Staged recovery: keyframe → soft restart → guarded restart → cooldown.
//!
//! Three cooperating pieces, all driven by the supervisor and all pure
//! functions of `now`:
//!
//! - [`LossRecovery`] answers gate trips. Stage 1 is an IDR request only;
//!   a second trip inside the recovery window escalates to a decoder
//!   resync follow-up and re-arms at stage 1. Loss alone never restarts
//!   the stream.
//! - [`RecoveryFsm`] is the post-reconnect degraded-mode machine: when a
//!   restarted stream stays starved, it walks IDR → soft restart at a
//!   safer bitrate → one guarded escalation, and clears after two
//!   consecutive healthy windows. Every action is separated by at least
//!   the action cooldown.
//! - [`RestartCoordinator`] is the single path every restart goes
//!   through: it applies the skip/suppress/cooloff ladder, tracks
//!   per-source attempt counts, drives the bounded underlying retries,
//!   and starts the failure cooloff.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::session::{RestartProfile, SessionTransport};

use super::SessionState;

/// Gate trips within this window escalate to stage 2.
pub const RECOVERY_WINDOW_US: u64 = 8_000_000;

/// Minimum spacing between degraded-mode actions.
pub const ACTION_COOLDOWN_US: u64 = 2_000_000;

/// No restart while a loss-recovery action landed this recently.
pub const LOSS_ACTION_HOLDOFF_US: u64 = 10_000_000;

/// Cooloff after the underlying restart request ultimately fails.
pub const RESTART_FAILURE_COOLOFF_US: u64 = 5_000_000;

/// Automatic reconnects allowed per session.
pub const MAX_AUTO_RECONNECT_ATTEMPTS: u32 = 3;

/// Underlying restart attempts per coordinated restart.
pub const RESTART_UNDERLYING_ATTEMPTS: u32 = 2;

/// Delay between underlying restart attempts.
pub const RESTART_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Bitrate ceiling when `clamp_soft_restart_bitrate` is set.
pub const SOFT_RESTART_BITRATE_CLAMP_KBPS: u32 = 1500;

/// Bitrate for the degraded-mode "safer" soft restart.
pub const DEGRADED_RESTART_BITRATE_KBPS: u32 = 900;

/// Spacing before the guarded escalation may fire.
pub const ESCALATION_HOLDOFF_US: u64 = 8_000_000;

/// Low-FPS ticks (with progressing AV diagnostics) that engage the
/// degraded-mode FSM.
pub const DEGRADED_ENGAGE_TICKS: u32 = 12;

/// Window after a restart in which those ticks are counted.
pub const DEGRADED_WATCH_WINDOW_US: u64 = 20_000_000;

/// Healthy windows required to clear the degraded-mode FSM.
pub const HEALTHY_WINDOWS_TO_CLEAR: u32 = 2;

/// Incoming FPS at or above which a window counts as healthy.
pub const HEALTHY_FPS_FLOOR: u32 = 27;

/// Response to a loss-gate trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStageAction {
    /// Stage 1: ask for a keyframe, nothing else.
    RequestIdr,
    /// Stage 2: keyframe plus a decoder resync (forced output drops).
    DecoderResync,
}

/// Staged response to loss-gate trips inside the recovery window.
#[derive(Debug, Default)]
pub struct LossRecovery {
    window_start_us: Option<u64>,
    trips_in_window: u32,
    last_action_us: Option<u64>,
}

impl LossRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_gate_trip(&mut self, now_us: u64) -> GateStageAction {
        match self.window_start_us {
            Some(start) if now_us.saturating_sub(start) < RECOVERY_WINDOW_US => {}
            _ => {
                self.window_start_us = Some(now_us);
                self.trips_in_window = 0;
            }
        }
        self.trips_in_window += 1;
        self.last_action_us = Some(now_us);

        if self.trips_in_window >= 2 {
            self.window_start_us = None;
            self.trips_in_window = 0;
            GateStageAction::DecoderResync
        } else {
            GateStageAction::RequestIdr
        }
    }

    /// When the last loss-recovery action landed (for restart holdoff).
    pub fn last_action_us(&self) -> Option<u64> {
        self.last_action_us
    }

    /// Saturation path: back to a clean slate.
    pub fn reset(&mut self) {
        self.window_start_us = None;
        self.trips_in_window = 0;
    }
}

/// Degraded-mode stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryStage {
    #[default]
    Idle,
    IdrRequested,
    SoftRestarted,
    Escalated,
}

/// One health observation per metrics tick.
#[derive(Debug, Clone, Copy)]
pub struct HealthObservation {
    pub now_us: u64,
    /// `incoming_fps + 5 < target_fps`.
    pub low_fps: bool,
    /// `incoming_fps >= 27` and no AV distress.
    pub healthy: bool,
    /// Stale diag streak or progressing AV error counters under low FPS.
    pub av_distress: bool,
}

/// Restart guards the FSM must respect (owned by the coordinator/state).
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartGuards {
    pub in_cooloff: bool,
    pub source_backoff: bool,
}

/// What the degraded-mode FSM wants done this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedAction {
    None,
    SendIdr {
        hint: Option<&'static str>,
    },
    SoftRestart {
        bitrate_kbps: u32,
        hint: &'static str,
    },
    GuardedRestart {
        bitrate_kbps: u32,
        hint: &'static str,
    },
}

/// Post-reconnect degraded-mode state machine.
#[derive(Debug, Default)]
pub struct RecoveryFsm {
    pub stage: RecoveryStage,
    idr_attempts: u32,
    restart_attempts: u32,
    stable_windows: u32,
    last_action_us: Option<u64>,
    stage2_entered_us: Option<u64>,
}

impl RecoveryFsm {
    pub fn new() -> Self {
        Self::default()
    }

    fn cooled_down(&self, now_us: u64) -> bool {
        self.last_action_us
            .is_none_or(|t| now_us.saturating_sub(t) >= ACTION_COOLDOWN_US)
    }

    /// Engage from Idle (the supervisor's degraded watch fired).
    pub fn trigger(&mut self, now_us: u64) -> DegradedAction {
        if self.stage != RecoveryStage::Idle || !self.cooled_down(now_us) {
            return DegradedAction::None;
        }
        self.stage = RecoveryStage::IdrRequested;
        self.idr_attempts += 1;
        self.last_action_us = Some(now_us);
        info!("recovery: video references unstable, requesting IDR");
        DegradedAction::SendIdr {
            hint: Some("Video references unstable"),
        }
    }

    /// Advance on a metrics tick.
    pub fn tick(&mut self, obs: &HealthObservation, guards: &RestartGuards) -> DegradedAction {
        if obs.healthy {
            self.stable_windows += 1;
            if self.stage != RecoveryStage::Idle && self.stable_windows >= HEALTHY_WINDOWS_TO_CLEAR
            {
                debug!(windows = self.stable_windows, "recovery: cleared by healthy stream");
                self.clear();
            }
            return DegradedAction::None;
        }
        self.stable_windows = 0;

        match self.stage {
            RecoveryStage::Idle => DegradedAction::None,
            RecoveryStage::IdrRequested => {
                if !obs.av_distress || !self.cooled_down(obs.now_us) {
                    return DegradedAction::None;
                }
                if guards.in_cooloff || guards.source_backoff {
                    // Restart suppressed: fall back to another keyframe.
                    self.idr_attempts += 1;
                    self.last_action_us = Some(obs.now_us);
                    debug!(
                        in_cooloff = guards.in_cooloff,
                        source_backoff = guards.source_backoff,
                        "recovery: restart guarded, re-requesting IDR"
                    );
                    return DegradedAction::SendIdr { hint: None };
                }
                self.stage = RecoveryStage::SoftRestarted;
                self.restart_attempts += 1;
                self.last_action_us = Some(obs.now_us);
                self.stage2_entered_us = Some(obs.now_us);
                info!("recovery: rebuilding stream at safer bitrate");
                DegradedAction::SoftRestart {
                    bitrate_kbps: DEGRADED_RESTART_BITRATE_KBPS,
                    hint: "Rebuilding at safer bitrate",
                }
            }
            RecoveryStage::SoftRestarted => {
                let since_stage2 = self
                    .stage2_entered_us
                    .map(|t| obs.now_us.saturating_sub(t))
                    .unwrap_or(0);
                if since_stage2 >= ESCALATION_HOLDOFF_US
                    && self.restart_attempts <= 1
                    && obs.av_distress
                    && self.cooled_down(obs.now_us)
                    && !guards.in_cooloff
                    && !guards.source_backoff
                {
                    self.stage = RecoveryStage::Escalated;
                    self.restart_attempts += 1;
                    self.last_action_us = Some(obs.now_us);
                    warn!("recovery: persistent desync, guarded session rebuild");
                    return DegradedAction::GuardedRestart {
                        bitrate_kbps: DEGRADED_RESTART_BITRATE_KBPS,
                        hint: "Persistent desync — rebuilding session",
                    };
                }
                DegradedAction::None
            }
            RecoveryStage::Escalated => DegradedAction::None,
        }
    }

    pub fn clear(&mut self) {
        self.stage = RecoveryStage::Idle;
        self.stable_windows = 0;
        self.stage2_entered_us = None;
    }

    pub fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }
}

/// Outcome of a coordinated restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A stop is pending; nothing to do.
    Skipped,
    /// Automatic reconnect budget exhausted.
    Suppressed,
    /// A fast restart is already in flight; treated as success.
    AlreadyActive,
    /// Inside the failure cooloff; microseconds remaining.
    Blocked { remaining_us: u64 },
    /// A loss-recovery action landed too recently.
    CooldownSkip,
    /// The underlying request went out.
    Requested,
    /// All underlying attempts failed; cooloff started.
    Failed,
}

/// The single path every stream restart goes through.
#[derive(Debug, Default)]
pub struct RestartCoordinator {
    last_source: Option<String>,
    source_attempts: u32,
}

impl RestartCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts recorded for the current source label.
    pub fn source_attempts(&self) -> u32 {
        self.source_attempts
    }

    #[allow(clippy::too_many_arguments)]
    pub fn coordinate(
        &mut self,
        state: &mut SessionState,
        transport: &dyn SessionTransport,
        source: &str,
        mut profile: RestartProfile,
        clamp_bitrate: bool,
        user_initiated: bool,
        last_loss_action_us: Option<u64>,
        now_us: u64,
    ) -> RestartOutcome {
        if state.stop_requested {
            debug!(source, "restart skipped: stop requested");
            return RestartOutcome::Skipped;
        }
        if !user_initiated && state.auto_reconnect_count >= MAX_AUTO_RECONNECT_ATTEMPTS {
            warn!(
                source,
                attempts = state.auto_reconnect_count,
                "restart suppressed: auto-reconnect budget exhausted"
            );
            return RestartOutcome::Suppressed;
        }
        if state.fast_restart_active {
            debug!(source, "restart already active");
            return RestartOutcome::AlreadyActive;
        }
        if now_us < state.restart_cooloff_until_us {
            let remaining_us = state.restart_cooloff_until_us - now_us;
            info!(source, remaining_ms = remaining_us / 1_000, "restart blocked by cooloff");
            return RestartOutcome::Blocked { remaining_us };
        }
        if let Some(t) = last_loss_action_us {
            if now_us.saturating_sub(t) < LOSS_ACTION_HOLDOFF_US {
                debug!(source, "restart skipped: recent loss-recovery action");
                return RestartOutcome::CooldownSkip;
            }
        }

        // Same source label bumps the attempt counter; a new label resets.
        if self.last_source.as_deref() == Some(source) {
            self.source_attempts += 1;
        } else {
            self.last_source = Some(source.to_string());
            self.source_attempts = 1;
        }
        state.last_restart_source = Some(source.to_string());
        if user_initiated {
            state.auto_reconnect_count = 0;
        } else {
            state.auto_reconnect_count += 1;
        }

        if clamp_bitrate && profile.bitrate_kbps > SOFT_RESTART_BITRATE_CLAMP_KBPS {
            profile.bitrate_kbps = SOFT_RESTART_BITRATE_CLAMP_KBPS;
        }

        info!(
            source,
            attempt = self.source_attempts,
            bitrate_kbps = profile.bitrate_kbps,
            "requesting stream restart"
        );
        for attempt in 1..=RESTART_UNDERLYING_ATTEMPTS {
            match transport.request_restart(&profile) {
                Ok(()) => {
                    state.fast_restart_active = true;
                    state.generation += 1;
                    return RestartOutcome::Requested;
                }
                Err(e) => {
                    warn!(source, attempt, error = %e, "restart request failed");
                    if attempt < RESTART_UNDERLYING_ATTEMPTS {
                        std::thread::sleep(RESTART_RETRY_DELAY);
                    }
                }
            }
        }

        state.restart_cooloff_until_us = now_us + RESTART_FAILURE_COOLOFF_US;
        state.last_restart_failure_us = Some(now_us);
        RestartOutcome::Failed
    }
}
