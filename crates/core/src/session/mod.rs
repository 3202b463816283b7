//! Session-layer interfaces.
//!
//! The streaming runtime does not own a wire protocol: it starts from a
//! live session handle established by an external layer (pairing, MTU
//! probe, credential exchange all happen out there). This module defines
//! the capability set the runtime consumes:
//!
//! - [`SessionTransport`] — outbound control and data operations.
//! - [`SessionEvents`] — the inbound event surface the transport's receive
//!   thread drives.
//! - [`QuitReason`] — why a session ended, and whether a retry is allowed.
//! - [`DiagSnapshot`] — transport diagnostics, copied under `try_lock`.
//!
//! The runtime depends only on these traits and never on a concrete
//! transport implementation.

use std::time::Instant;

use crate::assembler::gap::GapAction;
use crate::config::Resolution;
use crate::error::Result;
use crate::input::ControllerSnapshot;
use crate::seq::SeqNum16;

/// Why the transport ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// Local user requested the stop.
    StoppedByUser,
    /// The console ended the session normally.
    SessionEnded,
    /// Another Remote Play session is already using the console.
    RemotePlayInUse,
    /// The console-side Remote Play service crashed.
    RemotePlayCrash,
    /// Client and console protocol versions do not match.
    VersionMismatch,
    /// The console no longer recognizes this client's registration.
    RegistrationFailed,
    /// The connection attempt timed out.
    ConnectionTimeout,
    /// The link dropped mid-stream.
    NetworkLost,
    /// Anything the transport could not classify.
    Unknown,
}

impl QuitReason {
    /// Whether an automatic reconnect is worth attempting.
    ///
    /// Fatal faults (service in use, crash, version/registration problems,
    /// a deliberate stop) are surfaced to the user instead.
    pub fn requires_retry(&self) -> bool {
        matches!(
            self,
            QuitReason::ConnectionTimeout | QuitReason::NetworkLost | QuitReason::Unknown
        )
    }

    /// Human-readable banner label.
    pub fn label(&self) -> &'static str {
        match self {
            QuitReason::StoppedByUser => "Stream stopped",
            QuitReason::SessionEnded => "Session ended by console",
            QuitReason::RemotePlayInUse => "Remote Play is in use by another device",
            QuitReason::RemotePlayCrash => "Remote Play crashed on the console",
            QuitReason::VersionMismatch => "Console firmware is not compatible",
            QuitReason::RegistrationFailed => "Registration rejected — pair this device again",
            QuitReason::ConnectionTimeout => "Connection timed out",
            QuitReason::NetworkLost => "Network connection lost",
            QuitReason::Unknown => "Connection closed unexpectedly",
        }
    }
}

/// Transport diagnostics counters, copied out under `try_lock`.
///
/// All counters are cumulative for the transport's lifetime; the video
/// pipeline diffs successive snapshots to detect progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagSnapshot {
    pub drop_events: u32,
    pub drop_packets: u32,
    pub av_missing_ref: u32,
    pub av_corrupt_burst: u32,
    pub av_fec_fail: u32,
    pub av_sendbuf_overflow: u32,
    pub av_last_corrupt_start: u16,
    pub av_last_corrupt_end: u16,
}

impl DiagSnapshot {
    /// Sum of the AV distress counters, for progress comparisons.
    pub fn av_total(&self) -> u64 {
        self.av_missing_ref as u64
            + self.av_corrupt_burst as u64
            + self.av_fec_fail as u64
            + self.av_sendbuf_overflow as u64
    }
}

/// Stream parameters for a soft restart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartProfile {
    pub bitrate_kbps: u32,
    pub resolution: Resolution,
    pub fps: u32,
}

/// Outbound operations the runtime needs from the session layer.
///
/// All methods are callable from any runtime thread. `send_controller` and
/// `send_gap_report` are fire-and-forget; the request methods return a
/// status but complete asynchronously on the transport side.
pub trait SessionTransport: Send + Sync {
    /// Forward the latest controller snapshot to the console.
    fn send_controller(&self, snapshot: &ControllerSnapshot);

    /// Ask the console for an instantaneous decoder refresh.
    fn request_idr(&self, reason: &str) -> Result<()>;

    /// Ask the console to renegotiate and restart the stream without
    /// tearing down the outer session.
    fn request_restart(&self, profile: &RestartProfile) -> Result<()>;

    /// Forward a retransmission gap report.
    fn send_gap_report(&self, action: &GapAction);

    /// Copy the diagnostics counters if the transport's diag mutex is
    /// uncontended. Must never block.
    fn diag_try_lock(&self) -> Option<DiagSnapshot>;
}

/// Inbound events the transport's receive thread delivers to the runtime.
///
/// Implemented by the runtime's session handle; the external session layer
/// calls these from its own threads.
pub trait SessionEvents: Send + Sync {
    /// An encoded video unit arrived. `frames_lost`/`recovered` come from
    /// the transport's FEC layer: how many frames preceding this unit were
    /// lost, and whether the reference chain was rebuilt without needing a
    /// fresh keyframe.
    fn on_video_unit(&self, seq: SeqNum16, data: &[u8], frames_lost: u32, recovered: bool);

    /// A decoded audio frame arrived (interleaved 16-bit PCM).
    fn on_audio_frame(&self, samples: &[i16]);

    /// The session ended.
    fn on_quit(&self, reason: QuitReason);

    /// The console requested actuator feedback.
    fn on_rumble(&self, left: u8, right: u8);
}

/// Cross-thread session flags.
///
/// The supervisor owns the full session state; these are the few bits the
/// other pipelines poll every iteration, published as atomics so no lock
/// sits on the 2 ms input path. Readers tolerate stale-by-one-tick values.
#[derive(Debug, Default)]
pub struct SessionFlags {
    /// A stream stop has been requested (user exit combo or supervisor).
    pub stop_requested: std::sync::atomic::AtomicBool,
    /// Controller gate: input sampling runs only while open.
    pub inputs_ready: std::sync::atomic::AtomicBool,
    /// Input loop shutdown flag; the supervisor sets it before joining.
    pub input_should_exit: std::sync::atomic::AtomicBool,
    /// A live stream is up (video flowing).
    pub is_streaming: std::sync::atomic::AtomicBool,
}

/// Monotonic session clock.
///
/// All supervisor/assembler timing is expressed as microseconds since the
/// session epoch so state machines stay pure functions of `now` and tests
/// can drive them without sleeping.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    epoch: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
