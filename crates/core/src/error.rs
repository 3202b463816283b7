//! Error types for the streaming runtime.

use crate::session::QuitReason;
use crate::video::decoder::DecoderStage;

/// Errors that can occur in the streaming runtime.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Config**: [`Io`](Self::Io), [`ConfigParse`](Self::ConfigParse) —
///   settings file could not be read or parsed.
/// - **Decoder**: [`Decoder`](Self::Decoder) — hardware decoder bring-up
///   failed at a named ladder stage.
/// - **Session**: [`SessionFault`](Self::SessionFault) — the transport quit
///   with a fatal reason; [`Transport`](Self::Transport) — a control request
///   to the session layer was refused.
/// - **Lifecycle**: [`AlreadyStreaming`](Self::AlreadyStreaming),
///   [`NotStreaming`](Self::NotStreaming), [`QueueClosed`](Self::QueueClosed).
///
/// Transient network distress (drops, missing references, FEC failures) is
/// never an error — it is counted and fed to the recovery state machine.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O error (config file, log destination).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file did not parse as valid TOML.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Decoder bring-up failed at the given ladder stage. Stages already
    /// reached have been torn down before this is returned.
    #[error("decoder init failed at stage {stage:?}")]
    Decoder { stage: DecoderStage },

    /// A control request (IDR, restart) was refused by the session layer.
    #[error("transport request failed: {0}")]
    Transport(String),

    /// The transport quit with a reason that does not permit retry.
    #[error("session fault: {}", reason.label())]
    SessionFault { reason: QuitReason },

    /// A session is already running for this context.
    #[error("session already streaming")]
    AlreadyStreaming,

    /// Operation requires a live session.
    #[error("no active stream")]
    NotStreaming,

    /// A worker queue was closed before the operation completed.
    #[error("worker queue closed")]
    QueueClosed,
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
