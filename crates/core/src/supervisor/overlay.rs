//! Overlay state shared with the renderer.
//!
//! The supervisor is the only writer; the renderer polls
//! [`OverlayHub::snapshot`] once per drawn frame. Everything here is
//! plain data with expiry timestamps — the renderer decides presentation.
//!
//! Three surfaces:
//!
//! - the *banner*: disconnect reason + whether a retry is running;
//! - *hints*: short status lines (info or error); an error hint also sets
//!   the modal popup text, cleared on the next user interaction;
//! - ambient flags: connection stage, poor-network indicator, and the
//!   brief exit-combo hint at stream start.

use parking_lot::RwLock;
use tracing::debug;

use crate::session::QuitReason;

/// Banner display time.
pub const BANNER_DURATION_US: u64 = 3_000_000;

/// Hint display time.
pub const HINT_DURATION_US: u64 = 5_000_000;

/// Exit-combo hint display time at stream start.
pub const EXIT_HINT_DURATION_US: u64 = 4_000_000;

/// Where the session currently is, for the connect/reconnect overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStage {
    #[default]
    Idle,
    Searching,
    Registering,
    Negotiating,
    Streaming,
    Reconnecting,
}

/// Disconnect banner contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub text: String,
    pub requires_retry: bool,
    pub until_us: u64,
}

/// A short status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub text: String,
    pub error: bool,
    pub until_us: u64,
}

/// Snapshot handed to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayState {
    pub stage: ConnectionStage,
    pub banner: Option<Banner>,
    pub hint: Option<Hint>,
    /// Modal popup text, set by error hints, cleared on interaction.
    pub popup: Option<String>,
    pub poor_network: bool,
    /// Exit-combo reminder shown briefly at stream start.
    pub exit_hint_until_us: Option<u64>,
}

/// Single-writer overlay state.
#[derive(Debug, Default)]
pub struct OverlayHub {
    state: RwLock<OverlayState>,
}

impl OverlayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stage(&self, stage: ConnectionStage) {
        let mut state = self.state.write();
        if state.stage != stage {
            debug!(?stage, "overlay: connection stage");
            state.stage = stage;
        }
    }

    /// Translate a quit reason into the disconnect banner.
    pub fn set_banner(&self, reason: QuitReason, now_us: u64) {
        let banner = Banner {
            text: reason.label().to_string(),
            requires_retry: reason.requires_retry(),
            until_us: now_us + BANNER_DURATION_US,
        };
        self.state.write().banner = Some(banner);
    }

    /// Post a status hint. Error hints also raise the modal popup.
    pub fn set_hint(&self, text: &str, error: bool, now_us: u64) {
        let mut state = self.state.write();
        state.hint = Some(Hint {
            text: text.to_string(),
            error,
            until_us: now_us + HINT_DURATION_US,
        });
        if error {
            state.popup = Some(text.to_string());
        }
    }

    /// Clear the modal popup (next user interaction).
    pub fn clear_popup(&self) {
        self.state.write().popup = None;
    }

    pub fn set_poor_network(&self, poor: bool) {
        self.state.write().poor_network = poor;
    }

    /// Show the exit-combo reminder.
    pub fn show_exit_hint(&self, now_us: u64) {
        self.state.write().exit_hint_until_us = Some(now_us + EXIT_HINT_DURATION_US);
    }

    /// Current state with expired banner/hints pruned.
    pub fn snapshot(&self, now_us: u64) -> OverlayState {
        let mut state = self.state.read().clone();
        if state.banner.as_ref().is_some_and(|b| now_us >= b.until_us) {
            state.banner = None;
        }
        if state.hint.as_ref().is_some_and(|h| now_us >= h.until_us) {
            state.hint = None;
        }
        if state.exit_hint_until_us.is_some_and(|t| now_us >= t) {
            state.exit_hint_until_us = None;
        }
        state
    }
}
