//! PS-button dual-mode interception.
//!
//! With dual mode enabled the PS button is intercepted locally by default:
//! pressing it does not immediately reach the console. A tap (press then
//! release) arms a [`SECOND_TAP_WINDOW_MS`] window:
//!
//! - a second press inside the window releases the intercept while held —
//!   the press is local (system menu) and nothing goes to the console;
//! - if the window expires with no second press, a single remote PS tap
//!   is emitted.
//!
//! Disabling dual mode mid-session cancels any armed state cleanly; the
//! button then behaves as a plain mapped button.

/// Double-tap detection window.
pub const SECOND_TAP_WINDOW_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// First tap seen; waiting for a second press.
    WaitingSecondTap { deadline_ms: u64 },
    /// Second press active: the button is local while held.
    Passthrough,
}

/// What the input loop should do with the PS button this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsVerdict {
    /// Nothing to forward.
    Silent,
    /// Emit one remote PS tap (the window expired on a single tap).
    RemoteTap,
    /// The press is being handled locally.
    LocalHeld,
}

/// Three-state PS-button FSM.
#[derive(Debug)]
pub struct PsButtonFsm {
    state: State,
    prev_pressed: bool,
}

impl PsButtonFsm {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            prev_pressed: false,
        }
    }

    /// Advance one input tick. `pressed` is whether any input mapped to
    /// the PS output is currently active.
    pub fn tick(&mut self, pressed: bool, now_ms: u64) -> PsVerdict {
        let released = self.prev_pressed && !pressed;
        let pressed_edge = !self.prev_pressed && pressed;
        self.prev_pressed = pressed;

        match self.state {
            State::Idle => {
                if released {
                    self.state = State::WaitingSecondTap {
                        deadline_ms: now_ms + SECOND_TAP_WINDOW_MS,
                    };
                }
                PsVerdict::Silent
            }
            State::WaitingSecondTap { deadline_ms } => {
                if pressed_edge {
                    self.state = State::Passthrough;
                    PsVerdict::LocalHeld
                } else if now_ms >= deadline_ms {
                    self.state = State::Idle;
                    PsVerdict::RemoteTap
                } else {
                    PsVerdict::Silent
                }
            }
            State::Passthrough => {
                if pressed {
                    PsVerdict::LocalHeld
                } else {
                    self.state = State::Idle;
                    PsVerdict::Silent
                }
            }
        }
    }

    /// Drop any armed state (dual mode disabled mid-session).
    pub fn cancel(&mut self) {
        self.state = State::Idle;
    }
}

impl Default for PsButtonFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tap_emits_remote_after_window() {
        let mut fsm = PsButtonFsm::new();
        assert_eq!(fsm.tick(true, 0), PsVerdict::Silent);
        assert_eq!(fsm.tick(false, 10), PsVerdict::Silent); // arms window
        assert_eq!(fsm.tick(false, 200), PsVerdict::Silent);
        assert_eq!(fsm.tick(false, 311), PsVerdict::RemoteTap);
        assert_eq!(fsm.tick(false, 320), PsVerdict::Silent);
    }

    #[test]
    fn double_tap_goes_local_while_held() {
        let mut fsm = PsButtonFsm::new();
        fsm.tick(true, 0);
        fsm.tick(false, 10);
        assert_eq!(fsm.tick(true, 100), PsVerdict::LocalHeld);
        assert_eq!(fsm.tick(true, 400), PsVerdict::LocalHeld);
        assert_eq!(fsm.tick(false, 500), PsVerdict::Silent);
        // No remote tap ever fires for the double-tap sequence.
        assert_eq!(fsm.tick(false, 900), PsVerdict::Silent);
    }

    #[test]
    fn second_press_on_deadline_tick_still_counts() {
        let mut fsm = PsButtonFsm::new();
        fsm.tick(true, 0);
        fsm.tick(false, 10);
        // Deadline is 310; the press edge wins over expiry on the same tick.
        assert_eq!(fsm.tick(true, 310), PsVerdict::LocalHeld);
    }

    #[test]
    fn cancel_clears_armed_window() {
        let mut fsm = PsButtonFsm::new();
        fsm.tick(true, 0);
        fsm.tick(false, 10);
        fsm.cancel();
        assert_eq!(fsm.tick(false, 400), PsVerdict::Silent);
    }
}
