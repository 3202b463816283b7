//! Retransmission gap reports.
//!
//! When the reorder window has a hole, the assembler asks the session
//! transport to retransmit the missing range. Only one range is pending at
//! a time; the transport is told about it through three actions:
//!
//! - `SetPending` — open a new pending range with a deadline.
//! - `ExtendPending` — the same hole grew (overlapping/adjacent range);
//!   the pending range becomes the merge.
//! - `FlushPrevious` — give up on the pending range. Emitted when a
//!   disjoint hole appears (followed by a fresh `SetPending`), when a
//!   keyframe arrives (the range no longer matters), or when the grace
//!   deadline expires.
//!
//! The grace Δ defaults to 12 ms: long enough for ordinary UDP reordering
//! to resolve itself, short enough not to stall the decode path.

use crate::seq::SeqNum16;

/// Default grace period before a pending gap is flushed.
pub const DEFAULT_GAP_GRACE_MS: u64 = 12;

/// An action the transport should take for a retransmission range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapAction {
    SetPending {
        start: SeqNum16,
        end: SeqNum16,
        deadline_ms: u64,
    },
    ExtendPending {
        start: SeqNum16,
        end: SeqNum16,
    },
    FlushPrevious {
        start: SeqNum16,
        end: SeqNum16,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingGap {
    start: SeqNum16,
    end: SeqNum16,
    deadline_ms: u64,
}

impl PendingGap {
    /// Overlapping or adjacent in modular sequence order.
    fn touches(&self, start: SeqNum16, end: SeqNum16) -> bool {
        // Disjoint iff the new range begins after end+1 or ends before start-1.
        let after = start.dist(self.end.next()) > 0;
        let before = self.start.dist(end.next()) > 0;
        !(after || before)
    }

    fn merge(&mut self, start: SeqNum16, end: SeqNum16) {
        if start.precedes(self.start) {
            self.start = start;
        }
        if self.end.precedes(end) {
            self.end = end;
        }
    }
}

/// Gap-report state machine: idle → pending → extended → flushed.
#[derive(Debug)]
pub struct GapReporter {
    grace_ms: u64,
    pending: Option<PendingGap>,
}

impl GapReporter {
    pub fn new(grace_ms: u64) -> Self {
        Self {
            grace_ms,
            pending: None,
        }
    }

    /// Whether a range is currently pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Report a batch of missing sequence numbers `[start, end]`.
    ///
    /// Appends the resulting actions to `out` (a disjoint range produces a
    /// flush *and* a new set-pending).
    pub fn update(
        &mut self,
        start: SeqNum16,
        end: SeqNum16,
        now_ms: u64,
        out: &mut Vec<GapAction>,
    ) {
        self.poll(now_ms, out);

        match &mut self.pending {
            Some(gap) if gap.touches(start, end) => {
                gap.merge(start, end);
                out.push(GapAction::ExtendPending {
                    start: gap.start,
                    end: gap.end,
                });
            }
            Some(gap) => {
                out.push(GapAction::FlushPrevious {
                    start: gap.start,
                    end: gap.end,
                });
                let gap = PendingGap {
                    start,
                    end,
                    deadline_ms: now_ms + self.grace_ms,
                };
                self.pending = Some(gap);
                out.push(GapAction::SetPending {
                    start,
                    end,
                    deadline_ms: gap.deadline_ms,
                });
            }
            None => {
                let gap = PendingGap {
                    start,
                    end,
                    deadline_ms: now_ms + self.grace_ms,
                };
                self.pending = Some(gap);
                out.push(GapAction::SetPending {
                    start,
                    end,
                    deadline_ms: gap.deadline_ms,
                });
            }
        }
    }

    /// A keyframe arrived: any pending range is obsolete.
    pub fn on_keyframe(&mut self, out: &mut Vec<GapAction>) {
        self.flush(out);
    }

    /// Give up on the pending range (keyframe, or the hole was declared
    /// lost and skipped).
    pub fn flush(&mut self, out: &mut Vec<GapAction>) {
        if let Some(gap) = self.pending.take() {
            out.push(GapAction::FlushPrevious {
                start: gap.start,
                end: gap.end,
            });
        }
    }

    /// Flush the pending range if its deadline has expired.
    pub fn poll(&mut self, now_ms: u64, out: &mut Vec<GapAction>) {
        if let Some(gap) = self.pending {
            if now_ms >= gap.deadline_ms {
                out.push(GapAction::FlushPrevious {
                    start: gap.start,
                    end: gap.end,
                });
                self.pending = None;
            }
        }
    }
}

impl Default for GapReporter {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_GRACE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(v: u16) -> SeqNum16 {
        SeqNum16(v)
    }

    #[test]
    fn idle_always_sets_pending() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(10), seq(12), 100, &mut out);
        assert_eq!(
            out,
            vec![GapAction::SetPending {
                start: seq(10),
                end: seq(12),
                deadline_ms: 112
            }]
        );
    }

    #[test]
    fn same_range_extends() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(10), seq(12), 100, &mut out);
        out.clear();
        r.update(seq(10), seq(14), 101, &mut out);
        assert_eq!(
            out,
            vec![GapAction::ExtendPending {
                start: seq(10),
                end: seq(14)
            }]
        );
    }

    #[test]
    fn extend_then_disjoint_flushes_merged_range() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(10), seq(12), 100, &mut out);
        r.update(seq(10), seq(14), 101, &mut out);
        out.clear();
        r.update(seq(20), seq(24), 200, &mut out);
        assert_eq!(
            out,
            vec![
                GapAction::FlushPrevious {
                    start: seq(10),
                    end: seq(14)
                },
                GapAction::SetPending {
                    start: seq(20),
                    end: seq(24),
                    deadline_ms: 212
                },
            ]
        );
    }

    #[test]
    fn adjacent_range_merges() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(10), seq(12), 100, &mut out);
        out.clear();
        // 13 is adjacent to [10, 12].
        r.update(seq(13), seq(15), 101, &mut out);
        assert_eq!(
            out,
            vec![GapAction::ExtendPending {
                start: seq(10),
                end: seq(15)
            }]
        );
    }

    #[test]
    fn keyframe_flushes() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(5), seq(7), 0, &mut out);
        out.clear();
        r.on_keyframe(&mut out);
        assert_eq!(
            out,
            vec![GapAction::FlushPrevious {
                start: seq(5),
                end: seq(7)
            }]
        );
        assert!(!r.is_pending());
        out.clear();
        r.on_keyframe(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn deadline_expiry_flushes() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(5), seq(7), 100, &mut out);
        out.clear();
        r.poll(111, &mut out);
        assert!(out.is_empty());
        r.poll(112, &mut out);
        assert_eq!(
            out,
            vec![GapAction::FlushPrevious {
                start: seq(5),
                end: seq(7)
            }]
        );
    }

    #[test]
    fn merge_across_rollover() {
        let mut r = GapReporter::new(12);
        let mut out = Vec::new();
        r.update(seq(65533), seq(65535), 0, &mut out);
        out.clear();
        r.update(seq(0), seq(2), 1, &mut out);
        assert_eq!(
            out,
            vec![GapAction::ExtendPending {
                start: seq(65533),
                end: seq(2)
            }]
        );
    }
}
