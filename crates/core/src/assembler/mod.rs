//! Frame assembly.
//!
//! The transport's FEC layer delivers whole encoded video units, but over
//! UDP and therefore out of order. The assembler owns the reorder window
//! ([`ReorderQueue`]) and turns the unit stream back into a strictly
//! ordered frame stream for the video pipeline:
//!
//! - units inside the window are held until the contiguous prefix drains;
//! - holes at the head of the window become retransmission gap reports
//!   ([`gap::GapReporter`]) and, once the grace period expires, declared
//!   losses — the window skips past them and a loss event goes to the
//!   supervisor;
//! - units arriving ahead of the window force it forward, delivering what
//!   can be delivered and declaring the rest lost.
//!
//! Loss is reported two ways on purpose: as a [`LossEvent`] for the
//! supervisor's gate accumulators at the moment of declaration, and as
//! `frames_lost` metadata carried on the next delivered frame so the
//! decoder side knows its reference chain has a hole in it.

pub mod gap;

use tracing::trace;

use crate::media::contains_idr;
use crate::reorder::ReorderQueue;
use crate::seq::SeqNum16;
use gap::{GapAction, GapReporter};

/// Default reorder window size in units.
pub const DEFAULT_REORDER_CAPACITY: usize = 64;

/// A decode-ready encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    pub seq: SeqNum16,
    pub data: Vec<u8>,
    /// Frames missing immediately before this one.
    pub frames_lost: u32,
    /// True only when the missing reference was rebuilt from FEC or a
    /// reference resync and the decoder can continue without a keyframe.
    pub recovered: bool,
    pub keyframe: bool,
}

/// A declared loss, forwarded to the supervisor's gate accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossEvent {
    pub frames_lost: u32,
    pub recovered: bool,
}

/// Where assembled output goes. Implemented by the session runtime; tests
/// implement it with plain `Vec`s.
pub trait AssemblerSink {
    fn on_frame(&mut self, frame: AssembledFrame);
    fn on_loss(&mut self, loss: LossEvent);
    fn on_gap_action(&mut self, action: GapAction);
}

struct PendingUnit {
    data: Vec<u8>,
    frames_lost: u32,
    recovered: bool,
}

/// Running drop statistics, folded into `PIPE/` logs by the pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssemblerStats {
    pub late_drops: u64,
    pub duplicate_drops: u64,
    pub declared_lost: u64,
    pub window_overruns: u64,
}

/// Reassembles FEC-protected video units into decode-ready frames.
pub struct FrameAssembler {
    queue: Option<ReorderQueue<PendingUnit>>,
    capacity: usize,
    gap: GapReporter,
    grace_ms: u64,
    /// When the current head hole was first observed.
    head_gap_since_ms: Option<u64>,
    /// Declared losses waiting to ride on the next delivered frame.
    carry_lost: u32,
    stats: AssemblerStats,
    actions: Vec<GapAction>,
}

impl FrameAssembler {
    pub fn new(capacity: usize, grace_ms: u64) -> Self {
        Self {
            queue: None,
            capacity,
            gap: GapReporter::new(grace_ms),
            grace_ms,
            head_gap_since_ms: None,
            carry_lost: 0,
            stats: AssemblerStats::default(),
            actions: Vec::new(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Feed one video unit from the transport.
    ///
    /// `frames_lost`/`recovered` are the transport FEC layer's verdict for
    /// this unit; gap losses declared by the assembler itself are added on
    /// top.
    pub fn push_unit(
        &mut self,
        seq: SeqNum16,
        data: &[u8],
        frames_lost: u32,
        recovered: bool,
        now_ms: u64,
        sink: &mut dyn AssemblerSink,
    ) {
        // The first unit anchors the window.
        let queue = self
            .queue
            .get_or_insert_with(|| ReorderQueue::new(self.capacity, seq));

        let keyframe = contains_idr(data);
        if keyframe {
            self.gap.on_keyframe(&mut self.actions);
        }

        if frames_lost > 0 {
            sink.on_loss(LossEvent {
                frames_lost,
                recovered,
            });
        }

        let unit = PendingUnit {
            data: data.to_vec(),
            frames_lost,
            recovered,
        };

        if !queue.push(seq, unit) {
            if queue.is_ahead_of_window(seq) {
                self.stats.window_overruns += 1;
                self.make_room_for(seq, sink);
                let queue = self.queue.as_mut().unwrap();
                let pushed = queue.push(
                    seq,
                    PendingUnit {
                        data: data.to_vec(),
                        frames_lost,
                        recovered,
                    },
                );
                debug_assert!(pushed, "unit must fit after window advance");
            } else if seq.precedes(queue.base()) {
                self.stats.late_drops += 1;
                trace!(%seq, base = %queue.base(), "unit arrived behind the window");
            } else {
                self.stats.duplicate_drops += 1;
                trace!(%seq, "duplicate unit");
            }
        }

        self.drain(sink);
        self.check_head_gap(now_ms, sink);
        self.emit_actions(sink);
    }

    /// Time-based upkeep: gap deadlines fire even when no unit arrives.
    pub fn poll(&mut self, now_ms: u64, sink: &mut dyn AssemblerSink) {
        self.gap.poll(now_ms, &mut self.actions);
        self.check_head_gap(now_ms, sink);
        self.emit_actions(sink);
    }

    /// Drop all buffered units and re-anchor on the next one. Used across
    /// soft restarts.
    pub fn reset(&mut self) {
        self.queue = None;
        self.head_gap_since_ms = None;
        self.carry_lost = 0;
        self.gap = GapReporter::new(self.grace_ms);
        self.actions.clear();
    }

    /// Advance the window until `seq` fits, delivering what exists and
    /// declaring the rest lost.
    fn make_room_for(&mut self, seq: SeqNum16, sink: &mut dyn AssemblerSink) {
        let mut declared = 0u32;
        {
            let queue = self.queue.as_mut().unwrap();
            while queue.is_ahead_of_window(seq) {
                if let Some((head_seq, unit)) = queue.pull() {
                    deliver(head_seq, unit, &mut self.carry_lost, sink);
                } else {
                    queue.drop_units(1);
                    declared += 1;
                }
            }
        }
        if declared > 0 {
            self.declare_lost(declared, sink);
        }
    }

    fn drain(&mut self, sink: &mut dyn AssemblerSink) {
        let queue = self.queue.as_mut().unwrap();
        while let Some((seq, unit)) = queue.pull() {
            deliver(seq, unit, &mut self.carry_lost, sink);
            self.head_gap_since_ms = None;
        }
    }

    /// Inspect the head of the window: report holes, declare them lost
    /// once the grace period expires.
    fn check_head_gap(&mut self, now_ms: u64, sink: &mut dyn AssemblerSink) {
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        let Some((offset, first_seq, _)) = queue.first_set() else {
            self.head_gap_since_ms = None;
            return;
        };
        if offset == 0 {
            self.head_gap_since_ms = None;
            return;
        }

        let gap_start = queue.base();
        let gap_end = SeqNum16(first_seq.0.wrapping_sub(1));
        let since = *self.head_gap_since_ms.get_or_insert(now_ms);

        if now_ms.saturating_sub(since) >= self.grace_ms {
            queue.skip_gap();
            self.head_gap_since_ms = None;
            self.gap.flush(&mut self.actions);
            self.declare_lost(offset as u32, sink);
            self.drain(sink);
        } else {
            self.gap
                .update(gap_start, gap_end, now_ms, &mut self.actions);
        }
    }

    fn declare_lost(&mut self, count: u32, sink: &mut dyn AssemblerSink) {
        self.stats.declared_lost += count as u64;
        self.carry_lost = self.carry_lost.saturating_add(count);
        trace!(count, "declared video units lost");
        sink.on_loss(LossEvent {
            frames_lost: count,
            recovered: false,
        });
    }

    fn emit_actions(&mut self, sink: &mut dyn AssemblerSink) {
        for action in self.actions.drain(..) {
            sink.on_gap_action(action);
        }
    }
}

fn deliver(seq: SeqNum16, unit: PendingUnit, carry_lost: &mut u32, sink: &mut dyn AssemblerSink) {
    let carried = std::mem::take(carry_lost);
    let keyframe = contains_idr(&unit.data);
    sink.on_frame(AssembledFrame {
        seq,
        frames_lost: unit.frames_lost.saturating_add(carried),
        recovered: unit.recovered && carried == 0,
        keyframe,
        data: unit.data,
    });
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_CAPACITY, gap::DEFAULT_GAP_GRACE_MS)
    }
}
