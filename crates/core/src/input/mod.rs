//! Input pipeline: sample, map, forward.
//!
//! A dedicated thread samples the local controls every 2 ms, translates
//! them through the active [`MappingTable`](mapping::MappingTable), and
//! forwards a [`ControllerSnapshot`] to the session transport. The loop
//! also owns three small state machines:
//!
//! - the exit combo (L+R+Start held ≈1 s requests a stream stop),
//! - the PS-button dual-mode FSM ([`psbutton`]),
//! - the touchpad contact tracker ([`touch`]).
//!
//! A `controller_gate_open` flag ([`SessionFlags::inputs_ready`]) gates
//! the loop: while closed the thread sleeps 1 ms per iteration and
//! accounts the blocked time for diagnostics. The last snapshot is cached
//! so the console sees continuous controller state across soft restarts.

pub mod mapping;
pub mod psbutton;
pub mod touch;

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::session::{SessionClock, SessionFlags, SessionTransport};
use mapping::{InputId, LocalButton, MapTarget, MappingTable, buttons};
use psbutton::{PsButtonFsm, PsVerdict};
use touch::{
    MAX_TOUCHPAD_TOUCHES, RemoteTouch, TouchTracker, classify_front, classify_rear,
    front_to_touchpad,
};

/// Input sampling cadence.
pub const INPUT_TICK: Duration = Duration::from_millis(2);

/// Sleep while the controller gate is closed.
const GATE_SLEEP: Duration = Duration::from_millis(1);

/// Exit combo hold duration in ticks (≈1 s at 2 ms).
pub const EXIT_COMBO_TICKS: u32 = 500;

/// Ticks the synthetic remote PS tap stays pressed (≈100 ms).
const PS_TAP_PULSE_TICKS: u16 = 50;

/// Accelerometer + gyro sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSample {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

/// Raw device state, as read from the platform control source.
#[derive(Debug, Clone, Default)]
pub struct RawInput {
    /// [`LocalButton`] bits.
    pub buttons: u32,
    pub left_x: u8,
    pub left_y: u8,
    pub right_x: u8,
    pub right_y: u8,
    pub motion: MotionSample,
    /// Front panel contacts `(id, x, y)` in panel coordinates.
    pub front_touches: Vec<(i32, u16, u16)>,
    /// Rear panel contacts `(id, x, y)`.
    pub rear_touches: Vec<(i32, u16, u16)>,
}

/// The controller state forwarded to the console each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    /// [`mapping::buttons`] bits.
    pub buttons: u32,
    pub left_x: u8,
    pub left_y: u8,
    pub right_x: u8,
    pub right_y: u8,
    pub l2_analog: u8,
    pub r2_analog: u8,
    pub motion: MotionSample,
    pub touches: [Option<RemoteTouch>; MAX_TOUCHPAD_TOUCHES],
}

impl Default for ControllerSnapshot {
    fn default() -> Self {
        Self {
            buttons: 0,
            left_x: 0x80,
            left_y: 0x80,
            right_x: 0x80,
            right_y: 0x80,
            l2_analog: 0,
            r2_analog: 0,
            motion: MotionSample::default(),
            touches: [None; MAX_TOUCHPAD_TOUCHES],
        }
    }
}

/// Platform control source (button registers, touch panels, IMU).
pub trait ControlSource: Send {
    fn sample(&mut self) -> RawInput;

    /// Actuator feedback from the console. No-op on hardware without one.
    fn set_actuators(&mut self, _left: u8, _right: u8) {}
}

/// Maps raw device state to controller snapshots, carrying the touch and
/// PS-button state machines across ticks.
pub struct SnapshotBuilder {
    table: MappingTable,
    touch: TouchTracker,
    ps: PsButtonFsm,
    ps_dual_mode: bool,
    ps_pulse: u16,
}

impl SnapshotBuilder {
    pub fn new(table: MappingTable, ps_dual_mode: bool) -> Self {
        Self {
            table,
            touch: TouchTracker::new(),
            ps: PsButtonFsm::new(),
            ps_dual_mode,
            ps_pulse: 0,
        }
    }

    /// Enable/disable PS dual mode mid-session.
    pub fn set_ps_dual_mode(&mut self, enabled: bool) {
        if !enabled {
            self.ps.cancel();
        }
        self.ps_dual_mode = enabled;
    }

    pub fn build(&mut self, raw: &RawInput, now_ms: u64) -> ControllerSnapshot {
        let mut snapshot = ControllerSnapshot {
            left_x: raw.left_x,
            left_y: raw.left_y,
            right_x: raw.right_x,
            right_y: raw.right_y,
            motion: raw.motion,
            ..ControllerSnapshot::default()
        };

        let mut active: Vec<InputId> = Vec::with_capacity(8);
        let mut pad_contacts: Vec<(i32, u16, u16)> = Vec::new();

        for button in LocalButton::ALL {
            if raw.buttons & button.bit() != 0 {
                active.push(InputId::Button(button));
            }
        }
        for &(id, x, y) in &raw.front_touches {
            let region = classify_front(x as u32, y as u32);
            if self.table.lookup(InputId::Front(region)) == MapTarget::Touchpad {
                let (tx, ty) = front_to_touchpad(x as u32, y as u32);
                pad_contacts.push((id, tx, ty));
            } else {
                active.push(InputId::Front(region));
            }
        }
        for &(_, x, y) in &raw.rear_touches {
            active.push(InputId::Rear(classify_rear(x as u32, y as u32)));
        }

        let mut ps_pressed = false;
        for &input in &active {
            match self.table.lookup(input) {
                MapTarget::Ps => ps_pressed = true,
                // A non-front input mapped to TOUCHPAD acts as the button.
                MapTarget::Touchpad => snapshot.buttons |= buttons::TOUCHPAD,
                target => {
                    if let Some(bit) = target.button_bit() {
                        snapshot.buttons |= bit;
                    }
                }
            }
        }

        // Trigger analogs follow the designated in_l2/in_r2 inputs; with
        // no designation they shadow the button bit.
        let l2 = match self.table.in_l2 {
            Some(slot) => active.contains(&slot),
            None => snapshot.buttons & buttons::L2 != 0,
        };
        let r2 = match self.table.in_r2 {
            Some(slot) => active.contains(&slot),
            None => snapshot.buttons & buttons::R2 != 0,
        };
        if l2 {
            snapshot.l2_analog = 0xff;
            snapshot.buttons |= buttons::L2;
        }
        if r2 {
            snapshot.r2_analog = 0xff;
            snapshot.buttons |= buttons::R2;
        }

        let frame = self.touch.update(&pad_contacts);
        snapshot.touches = frame.touches;
        if frame.click {
            snapshot.buttons |= buttons::TOUCHPAD;
        }

        if self.ps_dual_mode {
            if self.ps.tick(ps_pressed, now_ms) == PsVerdict::RemoteTap {
                self.ps_pulse = PS_TAP_PULSE_TICKS;
            }
        } else if ps_pressed {
            snapshot.buttons |= buttons::PS;
        }
        if self.ps_pulse > 0 {
            self.ps_pulse -= 1;
            snapshot.buttons |= buttons::PS;
        }

        snapshot
    }

    /// Forget touch state (stream restart).
    pub fn reset_touches(&mut self) {
        self.touch.reset();
    }
}

struct InputShared {
    flags: Arc<SessionFlags>,
    /// Packed actuator state: `left << 8 | right`.
    rumble: AtomicU16,
    blocked_us: AtomicU64,
    last_snapshot: Mutex<ControllerSnapshot>,
}

/// The input pipeline thread handle.
pub struct InputPipeline {
    shared: Arc<InputShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InputPipeline {
    pub fn start(
        source: Box<dyn ControlSource>,
        transport: Arc<dyn SessionTransport>,
        table: MappingTable,
        ps_dual_mode: bool,
        flags: Arc<SessionFlags>,
        clock: SessionClock,
    ) -> Self {
        let shared = Arc::new(InputShared {
            flags,
            rumble: AtomicU16::new(0),
            blocked_us: AtomicU64::new(0),
            last_snapshot: Mutex::new(ControllerSnapshot::default()),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("farplay-input".into())
            .spawn(move || {
                input_loop(
                    worker_shared,
                    source,
                    transport,
                    SnapshotBuilder::new(table, ps_dual_mode),
                    clock,
                );
            })
            .expect("spawn input thread");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Latch actuator state from the console; applied on the next tick.
    pub fn rumble(&self, left: u8, right: u8) {
        self.shared
            .rumble
            .store((left as u16) << 8 | right as u16, Ordering::Relaxed);
    }

    /// Microseconds spent blocked behind the controller gate.
    pub fn blocked_us(&self) -> u64 {
        self.shared.blocked_us.load(Ordering::Relaxed)
    }

    /// Last forwarded snapshot; re-sent across soft restarts so the
    /// console sees continuous controller state.
    pub fn cached_snapshot(&self) -> ControllerSnapshot {
        self.shared.last_snapshot.lock().clone()
    }

    /// Signal the loop to exit and join it. Idempotent.
    pub fn stop(&self) {
        self.shared
            .flags
            .input_should_exit
            .store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for InputPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn input_loop(
    shared: Arc<InputShared>,
    mut source: Box<dyn ControlSource>,
    transport: Arc<dyn SessionTransport>,
    mut builder: SnapshotBuilder,
    clock: SessionClock,
) {
    let combo_mask = LocalButton::L.bit() | LocalButton::R.bit() | LocalButton::Start.bit();
    let mut combo_ticks = 0u32;
    let mut applied_rumble = 0u16;
    let mut next_tick = Instant::now();

    debug!("PIPE/input: loop started");
    loop {
        if shared.flags.input_should_exit.load(Ordering::SeqCst) {
            break;
        }
        if !shared.flags.inputs_ready.load(Ordering::Relaxed) {
            thread::sleep(GATE_SLEEP);
            shared
                .blocked_us
                .fetch_add(GATE_SLEEP.as_micros() as u64, Ordering::Relaxed);
            next_tick = Instant::now();
            continue;
        }

        let rumble = shared.rumble.load(Ordering::Relaxed);
        if rumble != applied_rumble {
            source.set_actuators((rumble >> 8) as u8, rumble as u8);
            applied_rumble = rumble;
        }

        let raw = source.sample();

        if raw.buttons & combo_mask == combo_mask
            && shared.flags.is_streaming.load(Ordering::Relaxed)
            && !shared.flags.stop_requested.load(Ordering::Relaxed)
        {
            combo_ticks += 1;
            if combo_ticks >= EXIT_COMBO_TICKS {
                info!("PIPE/input: exit combo held, requesting stream stop");
                shared.flags.stop_requested.store(true, Ordering::SeqCst);
                combo_ticks = 0;
            }
        } else {
            combo_ticks = 0;
        }

        let snapshot = builder.build(&raw, clock.now_ms());
        *shared.last_snapshot.lock() = snapshot.clone();
        transport.send_controller(&snapshot);

        next_tick += INPUT_TICK;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
    debug!("PIPE/input: loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_buttons(buttons: u32) -> RawInput {
        RawInput {
            buttons,
            left_x: 0x80,
            left_y: 0x80,
            right_x: 0x80,
            right_y: 0x80,
            ..RawInput::default()
        }
    }

    #[test]
    fn buttons_map_through_table() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let raw = raw_with_buttons(LocalButton::Cross.bit() | LocalButton::L.bit());
        let snap = b.build(&raw, 0);
        assert_eq!(snap.buttons, buttons::CROSS | buttons::L1);
    }

    #[test]
    fn rear_quadrant_drives_trigger_analog() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        raw.rear_touches.push((1, 100, 100)); // rear upper-left → L2
        let snap = b.build(&raw, 0);
        assert_eq!(snap.l2_analog, 0xff);
        assert_ne!(snap.buttons & buttons::L2, 0);
        assert_eq!(snap.r2_analog, 0);
    }

    #[test]
    fn center_touch_routes_to_touchpad_path() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        raw.front_touches.push((3, 960, 544));
        let snap = b.build(&raw, 0);
        let touch = snap.touches[0].expect("forwarded contact");
        let (ex, ey) = front_to_touchpad(960, 544);
        assert_eq!((touch.x, touch.y), (ex, ey));
        // No button bit for a plain contact.
        assert_eq!(snap.buttons, 0);
    }

    #[test]
    fn tap_on_touchpad_region_clicks() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        raw.front_touches.push((3, 960, 544));
        b.build(&raw, 0);
        let released = raw_with_buttons(0);
        let snap = b.build(&released, 2);
        assert_ne!(snap.buttons & buttons::TOUCHPAD, 0);
    }

    #[test]
    fn unmapped_region_is_silent() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        // Upper-left quadrant is unmapped in the standard preset.
        raw.front_touches.push((1, 460, 20));
        let snap = b.build(&raw, 0);
        assert_eq!(snap.buttons, 0);
        assert!(snap.touches[0].is_none());
    }

    #[test]
    fn front_arc_preset_triggers() {
        let mut b = SnapshotBuilder::new(MappingTable::preset(1), false);
        let mut raw = raw_with_buttons(0);
        raw.front_touches.push((1, 10, 10)); // upper-left arc
        let snap = b.build(&raw, 0);
        assert_eq!(snap.l2_analog, 0xff);
    }

    #[test]
    fn sticks_pass_through() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        raw.left_x = 0x12;
        raw.right_y = 0xEE;
        let snap = b.build(&raw, 0);
        assert_eq!(snap.left_x, 0x12);
        assert_eq!(snap.right_y, 0xEE);
    }

    #[test]
    fn ps_dual_mode_suppresses_then_taps() {
        let mut table = MappingTable::standard();
        table.set(InputId::Button(LocalButton::Select), MapTarget::Ps);
        let mut b = SnapshotBuilder::new(table, true);

        let pressed = raw_with_buttons(LocalButton::Select.bit());
        let released = raw_with_buttons(0);

        // Press + release: intercepted, nothing forwarded.
        assert_eq!(b.build(&pressed, 0).buttons & buttons::PS, 0);
        assert_eq!(b.build(&released, 2).buttons & buttons::PS, 0);
        // Window expires: a synthetic remote tap fires.
        let snap = b.build(&released, 400);
        assert_ne!(snap.buttons & buttons::PS, 0);
    }

    #[test]
    fn ps_plain_mode_forwards_directly() {
        let mut table = MappingTable::standard();
        table.set(InputId::Button(LocalButton::Select), MapTarget::Ps);
        let mut b = SnapshotBuilder::new(table, false);
        let pressed = raw_with_buttons(LocalButton::Select.bit());
        assert_ne!(b.build(&pressed, 0).buttons & buttons::PS, 0);
    }

    #[test]
    fn lower_rear_quadrants_are_stick_clicks() {
        let mut b = SnapshotBuilder::new(MappingTable::standard(), false);
        let mut raw = raw_with_buttons(0);
        raw.rear_touches.push((1, 100, 800)); // lower-left → L3
        raw.rear_touches.push((2, 1800, 800)); // lower-right → R3
        let snap = b.build(&raw, 0);
        assert_ne!(snap.buttons & buttons::L3, 0);
        assert_ne!(snap.buttons & buttons::R3, 0);
    }
}
