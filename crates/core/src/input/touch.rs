//! Front/rear touch geometry and touchpad forwarding.
//!
//! Geometry: the front surface splits into upper/lower/left/right halves;
//! a circular arc of radius `h / 3` around each corner carves out four
//! "arc" inputs, and the middle half of each axis forms the CENTER
//! rectangle. Whatever is left classifies by quadrant. The rear surface
//! is plain quadrants.
//!
//! Forwarding: contacts whose region maps to the TOUCHPAD output are
//! tracked in slot records and forwarded to the console as absolute
//! touchpad coordinates. A contact that is released without ever moving
//! past [`TOUCH_MOVE_THRESHOLD`] emits a short "click pulse" — the
//! touchpad button held for [`CLICK_PULSE_TICKS`] loop iterations — so a
//! tap behaves like a physical touchpad click.

use super::mapping::{FrontRegion, RearRegion};

/// Front touch panel coordinate space.
pub const FRONT_TOUCH_WIDTH: u32 = 1920;
pub const FRONT_TOUCH_HEIGHT: u32 = 1088;

/// Rear touch panel coordinate space.
pub const REAR_TOUCH_WIDTH: u32 = 1920;
pub const REAR_TOUCH_HEIGHT: u32 = 888;

/// Remote touchpad coordinate space.
pub const REMOTE_TOUCHPAD_WIDTH: u32 = 1920;
pub const REMOTE_TOUCHPAD_HEIGHT: u32 = 942;

/// Simultaneous touchpad contacts the remote side accepts.
pub const MAX_TOUCHPAD_TOUCHES: usize = 2;

/// Movement (in panel units) beyond which a contact counts as a drag.
pub const TOUCH_MOVE_THRESHOLD: i32 = 24;

/// Input-loop iterations the synthetic click holds the touchpad button.
pub const CLICK_PULSE_TICKS: u8 = 2;

/// Classify a front-touch contact.
pub fn classify_front(x: u32, y: u32) -> FrontRegion {
    let w = FRONT_TOUCH_WIDTH as i64;
    let h = FRONT_TOUCH_HEIGHT as i64;
    let x = (x as i64).min(w);
    let y = (y as i64).min(h);

    let radius = h / 3;
    let r2 = radius * radius;
    let corners = [
        (0i64, 0i64, FrontRegion::ArcUpperLeft),
        (w, 0, FrontRegion::ArcUpperRight),
        (0, h, FrontRegion::ArcLowerLeft),
        (w, h, FrontRegion::ArcLowerRight),
    ];
    for (cx, cy, region) in corners {
        let dx = x - cx;
        let dy = y - cy;
        if dx * dx + dy * dy <= r2 {
            return region;
        }
    }

    // Center: the middle half of each axis.
    if x >= w / 4 && x <= 3 * w / 4 && y >= h / 4 && y <= 3 * h / 4 {
        return FrontRegion::Center;
    }

    match (x < w / 2, y < h / 2) {
        (true, true) => FrontRegion::UpperLeft,
        (false, true) => FrontRegion::UpperRight,
        (true, false) => FrontRegion::LowerLeft,
        (false, false) => FrontRegion::LowerRight,
    }
}

/// Classify a rear-touch contact.
pub fn classify_rear(x: u32, y: u32) -> RearRegion {
    let left = x < REAR_TOUCH_WIDTH / 2;
    let upper = y < REAR_TOUCH_HEIGHT / 2;
    match (left, upper) {
        (true, true) => RearRegion::UpperLeft,
        (false, true) => RearRegion::UpperRight,
        (true, false) => RearRegion::LowerLeft,
        (false, false) => RearRegion::LowerRight,
    }
}

/// A contact forwarded to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTouch {
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, Copy, Default)]
struct TouchSlot {
    active: bool,
    local_id: i32,
    remote_id: u8,
    start_x: u16,
    start_y: u16,
    x: u16,
    y: u16,
    moved: bool,
}

/// Output of one touch-tracking update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchFrame {
    pub touches: [Option<RemoteTouch>; MAX_TOUCHPAD_TOUCHES],
    /// Hold the touchpad button this tick (synthetic click).
    pub click: bool,
}

/// Tracks up to [`MAX_TOUCHPAD_TOUCHES`] touchpad-routed contacts across
/// loop iterations.
#[derive(Debug, Default)]
pub struct TouchTracker {
    slots: [TouchSlot; MAX_TOUCHPAD_TOUCHES],
    next_remote_id: u8,
    click_pulse: u8,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed this tick's touchpad-routed contacts `(local_id, x, y)` in
    /// remote touchpad coordinates.
    pub fn update(&mut self, contacts: &[(i32, u16, u16)]) -> TouchFrame {
        // Update or release existing slots.
        for slot in &mut self.slots {
            if !slot.active {
                continue;
            }
            match contacts.iter().find(|(id, _, _)| *id == slot.local_id) {
                Some(&(_, x, y)) => {
                    slot.x = x;
                    slot.y = y;
                    let dx = x as i32 - slot.start_x as i32;
                    let dy = y as i32 - slot.start_y as i32;
                    if dx.abs() > TOUCH_MOVE_THRESHOLD || dy.abs() > TOUCH_MOVE_THRESHOLD {
                        slot.moved = true;
                    }
                }
                None => {
                    if !slot.moved {
                        self.click_pulse = CLICK_PULSE_TICKS;
                    }
                    slot.active = false;
                }
            }
        }

        // Admit new contacts into free slots.
        for &(local_id, x, y) in contacts {
            let tracked = self
                .slots
                .iter()
                .any(|s| s.active && s.local_id == local_id);
            if tracked {
                continue;
            }
            if let Some(slot) = self.slots.iter_mut().find(|s| !s.active) {
                self.next_remote_id = (self.next_remote_id + 1) & 0x7f;
                *slot = TouchSlot {
                    active: true,
                    local_id,
                    remote_id: self.next_remote_id,
                    start_x: x,
                    start_y: y,
                    x,
                    y,
                    moved: false,
                };
            }
        }

        let mut frame = TouchFrame::default();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.active {
                frame.touches[i] = Some(RemoteTouch {
                    id: slot.remote_id,
                    x: slot.x,
                    y: slot.y,
                });
            }
        }
        if self.click_pulse > 0 {
            self.click_pulse -= 1;
            frame.click = true;
        }
        frame
    }

    /// Forget all contacts (stream restart).
    pub fn reset(&mut self) {
        self.slots = Default::default();
        self.click_pulse = 0;
    }
}

/// Scale a front-panel coordinate to the remote touchpad space.
pub fn front_to_touchpad(x: u32, y: u32) -> (u16, u16) {
    let tx = (x as u64 * REMOTE_TOUCHPAD_WIDTH as u64 / FRONT_TOUCH_WIDTH as u64)
        .min(REMOTE_TOUCHPAD_WIDTH as u64 - 1) as u16;
    let ty = (y as u64 * REMOTE_TOUCHPAD_HEIGHT as u64 / FRONT_TOUCH_HEIGHT as u64)
        .min(REMOTE_TOUCHPAD_HEIGHT as u64 - 1) as u16;
    (tx, ty)
}
