//! Controller mapping tables.
//!
//! Every input the user owns — physical buttons, front-touch arc/grid
//! cells, rear-touch regions — maps to one remote controller output.
//! Lookup is a plain array index per input class, so the 2 ms input loop
//! never hashes or searches.
//!
//! Two distinguished slots, `in_l2` and `in_r2`, name the inputs that
//! drive the analog trigger values: triggers on the remote controller are
//! analog, the handheld's inputs are not, so the designated input pushes
//! the trigger to 0xff while active and 0x00 otherwise.

use crate::error::{Result, StreamError};

/// Remote controller outputs a local input can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapTarget {
    Triangle,
    Circle,
    Cross,
    Square,
    L1,
    R1,
    L2,
    R2,
    L3,
    R3,
    Ps,
    Share,
    Options,
    /// Routes the contact to the touch-event path instead of the button
    /// bitmask.
    Touchpad,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    #[default]
    None,
}

/// Remote controller button bits.
pub mod buttons {
    pub const TRIANGLE: u32 = 1 << 0;
    pub const CIRCLE: u32 = 1 << 1;
    pub const CROSS: u32 = 1 << 2;
    pub const SQUARE: u32 = 1 << 3;
    pub const L1: u32 = 1 << 4;
    pub const R1: u32 = 1 << 5;
    pub const L2: u32 = 1 << 6;
    pub const R2: u32 = 1 << 7;
    pub const L3: u32 = 1 << 8;
    pub const R3: u32 = 1 << 9;
    pub const PS: u32 = 1 << 10;
    pub const SHARE: u32 = 1 << 11;
    pub const OPTIONS: u32 = 1 << 12;
    pub const TOUCHPAD: u32 = 1 << 13;
    pub const DPAD_UP: u32 = 1 << 14;
    pub const DPAD_DOWN: u32 = 1 << 15;
    pub const DPAD_LEFT: u32 = 1 << 16;
    pub const DPAD_RIGHT: u32 = 1 << 17;
}

impl MapTarget {
    /// Button bit for targets that OR into the bitmask. `Touchpad` and
    /// `None` route elsewhere; `Ps` goes through the dual-mode FSM first.
    pub fn button_bit(self) -> Option<u32> {
        match self {
            MapTarget::Triangle => Some(buttons::TRIANGLE),
            MapTarget::Circle => Some(buttons::CIRCLE),
            MapTarget::Cross => Some(buttons::CROSS),
            MapTarget::Square => Some(buttons::SQUARE),
            MapTarget::L1 => Some(buttons::L1),
            MapTarget::R1 => Some(buttons::R1),
            MapTarget::L2 => Some(buttons::L2),
            MapTarget::R2 => Some(buttons::R2),
            MapTarget::L3 => Some(buttons::L3),
            MapTarget::R3 => Some(buttons::R3),
            MapTarget::Share => Some(buttons::SHARE),
            MapTarget::Options => Some(buttons::OPTIONS),
            MapTarget::DpadUp => Some(buttons::DPAD_UP),
            MapTarget::DpadDown => Some(buttons::DPAD_DOWN),
            MapTarget::DpadLeft => Some(buttons::DPAD_LEFT),
            MapTarget::DpadRight => Some(buttons::DPAD_RIGHT),
            MapTarget::Ps | MapTarget::Touchpad | MapTarget::None => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MapTarget::Triangle => "triangle",
            MapTarget::Circle => "circle",
            MapTarget::Cross => "cross",
            MapTarget::Square => "square",
            MapTarget::L1 => "l1",
            MapTarget::R1 => "r1",
            MapTarget::L2 => "l2",
            MapTarget::R2 => "r2",
            MapTarget::L3 => "l3",
            MapTarget::R3 => "r3",
            MapTarget::Ps => "ps",
            MapTarget::Share => "share",
            MapTarget::Options => "options",
            MapTarget::Touchpad => "touchpad",
            MapTarget::DpadUp => "dpad_up",
            MapTarget::DpadDown => "dpad_down",
            MapTarget::DpadLeft => "dpad_left",
            MapTarget::DpadRight => "dpad_right",
            MapTarget::None => "none",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let target = match name {
            "triangle" => MapTarget::Triangle,
            "circle" => MapTarget::Circle,
            "cross" => MapTarget::Cross,
            "square" => MapTarget::Square,
            "l1" => MapTarget::L1,
            "r1" => MapTarget::R1,
            "l2" => MapTarget::L2,
            "r2" => MapTarget::R2,
            "l3" => MapTarget::L3,
            "r3" => MapTarget::R3,
            "ps" => MapTarget::Ps,
            "share" => MapTarget::Share,
            "options" => MapTarget::Options,
            "touchpad" => MapTarget::Touchpad,
            "dpad_up" => MapTarget::DpadUp,
            "dpad_down" => MapTarget::DpadDown,
            "dpad_left" => MapTarget::DpadLeft,
            "dpad_right" => MapTarget::DpadRight,
            "none" => MapTarget::None,
            other => {
                return Err(StreamError::ConfigParse(format!(
                    "unknown map target: {other}"
                )));
            }
        };
        Ok(target)
    }
}

/// Physical buttons on the handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalButton {
    Triangle,
    Circle,
    Cross,
    Square,
    L,
    R,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl LocalButton {
    pub const ALL: [LocalButton; 12] = [
        LocalButton::Triangle,
        LocalButton::Circle,
        LocalButton::Cross,
        LocalButton::Square,
        LocalButton::L,
        LocalButton::R,
        LocalButton::Select,
        LocalButton::Start,
        LocalButton::Up,
        LocalButton::Down,
        LocalButton::Left,
        LocalButton::Right,
    ];

    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn index(self) -> usize {
        match self {
            LocalButton::Triangle => 0,
            LocalButton::Circle => 1,
            LocalButton::Cross => 2,
            LocalButton::Square => 3,
            LocalButton::L => 4,
            LocalButton::R => 5,
            LocalButton::Select => 6,
            LocalButton::Start => 7,
            LocalButton::Up => 8,
            LocalButton::Down => 9,
            LocalButton::Left => 10,
            LocalButton::Right => 11,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "triangle" => LocalButton::Triangle,
            "circle" => LocalButton::Circle,
            "cross" => LocalButton::Cross,
            "square" => LocalButton::Square,
            "l" => LocalButton::L,
            "r" => LocalButton::R,
            "select" => LocalButton::Select,
            "start" => LocalButton::Start,
            "up" => LocalButton::Up,
            "down" => LocalButton::Down,
            "left" => LocalButton::Left,
            "right" => LocalButton::Right,
            _ => return None,
        })
    }
}

/// Front-touch regions: four corner arcs, the center rectangle, and the
/// four quadrant grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontRegion {
    ArcUpperLeft,
    ArcUpperRight,
    ArcLowerLeft,
    ArcLowerRight,
    Center,
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl FrontRegion {
    pub fn index(self) -> usize {
        match self {
            FrontRegion::ArcUpperLeft => 0,
            FrontRegion::ArcUpperRight => 1,
            FrontRegion::ArcLowerLeft => 2,
            FrontRegion::ArcLowerRight => 3,
            FrontRegion::Center => 4,
            FrontRegion::UpperLeft => 5,
            FrontRegion::UpperRight => 6,
            FrontRegion::LowerLeft => 7,
            FrontRegion::LowerRight => 8,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "front_arc_ul" => FrontRegion::ArcUpperLeft,
            "front_arc_ur" => FrontRegion::ArcUpperRight,
            "front_arc_ll" => FrontRegion::ArcLowerLeft,
            "front_arc_lr" => FrontRegion::ArcLowerRight,
            "front_center" => FrontRegion::Center,
            "front_upper_left" => FrontRegion::UpperLeft,
            "front_upper_right" => FrontRegion::UpperRight,
            "front_lower_left" => FrontRegion::LowerLeft,
            "front_lower_right" => FrontRegion::LowerRight,
            _ => return None,
        })
    }
}

/// Rear-touch quadrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearRegion {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl RearRegion {
    pub fn index(self) -> usize {
        match self {
            RearRegion::UpperLeft => 0,
            RearRegion::UpperRight => 1,
            RearRegion::LowerLeft => 2,
            RearRegion::LowerRight => 3,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "rear_upper_left" => RearRegion::UpperLeft,
            "rear_upper_right" => RearRegion::UpperRight,
            "rear_lower_left" => RearRegion::LowerLeft,
            "rear_lower_right" => RearRegion::LowerRight,
            _ => return None,
        })
    }
}

/// Any input identifier the user owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputId {
    Button(LocalButton),
    Front(FrontRegion),
    Rear(RearRegion),
}

impl InputId {
    pub fn parse(name: &str) -> Result<Self> {
        LocalButton::parse(name)
            .map(InputId::Button)
            .or_else(|| FrontRegion::parse(name).map(InputId::Front))
            .or_else(|| RearRegion::parse(name).map(InputId::Rear))
            .ok_or_else(|| StreamError::ConfigParse(format!("unknown input: {name}")))
    }
}

/// O(1) mapping from every local input to its remote output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    buttons: [MapTarget; 12],
    front: [MapTarget; 9],
    rear: [MapTarget; 4],
    /// Input driving the L2 analog value (0x00 / 0xff).
    pub in_l2: Option<InputId>,
    /// Input driving the R2 analog value.
    pub in_r2: Option<InputId>,
}

impl MappingTable {
    /// Everything unmapped.
    pub fn empty() -> Self {
        Self {
            buttons: [MapTarget::None; 12],
            front: [MapTarget::None; 9],
            rear: [MapTarget::None; 4],
            in_l2: None,
            in_r2: None,
        }
    }

    /// Preset 0: face buttons and dpad pass through, shoulder buttons are
    /// L1/R1, rear upper quadrants stand in for the triggers, the front
    /// center is the touchpad surface.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.set(InputId::Button(LocalButton::Triangle), MapTarget::Triangle);
        table.set(InputId::Button(LocalButton::Circle), MapTarget::Circle);
        table.set(InputId::Button(LocalButton::Cross), MapTarget::Cross);
        table.set(InputId::Button(LocalButton::Square), MapTarget::Square);
        table.set(InputId::Button(LocalButton::L), MapTarget::L1);
        table.set(InputId::Button(LocalButton::R), MapTarget::R1);
        table.set(InputId::Button(LocalButton::Select), MapTarget::Share);
        table.set(InputId::Button(LocalButton::Start), MapTarget::Options);
        table.set(InputId::Button(LocalButton::Up), MapTarget::DpadUp);
        table.set(InputId::Button(LocalButton::Down), MapTarget::DpadDown);
        table.set(InputId::Button(LocalButton::Left), MapTarget::DpadLeft);
        table.set(InputId::Button(LocalButton::Right), MapTarget::DpadRight);
        table.set(InputId::Rear(RearRegion::UpperLeft), MapTarget::L2);
        table.set(InputId::Rear(RearRegion::UpperRight), MapTarget::R2);
        table.set(InputId::Rear(RearRegion::LowerLeft), MapTarget::L3);
        table.set(InputId::Rear(RearRegion::LowerRight), MapTarget::R3);
        table.set(InputId::Front(FrontRegion::Center), MapTarget::Touchpad);
        table.in_l2 = Some(InputId::Rear(RearRegion::UpperLeft));
        table.in_r2 = Some(InputId::Rear(RearRegion::UpperRight));
        table
    }

    /// Preset 1: triggers on the front arcs instead of the rear panel.
    pub fn front_arc_triggers() -> Self {
        let mut table = Self::standard();
        table.set(InputId::Rear(RearRegion::UpperLeft), MapTarget::None);
        table.set(InputId::Rear(RearRegion::UpperRight), MapTarget::None);
        table.set(InputId::Front(FrontRegion::ArcUpperLeft), MapTarget::L2);
        table.set(InputId::Front(FrontRegion::ArcUpperRight), MapTarget::R2);
        table.set(InputId::Front(FrontRegion::ArcLowerLeft), MapTarget::L3);
        table.set(InputId::Front(FrontRegion::ArcLowerRight), MapTarget::R3);
        table.in_l2 = Some(InputId::Front(FrontRegion::ArcUpperLeft));
        table.in_r2 = Some(InputId::Front(FrontRegion::ArcUpperRight));
        table
    }

    /// Resolve a preset id; unknown ids fall back to the standard layout.
    pub fn preset(id: u32) -> Self {
        match id {
            1 => Self::front_arc_triggers(),
            _ => Self::standard(),
        }
    }

    pub fn lookup(&self, input: InputId) -> MapTarget {
        match input {
            InputId::Button(b) => self.buttons[b.index()],
            InputId::Front(r) => self.front[r.index()],
            InputId::Rear(r) => self.rear[r.index()],
        }
    }

    pub fn set(&mut self, input: InputId, target: MapTarget) {
        match input {
            InputId::Button(b) => self.buttons[b.index()] = target,
            InputId::Front(r) => self.front[r.index()] = target,
            InputId::Rear(r) => self.rear[r.index()] = target,
        }
    }

    /// Build a table from `input name → target name` entries, as stored in
    /// a `[controller_custom_map_N]` config section. The special keys
    /// `in_l2` / `in_r2` name the trigger-driving inputs.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut table = Self::empty();
        for (key, value) in entries {
            match key {
                "in_l2" => table.in_l2 = Some(InputId::parse(value)?),
                "in_r2" => table.in_r2 = Some(InputId::parse(value)?),
                input => table.set(InputId::parse(input)?, MapTarget::parse(value)?),
            }
        }
        Ok(table)
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_preset_passthrough() {
        let t = MappingTable::standard();
        assert_eq!(
            t.lookup(InputId::Button(LocalButton::Cross)),
            MapTarget::Cross
        );
        assert_eq!(t.lookup(InputId::Button(LocalButton::L)), MapTarget::L1);
        assert_eq!(
            t.lookup(InputId::Rear(RearRegion::UpperLeft)),
            MapTarget::L2
        );
        assert_eq!(
            t.lookup(InputId::Front(FrontRegion::Center)),
            MapTarget::Touchpad
        );
        assert_eq!(t.in_l2, Some(InputId::Rear(RearRegion::UpperLeft)));
    }

    #[test]
    fn unknown_preset_falls_back_to_standard() {
        assert_eq!(MappingTable::preset(42), MappingTable::standard());
    }

    #[test]
    fn set_and_lookup() {
        let mut t = MappingTable::empty();
        t.set(InputId::Front(FrontRegion::ArcUpperLeft), MapTarget::L2);
        assert_eq!(
            t.lookup(InputId::Front(FrontRegion::ArcUpperLeft)),
            MapTarget::L2
        );
        assert_eq!(
            t.lookup(InputId::Front(FrontRegion::ArcUpperRight)),
            MapTarget::None
        );
    }

    #[test]
    fn from_entries_roundtrip() {
        let t = MappingTable::from_entries([
            ("cross", "circle"),
            ("circle", "cross"),
            ("front_arc_ul", "l2"),
            ("in_l2", "front_arc_ul"),
        ])
        .unwrap();
        assert_eq!(
            t.lookup(InputId::Button(LocalButton::Cross)),
            MapTarget::Circle
        );
        assert_eq!(
            t.lookup(InputId::Button(LocalButton::Circle)),
            MapTarget::Cross
        );
        assert_eq!(t.in_l2, Some(InputId::Front(FrontRegion::ArcUpperLeft)));
    }

    #[test]
    fn from_entries_rejects_unknown_names() {
        assert!(MappingTable::from_entries([("warp", "cross")]).is_err());
        assert!(MappingTable::from_entries([("cross", "warp")]).is_err());
    }

    #[test]
    fn target_bits_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for target in [
            MapTarget::Triangle,
            MapTarget::Circle,
            MapTarget::Cross,
            MapTarget::Square,
            MapTarget::L1,
            MapTarget::R1,
            MapTarget::L2,
            MapTarget::R2,
            MapTarget::L3,
            MapTarget::R3,
            MapTarget::Share,
            MapTarget::Options,
            MapTarget::DpadUp,
            MapTarget::DpadDown,
            MapTarget::DpadLeft,
            MapTarget::DpadRight,
        ] {
            let bit = target.button_bit().unwrap();
            assert!(seen.insert(bit), "duplicate bit for {target:?}");
        }
        assert!(MapTarget::None.button_bit().is_none());
        assert!(MapTarget::Touchpad.button_bit().is_none());
        assert!(MapTarget::Ps.button_bit().is_none());
    }

    #[test]
    fn parse_name_roundtrip() {
        for target in [
            MapTarget::Triangle,
            MapTarget::Touchpad,
            MapTarget::DpadLeft,
            MapTarget::None,
        ] {
            assert_eq!(MapTarget::parse(target.name()).unwrap(), target);
        }
    }
}
