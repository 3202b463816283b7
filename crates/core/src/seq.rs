//! 16-bit sequence numbers with modular ordering.
//!
//! The session transport numbers video units with a 16-bit counter that
//! wraps. Two values are compared by *signed* 16-bit distance:
//! `a` precedes `b` iff `(a - b) as i16 < 0`. This keeps ordering stable
//! across rollover — after 65535 comes 0, and 0 is "later".
//!
//! There is deliberately no `Ord` impl: the relation is not a total order
//! (it is only meaningful for values less than half the ring apart), so
//! comparisons go through explicit [`dist`](SeqNum16::dist) /
//! [`precedes`](SeqNum16::precedes) calls.

use std::fmt;

/// A 16-bit wrapping sequence number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum16(pub u16);

impl SeqNum16 {
    /// Signed modular distance from `other` to `self`.
    ///
    /// Positive when `self` is ahead of `other`, negative when behind.
    /// `SeqNum16(0).dist(SeqNum16(65535)) == 1`.
    pub fn dist(self, other: SeqNum16) -> i16 {
        self.0.wrapping_sub(other.0) as i16
    }

    /// Whether `self` comes strictly before `other` in modular order.
    pub fn precedes(self, other: SeqNum16) -> bool {
        self.dist(other) < 0
    }

    /// The next sequence number, wrapping at 65535.
    pub fn next(self) -> SeqNum16 {
        SeqNum16(self.0.wrapping_add(1))
    }

    /// Advance by `n`, wrapping.
    pub fn add(self, n: u16) -> SeqNum16 {
        SeqNum16(self.0.wrapping_add(n))
    }
}

impl From<u16> for SeqNum16 {
    fn from(v: u16) -> Self {
        SeqNum16(v)
    }
}

impl fmt::Debug for SeqNum16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNum16({})", self.0)
    }
}

impl fmt::Display for SeqNum16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
