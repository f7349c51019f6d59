use std::fmt;

// === FramePosition === //

/// The stack-pointer value of a frame, used to order frames along a stack.
///
/// Stacks are assumed to grow towards lower addresses, so the innermost (most recently called)
/// frame has the numerically smallest position. All ordering goes through
/// [`FramePosition::is_inner_than`]; the type intentionally does not implement `Ord` so that no
/// comparison can silently pick the other direction.
///
/// The zero position is reserved as the "no boundary" sentinel ([`FramePosition::NONE`]).
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct FramePosition(usize);

impl FramePosition {
    pub const NONE: Self = Self(0);

    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if a frame at `self` was called (transitively) by a frame at `other`, i.e.
    /// `self` sits strictly closer to the innermost frame.
    pub const fn is_inner_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    pub const fn is_outer_than(self, other: Self) -> bool {
        other.is_inner_than(self)
    }

    /// Picks whichever of the two positions is closer to the innermost frame.
    pub const fn innermost(self, other: Self) -> Self {
        if self.is_inner_than(other) {
            self
        } else {
            other
        }
    }
}

impl fmt::Debug for FramePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("FramePosition(none)")
        } else {
            write!(f, "FramePosition({:#x})", self.0)
        }
    }
}

impl fmt::Display for FramePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// === Tests === //
