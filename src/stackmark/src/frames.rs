//! The frame-walking capabilities a runtime provides to the watermark machinery.

use crate::{mark::ProcessingScopes, position::FramePosition};

// === StackFrame === //

pub trait StackFrame {
    fn position(&self) -> FramePosition;

    /// Trampoline frames (safepoint handler stubs, runtime entry shims, ...) do not have a
    /// meaningful position of their own. Queries about them are answered for their sender.
    fn is_trampoline(&self) -> bool {
        false
    }
}

// === FrameWalker === //

/// How a [`StackThread`] should set up a walker.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WalkOptions {
    /// Keep the register snapshot up to date as frames are stepped over.
    pub update_registers: bool,

    /// Eagerly build per-frame metadata. The watermark only builds it for frames it visits.
    pub build_metadata: bool,
}

impl WalkOptions {
    pub const INCREMENTAL: Self = Self {
        update_registers: true,
        build_metadata: false,
    };
}

/// A forward-only cursor over a thread's frames, innermost first.
///
/// `current_frame` and `current_registers` may panic once `is_done` returns `true`.
pub trait FrameWalker {
    type Frame: StackFrame;
    type Registers;

    fn is_done(&self) -> bool;

    fn current_frame(&self) -> &Self::Frame;

    fn current_registers(&self) -> &Self::Registers;

    fn advance(&mut self);
}

// === StackThread === //

pub trait StackThread: ProcessingScopes {
    type Frame: StackFrame + Clone;
    type Registers;
    type Walker: FrameWalker<Frame = Self::Frame, Registers = Self::Registers>;

    /// Identifier used in log events.
    fn thread_id(&self) -> u64;

    /// Whether the thread currently has frames that can be walked at all.
    fn has_walkable_stack(&self) -> bool;

    fn walk_stack(&self, options: WalkOptions) -> Self::Walker;

    /// The innermost frame of the thread, if it has a walkable stack.
    fn last_frame(&self) -> Option<Self::Frame>;

    /// The caller of `frame`, or `None` for the outermost frame.
    fn sender(&self, frame: &Self::Frame) -> Option<Self::Frame>;
}
