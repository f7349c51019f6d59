use derive_where::derive_where;

use crate::{
    frames::{FrameWalker, StackFrame, StackThread},
    kind::BarrierKind,
    mark::ProcessingMark,
    position::FramePosition,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DrainStatus {
    /// A full yield interval of barrier frames was processed and frames remain.
    Yield,
    Exhausted,
}

// === StackIterator === //

/// A single forward pass over one thread's stack, innermost frame first.
///
/// Besides the walk itself, the iterator remembers the last two distinct boundaries it recorded.
/// `caller` is always the outer of the two; every frame strictly inner than it has been processed.
/// `callee` trails one step behind and is what gets published, so the two innermost live frames
/// are never both considered in flight.
#[derive_where(Debug)]
pub struct StackIterator<T: StackThread> {
    #[derive_where(skip)]
    walker: T::Walker,
    callee: FramePosition,
    caller: FramePosition,
    is_done: bool,
}

impl<T: StackThread> StackIterator<T> {
    pub fn new(walker: T::Walker) -> Self {
        let is_done = walker.is_done();

        Self {
            walker,
            callee: FramePosition::NONE,
            caller: FramePosition::NONE,
            is_done,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.is_done
    }

    pub fn current_frame(&self) -> &T::Frame {
        debug_assert!(self.has_next());
        self.walker.current_frame()
    }

    pub fn current_registers(&self) -> &T::Registers {
        debug_assert!(self.has_next());
        self.walker.current_registers()
    }

    pub fn advance(&mut self) {
        self.walker.advance();
        self.is_done = self.walker.is_done();
    }

    pub fn callee(&self) -> FramePosition {
        self.callee
    }

    pub fn caller(&self) -> FramePosition {
        self.caller
    }

    pub fn record_boundary(&mut self, position: FramePosition) {
        if !self.has_next() {
            return;
        }

        if self.callee.is_none() {
            self.callee = position;
        } else if self.caller.is_none() {
            self.caller = position;
        } else {
            self.callee = self.caller;
            self.caller = position;
        }
    }

    /// Processes frames up to and including the next barrier frame, then records the position of
    /// the last frame visited.
    ///
    /// The boundary is recorded even if the processor fails or panics; a frame only counts as
    /// visited once it has been processed successfully.
    pub fn process_one_step<K: BarrierKind<T>>(
        &mut self,
        thread: &T,
        kind: &K,
        mut context: Option<&mut K::Context>,
    ) -> Result<(), K::Error> {
        let _mark = ProcessingMark::new(thread);

        let mut step = scopeguard::guard((self, FramePosition::NONE), |(iter, last)| {
            if !last.is_none() {
                iter.record_boundary(last);
            }
        });
        let (iter, last) = &mut *step;

        while iter.has_next() {
            let frame = iter.current_frame();
            let position = frame.position();
            let has_barrier = kind.has_barrier(frame);

            kind.process(frame, iter.current_registers(), context.as_deref_mut())?;
            iter.advance();
            *last = position;

            if has_barrier {
                break;
            }
        }

        Ok(())
    }

    /// Processes frames until `frames_per_yield` barrier frames have been handled or the stack
    /// runs out, recording a boundary after every barrier frame.
    pub fn drain_batch<K: BarrierKind<T>>(
        &mut self,
        thread: &T,
        kind: &K,
        mut context: Option<&mut K::Context>,
        frames_per_yield: usize,
    ) -> Result<DrainStatus, K::Error> {
        let _mark = ProcessingMark::new(thread);
        let mut barrier_frames = 0;

        while self.has_next() {
            let frame = self.current_frame();
            let position = frame.position();
            debug_assert!(
                !position.is_inner_than(self.caller),
                "frame at {position} lies inside the region already processed up to {}",
                self.caller,
            );
            let has_barrier = kind.has_barrier(frame);

            kind.process(frame, self.current_registers(), context.as_deref_mut())?;
            self.advance();

            if has_barrier {
                self.record_boundary(position);

                barrier_frames += 1;
                if barrier_frames == frames_per_yield {
                    return Ok(DrainStatus::Yield);
                }
            }
        }

        Ok(DrainStatus::Exhausted)
    }
}

// === Tests === //
