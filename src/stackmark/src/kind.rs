use std::{error::Error, fmt};

use crate::frames::StackThread;

// === KindId === //

/// Identifies a campaign kind. Each kind has its own epoch and its own watermark per thread.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KindId(pub u8);

impl KindId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KindId({})", self.0)
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// === BarrierKind === //

/// The per-campaign behavior plugged into a watermark: which frames need work and what that work
/// is.
pub trait BarrierKind<T: StackThread + ?Sized> {
    /// Opaque value threaded from [`drain_to_completion`](crate::StackWatermark::drain_to_completion)
    /// through to every [`process`](BarrierKind::process) call it causes.
    type Context;

    type Error: Error;

    fn id(&self) -> KindId;

    fn has_barrier(&self, frame: &T::Frame) -> bool;

    /// Brings a single frame up to date for the current campaign.
    ///
    /// This may be called again for a frame that was already processed if the campaign restarts,
    /// and a sequence of calls may be abandoned at any point.
    fn process(
        &self,
        frame: &T::Frame,
        registers: &T::Registers,
        context: Option<&mut Self::Context>,
    ) -> Result<(), Self::Error>;

    /// Whether frames handed out to foreign stack walks must be made safe first.
    fn process_on_iteration(&self) -> bool {
        true
    }
}

impl<T, K> BarrierKind<T> for Box<K>
where
    T: StackThread + ?Sized,
    K: BarrierKind<T> + ?Sized,
{
    type Context = K::Context;
    type Error = K::Error;

    fn id(&self) -> KindId {
        (**self).id()
    }

    fn has_barrier(&self, frame: &T::Frame) -> bool {
        (**self).has_barrier(frame)
    }

    fn process(
        &self,
        frame: &T::Frame,
        registers: &T::Registers,
        context: Option<&mut Self::Context>,
    ) -> Result<(), Self::Error> {
        (**self).process(frame, registers, context)
    }

    fn process_on_iteration(&self) -> bool {
        (**self).process_on_iteration()
    }
}
