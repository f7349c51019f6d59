use std::fmt;

use crate::sync::{AtomicU32, Ordering};

/// Identifier of a stack-processing campaign. Only the low [`EPOCH_BITS`] bits are significant.
pub type Epoch = u32;

pub const EPOCH_BITS: u32 = u32::BITS - 1;

pub const EPOCH_MASK: Epoch = Epoch::MAX >> 1;

// === Phase === //

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Nothing has been processed for the current campaign yet.
    Stale,
    /// Some frames have been processed; frames outside the published boundary are safe.
    InProgress,
    /// Every frame is safe for the current campaign.
    Done,
}

// === WatermarkState === //

/// The `{epoch, done}` pair packed into a single word so that both halves are always observed
/// together.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct WatermarkState(u32);

impl WatermarkState {
    pub const fn new(epoch: Epoch, is_done: bool) -> Self {
        Self(((epoch & EPOCH_MASK) << 1) | is_done as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn epoch(self) -> Epoch {
        self.0 >> 1
    }

    pub const fn is_done(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn is_epoch(self, epoch: Epoch) -> bool {
        self.epoch() == epoch & EPOCH_MASK
    }

    pub const fn phase(self, current: Epoch) -> Phase {
        if !self.is_epoch(current) {
            Phase::Stale
        } else if self.is_done() {
            Phase::Done
        } else {
            Phase::InProgress
        }
    }
}

impl fmt::Debug for WatermarkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkState")
            .field("epoch", &self.epoch())
            .field("is_done", &self.is_done())
            .finish()
    }
}

// === AtomicWatermarkState === //

pub(crate) struct AtomicWatermarkState(AtomicU32);

impl AtomicWatermarkState {
    pub fn new(state: WatermarkState) -> Self {
        Self(AtomicU32::new(state.raw()))
    }

    pub fn load_acquire(&self) -> WatermarkState {
        WatermarkState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Only meaningful while the watermark lock is held, since every store happens under it.
    pub fn load_locked(&self) -> WatermarkState {
        WatermarkState::from_raw(self.0.load(Ordering::Relaxed))
    }

    pub fn store_release(&self, state: WatermarkState) {
        self.0.store(state.raw(), Ordering::Release);
    }
}

// === Tests === //
