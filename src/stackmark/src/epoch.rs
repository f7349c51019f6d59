use std::fmt;

use crate::{
    kind::KindId,
    state::{Epoch, EPOCH_MASK},
    sync::{AtomicU32, Ordering},
};

// === EpochSource === //

/// The authority that names the current campaign of each kind. Watermarks only ever read it.
pub trait EpochSource: Send + Sync {
    fn current_epoch(&self, kind: KindId) -> Epoch;
}

impl<F> EpochSource for F
where
    F: Fn(KindId) -> Epoch + Send + Sync,
{
    fn current_epoch(&self, kind: KindId) -> Epoch {
        self(kind)
    }
}

// === EpochCounter === //

/// A set of per-kind campaign counters.
///
/// Advancing a kind's counter starts a new campaign for it: every watermark of that kind becomes
/// stale and restarts processing the next time it is consulted.
pub struct EpochCounter {
    epochs: Box<[AtomicU32]>,
}

impl fmt::Debug for EpochCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.epochs.iter().map(|epoch| epoch.load(Ordering::Relaxed)))
            .finish()
    }
}

impl EpochCounter {
    pub fn new(kind_count: u8) -> Self {
        Self {
            epochs: (0..kind_count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = KindId> + '_ {
        (0..self.epochs.len()).map(|index| KindId(index as u8))
    }

    pub fn current(&self, kind: KindId) -> Epoch {
        self.slot(kind).load(Ordering::Acquire)
    }

    /// Starts a new campaign for `kind`, returning its epoch.
    pub fn advance(&self, kind: KindId) -> Epoch {
        let prev = self
            .slot(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |epoch| {
                Some(epoch.wrapping_add(1) & EPOCH_MASK)
            })
            // The closure never rejects an update.
            .unwrap_or_else(|epoch| epoch);

        prev.wrapping_add(1) & EPOCH_MASK
    }

    pub fn advance_all(&self) {
        for kind in self.kinds() {
            self.advance(kind);
        }
    }

    fn slot(&self, kind: KindId) -> &AtomicU32 {
        self.epochs.get(kind.index()).unwrap_or_else(|| {
            panic!(
                "campaign kind {kind} is not registered with this counter ({} kinds)",
                self.epochs.len()
            )
        })
    }
}

impl EpochSource for EpochCounter {
    fn current_epoch(&self, kind: KindId) -> Epoch {
        self.current(kind)
    }
}

// === Tests === //
