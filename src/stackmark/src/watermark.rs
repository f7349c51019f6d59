use std::{fmt, sync::Arc};

use crate::{
    config::{ConfigError, WatermarkConfig},
    epoch::EpochSource,
    frames::{StackFrame, StackThread, WalkOptions},
    iterator::{DrainStatus, StackIterator},
    kind::BarrierKind,
    position::FramePosition,
    state::{AtomicWatermarkState, Epoch, Phase, WatermarkState},
    sync::{AtomicUsize, NoSafepointGuard, NoSafepointLock, Ordering},
};

// === Locked === //

struct Locked<T: StackThread> {
    iterator: Option<StackIterator<T>>,

    /// The campaign `iterator` walks for. Published states always carry this epoch, even if the
    /// epoch source has moved on in the meantime.
    epoch: Epoch,
}

// === StackWatermark === //

/// Tracks how far one thread's stack has been processed for the current campaign of one kind.
///
/// The owning thread makes incremental progress through [`advance_one`](Self::advance_one) at its
/// polling points, while other threads can demand the whole stack through
/// [`drain_to_completion`](Self::drain_to_completion). All mutation happens under a lock that
/// never polls for safepoints. The published [`watermark`](Self::watermark) and
/// [`state`](Self::state) can be read without it: both are release-stored after the frames they
/// describe have been processed.
pub struct StackWatermark<T: StackThread, K: BarrierKind<T>> {
    state: AtomicWatermarkState,
    watermark: AtomicUsize,
    thread: T,
    kind: K,
    epochs: Arc<dyn EpochSource>,
    config: WatermarkConfig,
    lock: NoSafepointLock<Locked<T>>,
}

impl<T: StackThread, K: BarrierKind<T>> fmt::Debug for StackWatermark<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackWatermark")
            .field("tid", &self.thread.thread_id())
            .field("kind", &self.kind.id())
            .field("state", &self.state())
            .field("watermark", &self.watermark())
            .finish_non_exhaustive()
    }
}

impl<T: StackThread, K: BarrierKind<T>> StackWatermark<T, K> {
    /// Creates a watermark that considers the thread fully processed for the current epoch.
    pub fn new(thread: T, kind: K, epochs: Arc<dyn EpochSource>) -> Self {
        Self::new_unchecked(thread, kind, epochs, WatermarkConfig::default())
    }

    pub fn with_config(
        thread: T,
        kind: K,
        epochs: Arc<dyn EpochSource>,
        config: WatermarkConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new_unchecked(thread, kind, epochs, config))
    }

    fn new_unchecked(
        thread: T,
        kind: K,
        epochs: Arc<dyn EpochSource>,
        config: WatermarkConfig,
    ) -> Self {
        let epoch = epochs.current_epoch(kind.id());

        Self {
            state: AtomicWatermarkState::new(WatermarkState::new(epoch, true)),
            watermark: AtomicUsize::new(0),
            thread,
            kind,
            epochs,
            config,
            lock: NoSafepointLock::new(Locked {
                iterator: None,
                epoch,
            }),
        }
    }

    pub fn thread(&self) -> &T {
        &self.thread
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    pub fn epoch_id(&self) -> Epoch {
        self.epochs.current_epoch(self.kind.id())
    }

    // === Lock-free queries === //

    pub fn watermark(&self) -> FramePosition {
        FramePosition::new(self.watermark.load(Ordering::Acquire))
    }

    pub fn state(&self) -> WatermarkState {
        self.state.load_acquire()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase(self.epoch_id())
    }

    pub fn processing_started(&self) -> bool {
        self.phase() != Phase::Stale
    }

    pub fn processing_completed(&self) -> bool {
        self.phase() == Phase::Done
    }

    /// Whether a frame at `position` lies in the region that may still need processing.
    pub fn is_above_watermark(&self, position: FramePosition) -> bool {
        let watermark = self.watermark();
        !watermark.is_none() && !position.is_inner_than(watermark)
    }

    fn should_start_iteration_acquire(&self) -> bool {
        !self.state.load_acquire().is_epoch(self.epoch_id())
    }

    // === Locked operations === //

    fn should_start_iteration(&self, _locked: &Locked<T>) -> bool {
        !self.state.load_locked().is_epoch(self.epoch_id())
    }

    fn start_iteration_impl(
        &self,
        locked: &mut Locked<T>,
        mut context: Option<&mut K::Context>,
    ) -> Result<(), K::Error> {
        let epoch = self.epoch_id();
        tracing::info!(
            "Starting stack processing iteration for tid {} (kind {}, epoch {epoch})",
            self.thread.thread_id(),
            self.kind.id(),
        );

        locked.iterator = None;

        if self.thread.has_walkable_stack() {
            let mut iterator = StackIterator::new(self.thread.walk_stack(WalkOptions::INCREMENTAL));

            // The innermost frame and its caller have to be safe before anyone can observe this
            // campaign as started, so that a callee can read its caller's frame without a barrier.
            // One more frame covers a thread that unwinds into the runtime and immediately polls
            // again on the way out.
            for _ in 0..self.config.initial_frames {
                if let Err(err) =
                    iterator.process_one_step(&self.thread, &self.kind, context.as_deref_mut())
                {
                    tracing::warn!(
                        "Failed to start stack processing iteration for tid {}: {err}",
                        self.thread.thread_id(),
                    );
                    return Err(err);
                }
            }

            locked.iterator = Some(iterator);
        }

        locked.epoch = epoch;
        self.update_watermark(locked);

        Ok(())
    }

    fn update_watermark(&self, locked: &Locked<T>) {
        match &locked.iterator {
            Some(iterator) if iterator.has_next() => {
                debug_assert!(!iterator.callee().is_none(), "sanity");

                self.watermark
                    .store(iterator.callee().addr(), Ordering::Release);
                // Release the watermark with respect to the epoch.
                self.state
                    .store_release(WatermarkState::new(locked.epoch, false));
            }
            _ => {
                let done = WatermarkState::new(locked.epoch, true);
                let was_done = self.state.load_locked() == done;

                // Release stack data modifications with respect to the watermark.
                self.watermark.store(0, Ordering::Release);
                self.state.store_release(done);

                if !was_done {
                    tracing::info!(
                        "Finished stack processing iteration for tid {} (kind {}, epoch {})",
                        self.thread.thread_id(),
                        self.kind.id(),
                        locked.epoch,
                    );
                }
            }
        }
    }

    fn drain(
        &self,
        locked: &mut NoSafepointGuard<'_, Locked<T>>,
        mut context: Option<&mut K::Context>,
    ) -> Result<(), K::Error> {
        if locked.iterator.is_none() {
            return Ok(());
        }

        tracing::info!(
            "Processing whole stack for tid {} (kind {})",
            self.thread.thread_id(),
            self.kind.id(),
        );

        loop {
            let Some(iterator) = locked.iterator.as_mut() else {
                return Ok(());
            };

            let status = iterator.drain_batch(
                &self.thread,
                &self.kind,
                context.as_deref_mut(),
                self.config.frames_per_yield,
            )?;

            match status {
                DrainStatus::Exhausted => return Ok(()),
                DrainStatus::Yield => {
                    // Let the owning thread make progress before we carry on.
                    self.update_watermark(locked);
                    tracing::debug!(
                        "Yielding stack watermark lock of tid {} to {} waiters after {} barrier frames",
                        self.thread.thread_id(),
                        self.lock.waiters(),
                        self.config.frames_per_yield,
                    );
                    locked.yield_fair();
                }
            }
        }
    }

    // === Public operations === //

    /// Makes one increment of progress, starting a new iteration if the campaign changed.
    ///
    /// Intended to be called by the owning thread from its polling points.
    pub fn advance_one(&self) -> Result<(), K::Error> {
        let mut locked = self.lock.lock();

        if self.should_start_iteration(&locked) {
            return self.start_iteration_impl(&mut locked, None);
        }

        let Some(iterator) = locked.iterator.as_mut() else {
            return Ok(());
        };

        let result = iterator.process_one_step(&self.thread, &self.kind, None);
        self.update_watermark(&locked);
        result
    }

    /// The outermost boundary below which every frame is known to be processed, or
    /// [`FramePosition::NONE`] if the campaign has not started, has completed, or has nothing to
    /// process.
    pub fn last_processed_boundary(&self) -> FramePosition {
        let locked = self.lock.lock();

        if self.should_start_iteration(&locked) {
            // Stale state; no last processed.
            return FramePosition::NONE;
        }

        if self.state.load_locked().is_done() {
            // Already processed all; no last processed.
            return FramePosition::NONE;
        }

        locked
            .iterator
            .as_ref()
            .map_or(FramePosition::NONE, |iterator| iterator.caller())
    }

    /// Ensures the current campaign has started on this thread. Cheap when it already has.
    pub fn request_iteration_start(&self) -> Result<(), K::Error> {
        if !self.should_start_iteration_acquire() {
            return Ok(());
        }

        let mut locked = self.lock.lock();
        if self.should_start_iteration(&locked) {
            self.start_iteration_impl(&mut locked, None)?;
        }

        Ok(())
    }

    /// Processes every remaining frame before returning, periodically yielding the lock to the
    /// owning thread.
    ///
    /// Completion is only guaranteed for the campaign that was current when the drain started. If
    /// the epoch advances during a yield, the drain still finishes and publishes the old walk, so
    /// [`phase`](Self::phase) reads [`Phase::Stale`] afterwards even though this returned `Ok`.
    pub fn drain_to_completion(
        &self,
        mut context: Option<&mut K::Context>,
    ) -> Result<(), K::Error> {
        let mut locked = self.lock.lock();

        if self.should_start_iteration(&locked) {
            self.start_iteration_impl(&mut locked, context.as_deref_mut())?;
        }

        let result = self.drain(&mut locked, context);
        self.update_watermark(&locked);
        result
    }

    pub fn is_frame_safe(&self, frame: &T::Frame) -> bool {
        let locked = self.lock.lock();
        let state = self.state.load_locked();

        if !state.is_epoch(self.epoch_id()) {
            return false;
        }

        if state.is_done() {
            return true;
        }

        let Some(iterator) = &locked.iterator else {
            return true;
        };

        let position = if frame.is_trampoline() {
            self.thread
                .sender(frame)
                .map_or_else(|| frame.position(), |sender| sender.position())
        } else {
            frame.position()
        };

        position.is_inner_than(iterator.caller())
    }

    // === Runtime hooks === //

    /// Processes frames until `frame` is safe for the current campaign.
    pub fn ensure_safe(&self, frame: &T::Frame) -> Result<(), K::Error> {
        while !self.is_frame_safe(frame) {
            self.advance_one()?;
        }

        Ok(())
    }

    /// Called before a foreign stack walk hands out `frame`.
    pub fn on_iteration(&self, frame: &T::Frame) -> Result<(), K::Error> {
        if self.kind.process_on_iteration() {
            self.ensure_safe(frame)?;
        }

        Ok(())
    }

    /// Called before the thread pops its top frame, which exposes that frame's caller.
    pub fn before_unwind(&self) -> Result<(), K::Error> {
        let Some(top) = self.top_frame() else {
            return Ok(());
        };

        match self.thread.sender(&top) {
            Some(caller) => self.ensure_safe(&caller),
            None => Ok(()),
        }
    }

    /// Called after the thread popped a frame, which exposed the new top frame.
    pub fn after_unwind(&self) -> Result<(), K::Error> {
        match self.top_frame() {
            Some(top) => self.ensure_safe(&top),
            None => Ok(()),
        }
    }

    pub fn on_safepoint(&self) -> Result<(), K::Error> {
        self.request_iteration_start()
    }

    fn top_frame(&self) -> Option<T::Frame> {
        let frame = self.thread.last_frame()?;

        if frame.is_trampoline() {
            self.thread.sender(&frame)
        } else {
            Some(frame)
        }
    }
}

// === Tests === //


#[cfg(all(loom, test))]
mod loom_tests {
    use loom::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::{
        test_util::{frames, RecordingKind, SimFrame, SimThread},
        EpochCounter, KindId, Phase, WatermarkConfig,
    };

    use super::*;

    const FRAMES: usize = 4;

    /// A watermark whose campaign has been invalidated but not restarted yet.
    fn stale_watermark(kind: RecordingKind) -> StackWatermark<SimThread, RecordingKind> {
        let epochs = std::sync::Arc::new(EpochCounter::new(1));

        let wm = StackWatermark::with_config(
            SimThread::new(1, frames(FRAMES, |_| true)),
            kind,
            epochs.clone(),
            WatermarkConfig {
                initial_frames: 2,
                frames_per_yield: 1,
            },
        )
        .unwrap();

        epochs.advance(KindId(0));
        assert_eq!(wm.phase(), Phase::Stale);
        wm
    }

    #[test]
    fn published_boundaries_cover_processed_frames() {
        loom::model(|| {
            let data = Arc::new((0..FRAMES).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
            let kind = RecordingKind::new(0).with_hook({
                let data = data.clone();
                move |frame: &SimFrame| data[frame.index].store(1, Ordering::Relaxed)
            });
            let wm = Arc::new(stale_watermark(kind));

            let owner = loom::thread::spawn({
                let wm = wm.clone();
                move || {
                    wm.advance_one().unwrap();
                    wm.advance_one().unwrap();
                }
            });

            let state = wm.state();
            let boundary = wm.watermark();

            if state.is_epoch(1) {
                for index in 0..FRAMES {
                    let position = SimFrame::position_of(index);
                    let covered = state.is_done()
                        || (!boundary.is_none() && position.is_inner_than(boundary));

                    if covered {
                        assert_eq!(data[index].load(Ordering::Relaxed), 1);
                    }
                }
            }

            owner.join().unwrap();
        });
    }

    #[test]
    fn drains_and_increments_share_one_walk() {
        loom::model(|| {
            let wm = Arc::new(stale_watermark(RecordingKind::new(0)));

            let drainer = loom::thread::spawn({
                let wm = wm.clone();
                move || wm.drain_to_completion(None).unwrap()
            });

            wm.advance_one().unwrap();
            drainer.join().unwrap();

            assert_eq!(wm.phase(), Phase::Done);
            assert_eq!(wm.kind().processed(), (0..FRAMES).collect::<Vec<_>>());
        });
    }
}
