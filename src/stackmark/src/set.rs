use derive_where::derive_where;

use crate::{
    frames::StackThread,
    kind::{BarrierKind, KindId},
    position::FramePosition,
    watermark::StackWatermark,
};

/// The watermarks installed on one thread, at most one per kind.
///
/// Runtime hooks are broadcast to every watermark in insertion order. Kinds with differing
/// concrete types can share a set through `Box<dyn BarrierKind<..>>`.
#[derive_where(Debug, Default)]
pub struct WatermarkSet<T: StackThread, K: BarrierKind<T>> {
    watermarks: Vec<StackWatermark<T, K>>,
}

impl<T: StackThread, K: BarrierKind<T>> WatermarkSet<T, K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, watermark: StackWatermark<T, K>) {
        let kind = watermark.kind().id();
        assert!(
            self.get(kind).is_none(),
            "a stack watermark for kind {kind} is already installed on tid {}",
            watermark.thread().thread_id(),
        );

        self.watermarks.push(watermark);
    }

    pub fn get(&self, kind: KindId) -> Option<&StackWatermark<T, K>> {
        self.watermarks.iter().find(|wm| wm.kind().id() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackWatermark<T, K>> + '_ {
        self.watermarks.iter()
    }

    pub fn len(&self) -> usize {
        self.watermarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watermarks.is_empty()
    }

    fn installed(&self, kind: KindId) -> &StackWatermark<T, K> {
        self.get(kind)
            .unwrap_or_else(|| panic!("no stack watermark for kind {kind} is installed"))
    }

    // === Per-kind operations === //

    pub fn processing_started(&self, kind: KindId) -> bool {
        self.installed(kind).processing_started()
    }

    pub fn start_processing(&self, kind: KindId) -> Result<(), K::Error> {
        self.installed(kind).request_iteration_start()
    }

    pub fn finish_processing(
        &self,
        kind: KindId,
        context: Option<&mut K::Context>,
    ) -> Result<(), K::Error> {
        self.installed(kind).drain_to_completion(context)
    }

    /// The innermost published boundary over all kinds that are still in progress.
    pub fn lowest_watermark(&self) -> FramePosition {
        self.watermarks
            .iter()
            .map(|wm| wm.watermark())
            .filter(|position| !position.is_none())
            .reduce(FramePosition::innermost)
            .unwrap_or(FramePosition::NONE)
    }

    // === Broadcast hooks === //

    pub fn on_safepoint(&self) -> Result<(), K::Error> {
        for wm in &self.watermarks {
            wm.on_safepoint()?;
        }
        Ok(())
    }

    pub fn on_iteration(&self, frame: &T::Frame) -> Result<(), K::Error> {
        for wm in &self.watermarks {
            wm.on_iteration(frame)?;
        }
        Ok(())
    }

    pub fn before_unwind(&self) -> Result<(), K::Error> {
        for wm in &self.watermarks {
            wm.before_unwind()?;
        }
        Ok(())
    }

    pub fn after_unwind(&self) -> Result<(), K::Error> {
        for wm in &self.watermarks {
            wm.after_unwind()?;
        }
        Ok(())
    }
}

// === Tests === //
