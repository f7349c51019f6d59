use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use stackmark::{
    BarrierKind, EpochCounter, FramePosition, FrameWalker, KindId, ProcessingScopes,
    StackFrame, StackThread, StackWatermark, WatermarkConfig,
};
use thiserror::Error;

const FRAMES: usize = 32;

// === Toy runtime === //

/// A frame holding one pointer-sized slot that the collector may need to fix up.
#[derive(Debug, Clone)]
struct ToyFrame {
    sp: usize,
    slot: Arc<AtomicU64>,
    compiled: bool,
}

impl StackFrame for ToyFrame {
    fn position(&self) -> FramePosition {
        FramePosition::new(self.sp)
    }
}

#[derive(Clone)]
struct ToyThread {
    frames: Arc<Vec<ToyFrame>>,
    pending: Arc<Mutex<Option<String>>>,
}

impl ToyThread {
    fn new() -> Self {
        let frames = (0..FRAMES)
            .map(|index| ToyFrame {
                sp: 0x7000_0000 + index * 0x80,
                slot: Arc::new(AtomicU64::new(index as u64)),
                compiled: index % 3 != 1,
            })
            .collect();

        Self {
            frames: Arc::new(frames),
            pending: Arc::default(),
        }
    }
}

impl ProcessingScopes for ToyThread {
    type PendingError = String;

    fn take_pending_error(&self) -> Option<String> {
        self.pending.lock().take()
    }

    fn restore_pending_error(&self, error: String) {
        *self.pending.lock() = Some(error);
    }
}

struct ToyWalker {
    frames: Arc<Vec<ToyFrame>>,
    cursor: usize,
}

impl FrameWalker for ToyWalker {
    type Frame = ToyFrame;
    type Registers = ();

    fn is_done(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    fn current_frame(&self) -> &ToyFrame {
        &self.frames[self.cursor]
    }

    fn current_registers(&self) -> &() {
        &()
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }
}

impl StackThread for ToyThread {
    type Frame = ToyFrame;
    type Registers = ();
    type Walker = ToyWalker;

    fn thread_id(&self) -> u64 {
        1
    }

    fn has_walkable_stack(&self) -> bool {
        true
    }

    fn walk_stack(&self, _options: stackmark::WalkOptions) -> ToyWalker {
        ToyWalker {
            frames: self.frames.clone(),
            cursor: 0,
        }
    }

    fn last_frame(&self) -> Option<ToyFrame> {
        self.frames.first().cloned()
    }

    fn sender(&self, frame: &ToyFrame) -> Option<ToyFrame> {
        self.frames.iter().find(|f| f.sp > frame.sp).cloned()
    }
}

// === Relocation === //

#[derive(Debug, Error)]
enum RelocateError {
    #[error("slot at {0} holds a poisoned value")]
    Poisoned(FramePosition),
}

/// Moves every slot value into the "new space" by tagging its high bit.
struct Relocate;

const NEW_SPACE: u64 = 1 << 63;

impl BarrierKind<ToyThread> for Relocate {
    type Context = usize;
    type Error = RelocateError;

    fn id(&self) -> KindId {
        KindId(0)
    }

    fn has_barrier(&self, frame: &ToyFrame) -> bool {
        frame.compiled
    }

    fn process(
        &self,
        frame: &ToyFrame,
        _registers: &(),
        context: Option<&mut usize>,
    ) -> Result<(), RelocateError> {
        let old = frame.slot.fetch_or(NEW_SPACE, Ordering::AcqRel);
        if old == u64::MAX {
            return Err(RelocateError::Poisoned(frame.position()));
        }

        if let Some(moved) = context {
            *moved += 1;
        }

        // Pretend the copy is expensive.
        thread::sleep(Duration::from_millis(2));
        Ok(())
    }
}

fn main() -> Result<(), RelocateError> {
    tracing_subscriber::fmt::init();

    let config = WatermarkConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!("Ignoring watermark overrides: {err}");
        WatermarkConfig::default()
    });

    let epochs = Arc::new(EpochCounter::new(1));
    let toy = ToyThread::new();
    let watermark = StackWatermark::with_config(toy.clone(), Relocate, epochs.clone(), config)
        .unwrap_or_else(|err| panic!("invalid watermark config: {err}"));

    epochs.advance(KindId(0));

    thread::scope(|s| {
        // The mutator keeps returning into its callers, making them safe one at a time.
        let mutator = s.spawn(|| -> Result<(), RelocateError> {
            watermark.on_safepoint()?;

            for frame in toy.frames.iter().take(FRAMES / 2) {
                watermark.ensure_safe(frame)?;
                assert_ne!(frame.slot.load(Ordering::Acquire) & NEW_SPACE, 0);
            }
            Ok(())
        });

        // Meanwhile the collector wants the whole stack.
        let mut moved = 0;
        let drained = watermark.drain_to_completion(Some(&mut moved));
        tracing::info!("Collector relocated {moved} slots");

        mutator.join().unwrap_or_else(|err| std::panic::resume_unwind(err))?;
        drained
    })?;

    let relocated = toy
        .frames
        .iter()
        .filter(|frame| frame.slot.load(Ordering::Acquire) & NEW_SPACE != 0)
        .count();
    tracing::info!("{relocated} of {FRAMES} slots relocated, phase {:?}", watermark.phase());

    Ok(())
}
