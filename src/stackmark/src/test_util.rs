//! A simulated thread, walker, and barrier kind for exercising watermarks without a real stack.

use std::sync::{
    atomic::{AtomicIsize, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    BarrierKind, FramePosition, FrameWalker, KindId, ProcessingScopes, StackFrame, StackThread,
    WalkOptions,
};

pub const STACK_TOP: usize = 0x1000;

pub const FRAME_SIZE: usize = 0x100;

// === SimFrame === //

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SimFrame {
    pub index: usize,
    pub barrier: bool,
    pub trampoline: bool,
}

impl SimFrame {
    pub fn position_of(index: usize) -> FramePosition {
        FramePosition::new(STACK_TOP + index * FRAME_SIZE)
    }
}

impl StackFrame for SimFrame {
    fn position(&self) -> FramePosition {
        Self::position_of(self.index)
    }

    fn is_trampoline(&self) -> bool {
        self.trampoline
    }
}

/// Builds `count` frames, innermost first, marking those selected by `barrier`.
pub fn frames(count: usize, barrier: impl Fn(usize) -> bool) -> Vec<SimFrame> {
    (0..count)
        .map(|index| SimFrame {
            index,
            barrier: barrier(index),
            trampoline: false,
        })
        .collect()
}

// === SimThread === //

#[derive(Clone)]
pub struct SimThread(Arc<SimThreadInner>);

pub struct SimThreadInner {
    id: u64,
    frames: Mutex<Option<Vec<SimFrame>>>,
    pending_error: Mutex<Option<String>>,
    handle_scopes: AtomicIsize,
    resource_scopes: AtomicIsize,
    walks: AtomicUsize,
    last_walk_options: Mutex<Option<WalkOptions>>,
}

impl SimThread {
    pub fn new(id: u64, frames: Vec<SimFrame>) -> Self {
        Self(Arc::new(SimThreadInner {
            id,
            frames: Mutex::new(Some(frames)),
            pending_error: Mutex::new(None),
            handle_scopes: AtomicIsize::new(0),
            resource_scopes: AtomicIsize::new(0),
            walks: AtomicUsize::new(0),
            last_walk_options: Mutex::new(None),
        }))
    }

    pub fn without_stack(id: u64) -> Self {
        let thread = Self::new(id, Vec::new());
        thread.clear_stack();
        thread
    }

    pub fn set_frames(&self, frames: Vec<SimFrame>) {
        *self.0.frames.lock() = Some(frames);
    }

    pub fn clear_stack(&self) {
        *self.0.frames.lock() = None;
    }

    pub fn frame(&self, index: usize) -> SimFrame {
        self.0.frames.lock().as_ref().unwrap()[index].clone()
    }

    pub fn set_pending_error(&self, error: &str) {
        *self.0.pending_error.lock() = Some(error.to_string());
    }

    pub fn pending_error(&self) -> Option<String> {
        self.0.pending_error.lock().clone()
    }

    pub fn open_scopes(&self) -> (isize, isize) {
        (
            self.0.handle_scopes.load(Ordering::SeqCst),
            self.0.resource_scopes.load(Ordering::SeqCst),
        )
    }

    pub fn walks(&self) -> usize {
        self.0.walks.load(Ordering::SeqCst)
    }

    pub fn last_walk_options(&self) -> Option<WalkOptions> {
        *self.0.last_walk_options.lock()
    }
}

impl ProcessingScopes for SimThread {
    type PendingError = String;

    fn enter_handle_scope(&self) {
        self.0.handle_scopes.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_handle_scope(&self) {
        self.0.handle_scopes.fetch_sub(1, Ordering::SeqCst);
    }

    fn take_pending_error(&self) -> Option<String> {
        self.0.pending_error.lock().take()
    }

    fn restore_pending_error(&self, error: String) {
        *self.0.pending_error.lock() = Some(error);
    }

    fn enter_resource_scope(&self) {
        self.0.resource_scopes.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_resource_scope(&self) {
        self.0.resource_scopes.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StackThread for SimThread {
    type Frame = SimFrame;
    type Registers = SimRegisters;
    type Walker = SimWalker;

    fn thread_id(&self) -> u64 {
        self.0.id
    }

    fn has_walkable_stack(&self) -> bool {
        self.0.frames.lock().is_some()
    }

    fn walk_stack(&self, options: WalkOptions) -> SimWalker {
        self.0.walks.fetch_add(1, Ordering::SeqCst);
        *self.0.last_walk_options.lock() = Some(options);

        SimWalker {
            frames: self.0.frames.lock().clone().unwrap_or_default(),
            cursor: 0,
            registers: SimRegisters { frame_index: 0 },
        }
    }

    fn last_frame(&self) -> Option<SimFrame> {
        self.0.frames.lock().as_ref()?.first().cloned()
    }

    fn sender(&self, frame: &SimFrame) -> Option<SimFrame> {
        self.0.frames.lock().as_ref()?.get(frame.index + 1).cloned()
    }
}

// === SimWalker === //

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SimRegisters {
    pub frame_index: usize,
}

pub struct SimWalker {
    frames: Vec<SimFrame>,
    cursor: usize,
    registers: SimRegisters,
}

impl FrameWalker for SimWalker {
    type Frame = SimFrame;
    type Registers = SimRegisters;

    fn is_done(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    fn current_frame(&self) -> &SimFrame {
        &self.frames[self.cursor]
    }

    fn current_registers(&self) -> &SimRegisters {
        &self.registers
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.registers.frame_index = self.cursor;
    }
}

// === RecordingKind === //

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SimError {
    #[error("failed to process frame {0}")]
    Frame(usize),
}

type ProcessHook = Box<dyn Fn(&SimFrame) + Send + Sync>;

/// Records every frame it processes, optionally failing once on a chosen frame.
pub struct RecordingKind {
    id: KindId,
    processed: Mutex<Vec<usize>>,
    fail_at: Mutex<Option<usize>>,
    on_iteration: bool,
    hook: Option<ProcessHook>,
}

impl RecordingKind {
    pub fn new(id: u8) -> Self {
        Self {
            id: KindId(id),
            processed: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            on_iteration: true,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&SimFrame) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn without_iteration_processing(mut self) -> Self {
        self.on_iteration = false;
        self
    }

    pub fn fail_once_at(&self, index: usize) {
        *self.fail_at.lock() = Some(index);
    }

    pub fn processed(&self) -> Vec<usize> {
        self.processed.lock().clone()
    }

    pub fn clear(&self) {
        self.processed.lock().clear();
    }
}

impl BarrierKind<SimThread> for RecordingKind {
    type Context = Vec<usize>;
    type Error = SimError;

    fn id(&self) -> KindId {
        self.id
    }

    fn has_barrier(&self, frame: &SimFrame) -> bool {
        frame.barrier
    }

    fn process(
        &self,
        frame: &SimFrame,
        registers: &SimRegisters,
        context: Option<&mut Vec<usize>>,
    ) -> Result<(), SimError> {
        assert_eq!(registers.frame_index, frame.index);

        {
            let mut fail_at = self.fail_at.lock();
            if *fail_at == Some(frame.index) {
                *fail_at = None;
                return Err(SimError::Frame(frame.index));
            }
        }

        self.processed.lock().push(frame.index);
        if let Some(context) = context {
            context.push(frame.index);
        }
        if let Some(hook) = &self.hook {
            hook(frame);
        }

        Ok(())
    }

    fn process_on_iteration(&self) -> bool {
        self.on_iteration
    }
}
