use std::fmt;

// === ProcessingScopes === //

/// Thread-local bookkeeping that has to be set up around any frame-processing call.
///
/// Frame inspection can create handles and transient allocations, and must not observe or clobber
/// an error that was already pending on the thread. Runtimes without a given concept can keep the
/// no-op defaults.
pub trait ProcessingScopes {
    type PendingError: fmt::Debug;

    /// Forbids creating handles outside of a handle scope, returning the previous setting.
    fn suppress_unscoped_handles(&self) -> bool {
        false
    }

    fn restore_unscoped_handles(&self, previous: bool) {
        let _ = previous;
    }

    fn enter_handle_scope(&self) {}

    fn exit_handle_scope(&self) {}

    /// Removes and returns the error currently pending on the thread.
    fn take_pending_error(&self) -> Option<Self::PendingError>;

    fn restore_pending_error(&self, error: Self::PendingError);

    fn enter_resource_scope(&self) {}

    fn exit_resource_scope(&self) {}
}

// === ProcessingMark === //

/// Holds every [`ProcessingScopes`] scope open for as long as it lives and closes them in reverse
/// order when dropped, including during unwinding.
#[must_use]
pub struct ProcessingMark<'a, S: ?Sized + ProcessingScopes> {
    scopes: &'a S,
    previous_suppression: bool,
    preserved: Option<S::PendingError>,
}

impl<S: ?Sized + ProcessingScopes> fmt::Debug for ProcessingMark<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingMark")
            .field("preserved", &self.preserved)
            .finish_non_exhaustive()
    }
}

impl<'a, S: ?Sized + ProcessingScopes> ProcessingMark<'a, S> {
    pub fn new(scopes: &'a S) -> Self {
        let previous_suppression = scopes.suppress_unscoped_handles();
        scopes.enter_handle_scope();
        let preserved = scopes.take_pending_error();
        scopes.enter_resource_scope();

        Self {
            scopes,
            previous_suppression,
            preserved,
        }
    }
}

impl<S: ?Sized + ProcessingScopes> Drop for ProcessingMark<'_, S> {
    fn drop(&mut self) {
        let scopes = self.scopes;

        scopes.exit_resource_scope();

        if let Some(stray) = scopes.take_pending_error() {
            tracing::warn!("discarding error left pending by stack processing: {stray:?}");
        }
        if let Some(preserved) = self.preserved.take() {
            scopes.restore_pending_error(preserved);
        }

        scopes.exit_handle_scope();
        scopes.restore_unscoped_handles(self.previous_suppression);
    }
}

// === Tests === //
