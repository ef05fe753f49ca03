//! Observational progress reporting.
//!
//! Builders call back once per NNDescent round; the graph calls back at each
//! maintenance checkpoint (after the search phase and after propagation of an
//! insert, after the repair of a remove). Callbacks never influence control
//! flow.

use std::fmt;
use std::sync::Arc;

/// Which operation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// One NNDescent round finished.
    Build,
    /// A `fast_add` checkpoint.
    Insert,
    /// A `fast_remove` checkpoint.
    Remove,
}

/// Snapshot handed to a [`ProgressCallback`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Round number (builds, 1-based) or checkpoint number within the call.
    pub iteration: usize,
    /// Successful neighbor-list mutations in this round/checkpoint (`c`).
    pub updates: usize,
    /// Cumulative similarity computations of the current operation.
    pub similarities: usize,
}

/// Shared, thread-safe observer.
#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(&ProgressEvent) + Send + Sync>);

impl ProgressCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[inline]
    pub(crate) fn emit(&self, event: ProgressEvent) {
        (self.0)(&event)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback(..)")
    }
}

/// Emit on an optional callback.
#[inline]
pub(crate) fn report(callback: &Option<ProgressCallback>, event: ProgressEvent) {
    if let Some(cb) = callback {
        cb.emit(event);
    }
}
