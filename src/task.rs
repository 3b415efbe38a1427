//! External task-context collaborator: lets the sorter register its own cleanup so
//! task completion (success, failure, or cancellation) always triggers it exactly
//! once, regardless of how much of the output was consumed.
pub trait TaskContext {
    fn on_completion(&self, cleanup: Box<dyn FnOnce() + Send>);
}

/// A context that never calls back. Standalone callers that manage their own sorter
/// lifetime can use this and call `cleanup_resources()` themselves.
#[derive(Default)]
pub struct NoopTaskContext;

impl TaskContext for NoopTaskContext {
    fn on_completion(&self, _cleanup: Box<dyn FnOnce() + Send>) {}
}

/// Collects callbacks and runs them on demand, standing in for a real task scheduler in
/// tests that need to assert cleanup actually fires at "task end".
#[derive(Default)]
pub struct DeferredTaskContext {
    callbacks: parking_lot::Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl DeferredTaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run and drop every registered callback, in registration order.
    pub fn complete(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

impl TaskContext for DeferredTaskContext {
    fn on_completion(&self, cleanup: Box<dyn FnOnce() + Send>) {
        self.callbacks.lock().push(cleanup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn deferred_context_runs_callbacks_once_completed() {
        let ctx = DeferredTaskContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        ctx.on_completion(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        ctx.complete();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
