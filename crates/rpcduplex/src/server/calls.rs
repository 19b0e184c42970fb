use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::session::{CallId, CancelHandle};

/// What the server knows about one running call.
#[derive(Debug, Clone)]
pub struct CallEntry {
    pub path: String,
    cancel: CancelHandle,
}

/// Tracks the calls a server is currently running.
///
/// Registering a call returns a guard that removes the entry when dropped, so
/// a call disappears from the registry however its task ends.
#[derive(Debug, Default)]
pub struct ActiveCalls {
    calls: DashMap<CallId, CallEntry, ahash::RandomState>,
}

impl ActiveCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running call. Returns a guard that deregisters it on drop.
    pub fn register(
        self: &Arc<Self>,
        id: CallId,
        path: impl Into<String>,
        cancel: CancelHandle,
    ) -> CallGuard {
        self.calls.insert(
            id,
            CallEntry {
                path: path.into(),
                cancel,
            },
        );
        CallGuard {
            id,
            calls: Arc::clone(self),
        }
    }

    /// Cancel one call. Returns `false` if it is not running.
    pub fn cancel(&self, id: &CallId) -> bool {
        match self.calls.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running call. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.calls.iter() {
            entry.value().cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Check if a call is registered.
    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    /// Path of a running call.
    pub fn path(&self, id: &CallId) -> Option<String> {
        self.calls.get(id).map(|entry| entry.path.clone())
    }

    /// Snapshot of the running calls.
    pub fn snapshot(&self) -> Vec<(CallId, String)> {
        self.calls
            .iter()
            .map(|entry| (*entry.key(), entry.value().path.clone()))
            .collect()
    }

    /// Get the number of running calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Check if no call is running.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn remove(&self, id: &CallId) {
        self.calls.remove(id);
    }
}

/// Keeps a call registered while alive.
pub struct CallGuard {
    id: CallId,
    calls: Arc<ActiveCalls>,
}

impl CallGuard {
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.calls.remove(&self.id);
    }
}

impl fmt::Debug for CallGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CallContext;

    #[test]
    fn test_register_and_drop() {
        let calls = Arc::new(ActiveCalls::new());
        let (ctx, cancel) = CallContext::new();

        let guard = calls.register(ctx.id(), "/poem.PoemService/GetPoem", cancel);
        assert!(calls.contains(&ctx.id()));
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls.path(&ctx.id()).as_deref(),
            Some("/poem.PoemService/GetPoem")
        );

        drop(guard);
        assert!(!calls.contains(&ctx.id()));
        assert!(calls.is_empty());
    }

    #[test]
    fn test_cancel_reaches_context() {
        let calls = Arc::new(ActiveCalls::new());
        let (ctx, cancel) = CallContext::new();
        let _guard = calls.register(ctx.id(), "/user.UserService/ListUsers", cancel);

        assert!(calls.cancel(&ctx.id()));
        assert!(ctx.is_cancelled());
        assert!(!calls.cancel(&CallId::new()));
    }

    #[test]
    fn test_cancel_all() {
        let calls = Arc::new(ActiveCalls::new());
        let (first, first_cancel) = CallContext::new();
        let (second, second_cancel) = CallContext::new();
        let _g1 = calls.register(first.id(), "/a.B/C", first_cancel);
        let _g2 = calls.register(second.id(), "/a.B/C", second_cancel);

        assert_eq!(calls.snapshot().len(), 2);
        assert_eq!(calls.cancel_all(), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_same_path_tracked_per_call() {
        let calls = Arc::new(ActiveCalls::new());
        let (first, first_cancel) = CallContext::new();
        let (second, second_cancel) = CallContext::new();

        {
            let _g1 = calls.register(first.id(), "/a.B/C", first_cancel);
            let _g2 = calls.register(second.id(), "/a.B/C", second_cancel);
            assert_eq!(calls.len(), 2);
        }

        assert!(calls.is_empty());
    }
}
