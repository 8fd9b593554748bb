//! Optimistic-then-reconcile as a reusable guard.
//!
//! A store applies its local mutation immediately, issues the network call,
//! and then either commits (the server value replaces the guess) or rolls
//! back. Dropping the guard un-committed runs the undo, so a plain `?` on the
//! request is enough to revert the guess on failure.

/// Guard over an applied optimistic mutation.
///
/// The undo closure must restore exactly the state the mutation touched.
/// Stores whose state is cleared wholesale by a global session reset make
/// their undo a no-op once the session is gone, so a rollback never
/// resurrects per-user state the reset just dropped.
pub struct Optimistic<U: FnOnce()> {
    undo: Option<U>,
}

impl<U: FnOnce()> Optimistic<U> {
    /// Apply the mutation now; arm the undo for rollback.
    pub fn apply(mutate: impl FnOnce(), undo: U) -> Self {
        mutate();
        Self { undo: Some(undo) }
    }

    /// Keep the optimistic state. The caller then overwrites it with the
    /// server's authoritative value.
    pub fn commit(mut self) {
        self.undo = None;
    }

    /// Revert explicitly. Equivalent to dropping the guard.
    pub fn rollback(mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

impl<U: FnOnce()> Drop for Optimistic<U> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}
