//! A handle that can be shared between threads.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use pgembed_common::DurabilityConfig;
use pgembed_engine::Engine;

use crate::embedded::Embedded;
use crate::error::EmbedResult;
use crate::result::ResultSet;
use crate::txn::TransactionState;

/// An [`Embedded`] handle behind a mutex.
///
/// Every call takes the lock, so calls from different threads run one at a
/// time. An explicit transaction belongs to the handle, not to a thread:
/// hold the guard from [`lock`](Self::lock) across `begin` and `commit` to
/// keep other threads out of it.
pub struct SharedEmbedded<E: Engine> {
    inner: Arc<Mutex<Embedded<E>>>,
}

impl<E: Engine> SharedEmbedded<E> {
    /// Wraps a handle.
    pub fn new(embedded: Embedded<E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(embedded)),
        }
    }

    /// Locks the handle.
    pub fn lock(&self) -> MutexGuard<'_, Embedded<E>> {
        self.inner.lock()
    }

    /// Runs `f` with the handle locked.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Embedded<E>) -> R,
    {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    /// Executes one statement.
    pub fn execute(&self, query: &str) -> EmbedResult<ResultSet> {
        self.inner.lock().execute(query)
    }

    /// Opens an explicit transaction.
    pub fn begin(&self) -> EmbedResult<()> {
        self.inner.lock().begin()
    }

    /// Commits the explicit transaction.
    pub fn commit(&self) -> EmbedResult<()> {
        self.inner.lock().commit()
    }

    /// Rolls back the explicit transaction.
    pub fn rollback(&self) -> EmbedResult<()> {
        self.inner.lock().rollback()
    }

    /// Returns the transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.inner.lock().transaction_state()
    }

    /// Sets the durability switches for the next start.
    pub fn set_durability_config(&self, config: DurabilityConfig) {
        self.inner.lock().set_durability_config(config);
    }

    /// Returns a copy of the last error message.
    pub fn last_error_message(&self) -> String {
        self.inner.lock().last_error_message().to_string()
    }

    /// Shuts the engine down.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown();
    }
}

impl<E: Engine> Clone for SharedEmbedded<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
