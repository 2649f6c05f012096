//! Explicit transaction control.
//!
//! The coordinator tracks whether the caller opened a transaction with
//! [`begin`](TransactionCoordinator::begin). Statements executed while it is
//! open run inside that transaction; otherwise each statement gets its own.

use std::fmt;

use pgembed_engine::Engine;
use tracing::{debug, warn};

use crate::error::{EmbedError, EmbedResult};

/// Caller-visible transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No explicit transaction is open.
    #[default]
    NoTransaction,
    /// An explicit transaction is open.
    InTransaction,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::NoTransaction => write!(f, "idle"),
            TransactionState::InTransaction => write!(f, "in transaction"),
        }
    }
}

/// Tracks and drives explicit transactions.
#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    state: TransactionState,
    committed: u64,
    rolled_back: u64,
}

impl TransactionCoordinator {
    /// Creates a coordinator with no open transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state == TransactionState::InTransaction
    }

    /// Returns how many explicit transactions committed.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Returns how many explicit transactions were rolled back.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back
    }

    /// Opens an explicit transaction.
    pub fn begin<E: Engine>(&mut self, engine: &mut E) -> EmbedResult<()> {
        if self.in_transaction() {
            return Err(EmbedError::TransactionState(
                "already in transaction".to_string(),
            ));
        }
        if let Err(e) = engine.start_transaction_command() {
            abort_quietly(engine);
            return Err(EmbedError::TransactionFailed {
                operation: "Begin",
                message: e.full_message(),
            });
        }
        self.state = TransactionState::InTransaction;
        debug!("Transaction started");
        Ok(())
    }

    /// Commits the explicit transaction.
    ///
    /// If the engine refuses the commit, the transaction is aborted. Either
    /// way no transaction is open afterwards.
    pub fn commit<E: Engine>(&mut self, engine: &mut E) -> EmbedResult<()> {
        if !self.in_transaction() {
            return Err(EmbedError::TransactionState(
                "no transaction in progress".to_string(),
            ));
        }
        self.state = TransactionState::NoTransaction;
        match engine.commit_transaction_command() {
            Ok(()) => {
                self.committed += 1;
                debug!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                abort_quietly(engine);
                self.rolled_back += 1;
                Err(EmbedError::TransactionFailed {
                    operation: "Commit",
                    message: e.full_message(),
                })
            }
        }
    }

    /// Rolls back the explicit transaction. Always leaves no transaction open.
    pub fn rollback<E: Engine>(&mut self, engine: &mut E) -> EmbedResult<()> {
        if !self.in_transaction() {
            return Err(EmbedError::TransactionState(
                "no transaction in progress".to_string(),
            ));
        }
        self.state = TransactionState::NoTransaction;
        abort_quietly(engine);
        self.rolled_back += 1;
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Aborts any open transaction and forgets it.
    ///
    /// Used at shutdown.
    pub fn reset<E: Engine>(&mut self, engine: &mut E) {
        if self.in_transaction() || engine.is_transaction_state() {
            warn!("Aborting open transaction");
            abort_quietly(engine);
            if self.in_transaction() {
                self.rolled_back += 1;
            }
        }
        self.state = TransactionState::NoTransaction;
    }
}

/// Aborts the engine transaction, logging instead of returning failures.
pub(crate) fn abort_quietly<E: Engine>(engine: &mut E) {
    if let Err(e) = engine.abort_current_transaction() {
        warn!(error = %e, "Abort failed");
    }
}
