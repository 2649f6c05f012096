//! Statement execution.
//!
//! One statement runs as: push a snapshot, connect to SPI, execute with no
//! row limit in read-write mode, copy the rows out, then disconnect, pop the
//! snapshot and reset the per-statement memory. The copy happens before the
//! reset, so nothing in the returned [`ResultSet`] refers to engine memory.
//!
//! Without an explicit transaction the statement gets its own, committed on
//! success and aborted on failure.

use pgembed_engine::{Engine, SpiOutcome};
use tracing::{debug, trace};

use crate::error::{EmbedError, EmbedResult, ExecError};
use crate::result::ResultSet;
use crate::txn::{abort_quietly, TransactionCoordinator};

/// Executes one statement.
pub(crate) fn execute<E: Engine>(
    engine: &mut E,
    coordinator: &TransactionCoordinator,
    query: &str,
) -> EmbedResult<ResultSet> {
    if query.trim().is_empty() {
        return Err(EmbedError::invalid_argument("empty query"));
    }

    if coordinator.in_transaction() {
        return run_statement(engine, query);
    }

    if let Err(e) = engine.start_transaction_command() {
        abort_quietly(engine);
        return Err(ExecError::from_engine(&e).into());
    }
    match run_statement(engine, query) {
        Ok(result) => match engine.commit_transaction_command() {
            Ok(()) => Ok(result),
            Err(e) => {
                abort_quietly(engine);
                Err(ExecError::from_engine(&e).into())
            }
        },
        Err(err) => {
            debug!(error = %err, "Aborting implicit transaction");
            abort_quietly(engine);
            Err(err)
        }
    }
}

fn run_statement<E: Engine>(engine: &mut E, query: &str) -> EmbedResult<ResultSet> {
    trace!(query, "Executing statement");

    engine
        .push_active_snapshot()
        .map_err(|e| ExecError::from_engine(&e))?;
    if let Err(e) = engine.spi_connect() {
        engine.pop_active_snapshot();
        return Err(ExecError::from_engine(&e).into());
    }

    let result = match engine.spi_execute(query, false, 0) {
        Ok(outcome) if outcome.status.is_error() => {
            let code = outcome.status.code();
            Err(ExecError::new(
                format!("Query execution failed with code: {}", code),
                ResultSet::failed(code),
            )
            .into())
        }
        Ok(outcome) => materialize(engine, outcome),
        Err(e) => Err(ExecError::from_engine(&e).into()),
    };

    let finished = engine.spi_finish();
    engine.pop_active_snapshot();
    engine.reset_message_context();

    let result = result?;
    finished.map_err(|e| ExecError::from_engine(&e))?;
    debug!(status = result.status(), rows = result.row_count(), "Statement complete");
    Ok(result)
}

/// Copies the statement's rows, if it returned any.
fn materialize<E: Engine>(engine: &E, outcome: SpiOutcome) -> EmbedResult<ResultSet> {
    match engine.spi_tuptable() {
        Some(table) if outcome.status.returns_rows() => ResultSet::copy_from(outcome, table),
        _ => Ok(ResultSet::new(outcome.status.code(), outcome.processed)),
    }
}
