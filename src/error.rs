// ABOUTME: Error taxonomy for the table synchronization engine
// ABOUTME: Separates run-fatal, table-fatal, and partial batch failures

use thiserror::Error;

use crate::db::ConnectionLost;
use crate::sync::Phase;

/// Errors raised while mirroring or synchronizing a table.
///
/// Everything except [`SyncError::Connection`] is scoped to a single table: the
/// orchestrator records it and moves on to the next table.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source or destination is unreachable. Fatal to the whole run.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("table {0} not found at source")]
    NotFound(String),

    #[error("failed to create mirror of {table}: {message}")]
    SchemaMirror { table: String, message: String },

    #[error("no primary key detected for {0}; configure the primary key columns manually")]
    NoPrimaryKey(String),

    /// A batch failed after `committed` rows of the same phase were already applied.
    /// `connection_lost` marks failures where the server connection itself went away.
    #[error("{phase} batch {batch} failed for {table} ({committed} rows already committed): {message}")]
    BatchApply {
        table: String,
        phase: Phase,
        batch: usize,
        committed: u64,
        message: String,
        connection_lost: bool,
    },

    #[error("{0:#}")]
    Sync(anyhow::Error),
}

impl SyncError {
    /// Whether this error should stop the entire run rather than a single table.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            SyncError::Connection(_)
                | SyncError::BatchApply {
                    connection_lost: true,
                    ..
                }
        )
    }

    /// Rows already committed by the failing phase, if the failure was partial.
    pub fn committed_rows(&self) -> Option<(Phase, u64)> {
        match self {
            SyncError::BatchApply {
                phase, committed, ..
            } => Some((*phase, *committed)),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(lost) = err.downcast_ref::<ConnectionLost>() {
            return SyncError::Connection(lost.to_string());
        }
        SyncError::Sync(err)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
