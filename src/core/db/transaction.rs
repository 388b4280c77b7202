/// Transaction State Machine
///
/// Bookkeeping for one session's transaction: its lifecycle state and the
/// ordered set of live savepoints. The ledger never talks to the database;
/// executors consult it before issuing SQL and record the outcome after.
use crate::core::db::query::validate_identifier;
use crate::core::{ColdQueryError, Result};
use serde::Serialize;

/// Lifecycle of a session-bound transaction.
///
/// `Open` is the only state that accepts statements; the other two are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionState::Open)
    }

    fn describe(self) -> &'static str {
        match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        }
    }
}

/// What the executor has to do for a `savepoint(name)` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointPlan {
    /// Name is new: create it
    Create,
    /// Name is live: release the old one, then create it again here
    Retarget,
}

#[derive(Debug)]
pub struct TransactionLedger {
    state: TransactionState,
    savepoints: Vec<String>,
}

impl Default for TransactionLedger {
    fn default() -> Self {
        TransactionLedger {
            state: TransactionState::Open,
            savepoints: Vec::new(),
        }
    }
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Live savepoint names, oldest first
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(ColdQueryError::SessionClosed(format!(
                "transaction already {}; begin a new transaction",
                self.state.describe()
            )));
        }
        Ok(())
    }

    pub fn plan_savepoint(&self, name: &str) -> Result<SavepointPlan> {
        self.ensure_open()?;
        validate_identifier("savepoint", name)?;
        if self.savepoints.iter().any(|s| s == name) {
            Ok(SavepointPlan::Retarget)
        } else {
            Ok(SavepointPlan::Create)
        }
    }

    /// Position of a live savepoint; unknown names are a validation error.
    pub fn position(&self, name: &str) -> Result<usize> {
        self.ensure_open()?;
        self.savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| ColdQueryError::Validation(format!("savepoint '{}' does not exist in this session", name)))
    }

    pub fn record_savepoint(&mut self, name: &str) {
        // releasing a live name also releases everything created after it
        if let Some(idx) = self.savepoints.iter().position(|s| s == name) {
            self.savepoints.truncate(idx);
        }
        self.savepoints.push(name.to_string());
    }

    /// The target survives a rollback-to; later savepoints do not.
    pub fn record_rollback_to(&mut self, name: &str) {
        if let Some(idx) = self.savepoints.iter().position(|s| s == name) {
            self.savepoints.truncate(idx + 1);
        }
    }

    pub fn record_release(&mut self, name: &str) {
        if let Some(idx) = self.savepoints.iter().position(|s| s == name) {
            self.savepoints.truncate(idx);
        }
    }

    /// Moves into a terminal state. Later calls fail with SessionClosed.
    pub fn finish(&mut self, outcome: TransactionState) {
        debug_assert!(outcome.is_terminal());
        self.state = outcome;
        self.savepoints.clear();
    }
}
