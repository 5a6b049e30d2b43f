//! Transfer records and the ledger that holds them.
//!
//! The ledger is owned by the UI thread. Workers describe changes as
//! [`LedgerUpdate`] values and post them; the UI dispatcher applies them in
//! order, so records are only ever mutated by one thread.

use crate::error::{Result, SavannahError};
use crate::session::TransactionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Process-unique record id, assigned by the orchestrator
pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferDirection {
    /// Upload of a new file
    Add,
    /// Upload overwriting an existing file
    Replace,
    /// Download
    Get,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Add => "add",
            TransferDirection::Replace => "replace",
            TransferDirection::Get => "get",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "add" => Some(TransferDirection::Add),
            "replace" => Some(TransferDirection::Replace),
            "get" => Some(TransferDirection::Get),
            _ => None,
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferState {
    Pending,
    Transferring,
    Complete,
    Error,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Error | TransferState::Aborted
        )
    }

    /// Legal single steps: Pending -> Transferring -> terminal, or Pending -> terminal
    fn can_become(&self, next: TransferState) -> bool {
        match self {
            TransferState::Pending => next != TransferState::Pending,
            TransferState::Transferring => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub id: RecordId,
    pub name: String,
    pub filetype: String,
    pub transaction: Option<TransactionId>,
    pub size: Option<u64>,
    pub direction: TransferDirection,
    pub state: TransferState,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl TransferRecord {
    pub fn new(
        id: RecordId,
        name: impl Into<String>,
        filetype: impl Into<String>,
        direction: TransferDirection,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            filetype: filetype.into(),
            transaction: None,
            size: None,
            direction,
            state: TransferState::Pending,
            started: None,
            ended: None,
        }
    }

    /// Move to `next`, stamping start/end times on the way
    pub fn transition(&mut self, next: TransferState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(SavannahError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        if next == TransferState::Transferring {
            self.started = Some(now);
        }
        if next.is_terminal() {
            self.ended = Some(now);
        }
        self.state = next;
        Ok(())
    }

    /// Submitted under `transaction`: Pending -> Transferring
    pub fn start(&mut self, transaction: TransactionId) -> Result<()> {
        self.transition(TransferState::Transferring)?;
        self.transaction = Some(transaction);
        Ok(())
    }

    pub fn finish(&mut self, state: TransferState, size: Option<u64>) -> Result<()> {
        self.transition(state)?;
        if size.is_some() {
            self.size = size;
        }
        Ok(())
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// A change the UI thread should apply to its ledger
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerUpdate {
    Add(TransferRecord),
    Finish {
        id: RecordId,
        state: TransferState,
        size: Option<u64>,
    },
    Remove(Vec<RecordId>),
    Reset,
}

/// What an applied update did, reported to observers
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerChange {
    Added(RecordId),
    Updated(RecordId),
    Removed(Vec<RecordId>),
    Reset,
}

type Observer = Box<dyn FnMut(&LedgerChange) + Send>;

#[derive(Default)]
pub struct TransferLedger {
    records: Vec<TransferRecord>,
    observers: Vec<Observer>,
}

impl fmt::Debug for TransferLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferLedger")
            .field("records", &self.records)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, observer: impl FnMut(&LedgerChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, change: LedgerChange) {
        for observer in &mut self.observers {
            observer(&change);
        }
    }

    pub fn add(&mut self, record: TransferRecord) {
        let id = record.id;
        self.records.push(record);
        self.notify(LedgerChange::Added(id));
    }

    pub fn finish(
        &mut self,
        id: RecordId,
        state: TransferState,
        size: Option<u64>,
    ) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SavannahError::InvalidArgument(format!("no record with id {}", id)))?;
        record.finish(state, size)?;
        self.notify(LedgerChange::Updated(id));
        Ok(())
    }

    /// Remove records by id; returns how many were present
    pub fn remove(&mut self, ids: &[RecordId]) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !ids.contains(&r.id));
        let removed = before - self.records.len();
        if removed > 0 {
            self.notify(LedgerChange::Removed(ids.to_vec()));
        }
        removed
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.notify(LedgerChange::Reset);
    }

    pub fn apply(&mut self, update: LedgerUpdate) -> Result<()> {
        match update {
            LedgerUpdate::Add(record) => self.add(record),
            LedgerUpdate::Finish { id, state, size } => self.finish(id, state, size)?,
            LedgerUpdate::Remove(ids) => {
                self.remove(&ids);
            }
            LedgerUpdate::Reset => self.reset(),
        }
        Ok(())
    }

    pub fn get(&self, id: RecordId) -> Option<&TransferRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    pub fn count(&self, state: TransferState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
