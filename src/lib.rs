//! Transfer core of the Savannah file-exchange client.
//!
//! Batches of uploads, downloads and catalog edits run on worker threads
//! against one shared [`session::RemoteSession`]. Per-file conflicts are
//! settled interactively through the UI thread, and every transfer is
//! tracked as a [`ledger::TransferRecord`] owned by that UI thread.

pub mod checksum;
pub mod config;
pub mod conflict;
pub mod error;
pub mod history;
pub mod ledger;
pub mod orchestrator;
pub mod session;
pub mod throttle;
pub mod ui;

pub use config::Config;
pub use conflict::{ConflictChoice, ConflictKind, ConflictResolver, Resolution};
pub use error::{Result, SavannahError};
pub use history::{History, HistoryLog};
pub use ledger::{TransferDirection, TransferLedger, TransferRecord, TransferState};
pub use orchestrator::{BatchHandle, BatchOp, BatchSummary, TransferOrchestrator};
pub use session::catalog::LocalCatalog;
pub use session::{RemoteSession, SharedSession};
pub use throttle::RefreshThrottle;
pub use ui::{ui_channel, UiDelegate, UiDispatcher, UiHandle};
