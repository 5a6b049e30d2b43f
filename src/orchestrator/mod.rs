//! Batch transfer orchestration.
//!
//! Each call to [`TransferOrchestrator::submit`] runs one batch on its own
//! worker thread:
//!
//! ```text
//!            +-------------------- session lock --------------------+
//!  item ---> | open filetype -> scoped options -> submit -> drain   | ---> branch
//!            +------------------------------------------------------+
//!                                                                     |
//!        OK: Complete + history + throttled refresh  <----------------+
//!  conflict: ConflictResolver -> Skip / Cancel / Resubmit / Satisfied
//!     other: Error + notification
//! ```
//!
//! Batches share the one [`SharedSession`] lock, so their sub-operations
//! interleave only between items. Everything the UI can see travels as
//! [`UiEvent`](crate::ui::UiEvent)s through the worker's [`UiHandle`].

use crate::config::Config;
use crate::conflict::{
    BatchState, Conflict, ConflictKind, ConflictResolver, Overwrite, Resolution,
};
use crate::error::{Result, SavannahError};
use crate::history::History;
use crate::ledger::{LedgerUpdate, RecordId, TransferDirection, TransferRecord, TransferState};
use crate::session::{
    drain_transaction, Command, RemoteSession, SessionOption, SessionScope, SharedSession,
    StatusCode, TransferResult,
};
use crate::throttle::RefreshThrottle;
use crate::ui::{RefreshTarget, UiHandle};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

// =============================================================================
// Batch operations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Upload local files as new catalog entries
    Add,
    /// Upload local files over existing catalog entries
    Replace,
    /// Download into `destination`, or the session directory when `None`
    Get { destination: Option<PathBuf> },
    Delete,
    /// One new name per item, in item order
    Rename { new_names: Vec<String> },
    Comment { text: String },
}

impl BatchOp {
    pub fn verb(&self) -> &'static str {
        match self {
            BatchOp::Add => "add",
            BatchOp::Replace => "replace",
            BatchOp::Get { .. } => "get",
            BatchOp::Delete => "delete",
            BatchOp::Rename { .. } => "rename",
            BatchOp::Comment { .. } => "comment",
        }
    }

    fn command(&self, index: usize, item: &str) -> Command {
        match self {
            BatchOp::Add => Command::Add {
                path: PathBuf::from(item),
            },
            BatchOp::Replace => Command::Replace {
                path: PathBuf::from(item),
            },
            BatchOp::Get { .. } => Command::Get {
                name: item.to_string(),
            },
            BatchOp::Delete => Command::Delete {
                name: item.to_string(),
            },
            BatchOp::Rename { new_names } => Command::Rename {
                from: item.to_string(),
                to: new_names[index].clone(),
            },
            BatchOp::Comment { text } => Command::Comment {
                name: item.to_string(),
                text: text.clone(),
            },
        }
    }

    /// Direction of the record this attempt creates; `None` for non-transfers
    fn direction(&self, overwrite: Option<Overwrite>) -> Option<TransferDirection> {
        match self {
            BatchOp::Add if overwrite == Some(Overwrite::Replace) => {
                Some(TransferDirection::Replace)
            }
            BatchOp::Add => Some(TransferDirection::Add),
            BatchOp::Replace => Some(TransferDirection::Replace),
            BatchOp::Get { .. } => Some(TransferDirection::Get),
            _ => None,
        }
    }

    fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            BatchOp::Add | BatchOp::Replace => Some(ConflictKind::Upload),
            BatchOp::Get { .. } => Some(ConflictKind::Download),
            _ => None,
        }
    }

    fn refresh_target(&self) -> RefreshTarget {
        match self {
            BatchOp::Get { .. } => RefreshTarget::Local,
            _ => RefreshTarget::Remote,
        }
    }

    fn validate(&self, items: &[String]) -> Result<()> {
        if let Some(pos) = items.iter().position(|item| item.trim().is_empty()) {
            return Err(SavannahError::InvalidArgument(format!(
                "item {} has an empty name",
                pos
            )));
        }
        if let BatchOp::Comment { text } = self {
            if text.trim().is_empty() {
                return Err(SavannahError::InvalidArgument(
                    "comment text is empty".to_string(),
                ));
            }
        }
        if let BatchOp::Rename { new_names } = self {
            if new_names.len() != items.len() {
                return Err(SavannahError::InvalidArgument(format!(
                    "rename needs {} new name(s), got {}",
                    items.len(),
                    new_names.len()
                )));
            }
            if new_names.iter().any(|n| n.trim().is_empty()) {
                return Err(SavannahError::InvalidArgument(
                    "rename target is empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Counts of how a batch's items ended up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    /// Already identical; counted as complete without a transfer
    pub identical: usize,
    pub aborted: usize,
    pub failed: usize,
    /// Items never submitted because the batch was cancelled
    pub unprocessed: usize,
    pub refreshes: usize,
    pub cancelled: bool,
}

pub struct BatchHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Stop before the next item. The item in flight finishes normally.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<BatchSummary> {
        self.join
            .join()
            .map_err(|panic| SavannahError::Worker(panic_message(&*panic)))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

// =============================================================================
// Busy indicator
// =============================================================================

/// Busy while at least one batch runs. Only the outermost exit clears it.
struct BusyIndicator {
    depth: Mutex<usize>,
    ui: UiHandle,
}

struct BusyGuard<'a> {
    busy: &'a BusyIndicator,
}

impl BusyIndicator {
    fn new(ui: UiHandle) -> Self {
        Self {
            depth: Mutex::new(0),
            ui,
        }
    }

    fn enter(&self) -> BusyGuard<'_> {
        let mut depth = self.depth.lock().unwrap_or_else(PoisonError::into_inner);
        *depth += 1;
        if *depth == 1 {
            self.ui.busy(true);
        }
        BusyGuard { busy: self }
    }

    fn is_busy(&self) -> bool {
        *self.depth.lock().unwrap_or_else(PoisonError::into_inner) > 0
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut depth = self
            .busy
            .depth
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *depth = depth.saturating_sub(1);
        if *depth == 0 {
            self.busy.ui.busy(false);
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Clone)]
pub struct TransferOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    session: SharedSession,
    ui: UiHandle,
    history: Arc<dyn History>,
    config: Config,
    throttle: RefreshThrottle,
    busy: BusyIndicator,
    next_record: AtomicU64,
    next_batch: AtomicU64,
}

struct Batch {
    id: u64,
    filetype: String,
    op: BatchOp,
    items: Vec<String>,
    cancel: Arc<AtomicBool>,
}

/// One submit-and-drain round for one item
struct Attempt {
    record: Option<RecordId>,
    direction: Option<TransferDirection>,
    name: String,
    result: TransferResult,
    identical: Option<bool>,
}

enum ItemOutcome {
    Completed,
    Identical,
    Aborted,
    Failed,
}

impl TransferOrchestrator {
    pub fn new(
        session: SharedSession,
        ui: UiHandle,
        history: Arc<dyn History>,
        config: Config,
    ) -> Self {
        let throttle = RefreshThrottle::new(config.refresh.max_stride);
        Self {
            inner: Arc::new(Inner {
                session,
                busy: BusyIndicator::new(ui.clone()),
                ui,
                history,
                config,
                throttle,
                next_record: AtomicU64::new(1),
                next_batch: AtomicU64::new(1),
            }),
        }
    }

    /// Start a batch on a new worker thread.
    ///
    /// Returns `Ok(None)` for an empty item list. Argument errors are
    /// reported here, before anything is spawned.
    pub fn submit(
        &self,
        filetype: &str,
        op: BatchOp,
        items: Vec<String>,
    ) -> Result<Option<BatchHandle>> {
        if items.is_empty() {
            return Ok(None);
        }
        if filetype.trim().is_empty() {
            return Err(SavannahError::InvalidArgument(
                "filetype is empty".to_string(),
            ));
        }
        op.validate(&items)?;

        let id = self.inner.next_batch.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let batch = Batch {
            id,
            filetype: filetype.to_string(),
            op,
            items,
            cancel: Arc::clone(&cancel),
        };

        let inner = Arc::clone(&self.inner);
        let join = thread::Builder::new()
            .name(format!("savannah-batch-{}", id))
            .spawn(move || inner.run_batch(batch))?;

        Ok(Some(BatchHandle { cancel, join }))
    }

    /// Ask the UI to drop records from its ledger
    pub fn remove_records(&self, ids: Vec<RecordId>) {
        if !ids.is_empty() {
            self.inner.ui.ledger(LedgerUpdate::Remove(ids));
        }
    }

    pub fn reset_records(&self) {
        self.inner.ui.ledger(LedgerUpdate::Reset);
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.is_busy()
    }

    pub fn session(&self) -> &SharedSession {
        &self.inner.session
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn run_batch(&self, batch: Batch) -> BatchSummary {
        let _busy = self.busy.enter();
        let total = batch.items.len();
        tracing::info!(
            "Batch {}: {} {} item(s) in '{}'",
            batch.id,
            batch.op.verb(),
            total,
            batch.filetype
        );

        let resolver =
            ConflictResolver::new(self.ui.clone(), self.config.transfer.prompt_on_identical);
        let mut state = BatchState::new();
        let mut summary = BatchSummary::default();

        for (index, item) in batch.items.iter().enumerate() {
            if batch.cancel.load(Ordering::SeqCst) && !state.is_cancelled() {
                state.cancel();
                self.ui.status("Aborted remaining transfer.");
            }
            if state.is_cancelled() {
                summary.unprocessed = total - index;
                break;
            }

            self.ui
                .status(format!("Starting {} of '{}'", batch.op.verb(), item));

            match self.process_item(&batch, index, item, &mut state, &resolver) {
                ItemOutcome::Completed => {
                    summary.completed += 1;
                    if self.throttle.should_refresh(index, total) {
                        self.ui.refresh(batch.op.refresh_target());
                        summary.refreshes += 1;
                    }
                }
                ItemOutcome::Identical => summary.identical += 1,
                ItemOutcome::Aborted => summary.aborted += 1,
                ItemOutcome::Failed => summary.failed += 1,
            }
        }

        summary.cancelled = state.is_cancelled();
        self.restore_session_defaults();
        tracing::info!("Batch {} finished: {:?}", batch.id, summary);
        summary
    }

    fn process_item(
        &self,
        batch: &Batch,
        index: usize,
        item: &str,
        state: &mut BatchState,
        resolver: &ConflictResolver,
    ) -> ItemOutcome {
        let remaining = batch.items.len() - index - 1;
        // Sticky policies are applied by the resolver so identical files are still detected
        let mut overwrite = None;
        let mut resubmitted = false;

        loop {
            let attempt = match self.attempt(batch, index, item, overwrite) {
                Ok(attempt) => attempt,
                Err(e) => {
                    self.ui.error(item, e.code(), e.to_string());
                    return ItemOutcome::Failed;
                }
            };
            let result = &attempt.result;

            if result.is_ok() {
                self.finish(attempt.record, TransferState::Complete, result.size);
                self.ui
                    .status(format!("Completed {} of '{}'", batch.op.verb(), item));
                if let Some(direction) = attempt.direction {
                    self.history.record_completed(&attempt.name, direction);
                }
                return ItemOutcome::Completed;
            }

            let kind = batch.op.conflict_kind();
            if let (true, Some(kind), false) = (result.is_conflict(), kind, resubmitted) {
                let conflict = Conflict {
                    kind,
                    name: attempt.name.clone(),
                    identical: attempt.identical,
                };
                match resolver.resolve(&conflict, state, remaining) {
                    Resolution::AlreadySatisfied { cancel_remaining } => {
                        self.finish(attempt.record, TransferState::Complete, Some(0));
                        if cancel_remaining {
                            state.cancel();
                        }
                        return ItemOutcome::Identical;
                    }
                    Resolution::Skip => {
                        self.finish(attempt.record, TransferState::Aborted, None);
                        return ItemOutcome::Aborted;
                    }
                    Resolution::CancelRemaining => {
                        self.finish(attempt.record, TransferState::Aborted, None);
                        state.cancel();
                        return ItemOutcome::Aborted;
                    }
                    Resolution::Resubmit(next) => {
                        if let Some(id) = attempt.record {
                            self.ui.ledger(LedgerUpdate::Remove(vec![id]));
                        }
                        overwrite = Some(next);
                        resubmitted = true;
                        continue;
                    }
                }
            }

            self.finish(attempt.record, TransferState::Error, None);
            self.ui
                .error(item, result.status.code(), result.message.clone());
            return ItemOutcome::Failed;
        }
    }

    /// Submit one item and drain its transaction, all under the session lock
    fn attempt(
        &self,
        batch: &Batch,
        index: usize,
        item: &str,
        overwrite: Option<Overwrite>,
    ) -> Result<Attempt> {
        let command = batch.op.command(index, item);
        let name = command.name();
        let direction = batch.op.direction(overwrite);

        let mut scope = self.session.lock()?;
        if scope.filetype() != Some(batch.filetype.as_str()) {
            scope.open(&batch.filetype)?;
        }
        match overwrite {
            Some(Overwrite::Replace) => {
                scope.set_scoped_option(SessionOption::Version, false);
                scope.set_scoped_option(SessionOption::Replace, true);
            }
            Some(Overwrite::Version) => {
                scope.set_scoped_option(SessionOption::Replace, false);
                scope.set_scoped_option(SessionOption::Version, true);
            }
            None => {}
        }
        if let BatchOp::Get {
            destination: Some(ref dest),
        } = batch.op
        {
            scope.set_scoped_directory(dest)?;
        }

        let transaction = scope.submit(&command)?;
        let record = match direction {
            Some(direction) => {
                let id = self.next_record.fetch_add(1, Ordering::SeqCst);
                let mut record = TransferRecord::new(id, &name, &batch.filetype, direction);
                record.start(transaction)?;
                self.ui.ledger(LedgerUpdate::Add(record));
                Some(id)
            }
            None => None,
        };
        tracing::debug!(
            "Batch {}: submitted {:?} as transaction {}",
            batch.id,
            command,
            transaction
        );

        let results = match drain_transaction(&mut *scope, transaction) {
            Ok(results) => results,
            Err(e) => {
                self.finish(record, TransferState::Error, None);
                return Err(e);
            }
        };
        let result = results
            .iter()
            .find(|r| !r.is_ok())
            .or(results.last())
            .cloned()
            .unwrap_or_else(|| {
                TransferResult::new(
                    transaction,
                    &name,
                    StatusCode::Failure(-1),
                    "Session returned no result",
                )
            });

        let identical = if result.is_conflict() && scope.option(SessionOption::Diff) {
            local_path(&batch.op, &scope, item, &name)
                .map(|path| self.compare_checksums(&scope, &path, result.checksum.as_deref()))
        } else {
            None
        };

        Ok(Attempt {
            record,
            direction,
            name,
            result,
            identical,
        })
    }

    /// Diff-equality. Anything short of two matching checksums counts as different.
    fn compare_checksums(
        &self,
        scope: &SessionScope<'_>,
        local: &Path,
        remote: Option<&str>,
    ) -> bool {
        let Some(remote) = remote else {
            return false;
        };
        match scope.local_checksum(local) {
            Ok(checksum) => checksum == remote,
            Err(e) => {
                tracing::warn!("Checksum of {} failed: {}", local.display(), e);
                self.ui.status(format!(
                    "Could not checksum '{}', treating it as changed",
                    local.display()
                ));
                false
            }
        }
    }

    fn finish(&self, record: Option<RecordId>, state: TransferState, size: Option<u64>) {
        if let Some(id) = record {
            self.ui.ledger(LedgerUpdate::Finish { id, state, size });
        }
    }

    fn restore_session_defaults(&self) {
        let defaults = self.config.session;
        let directory = &self.config.transfer.default_directory;
        match self.session.lock() {
            Ok(mut scope) => {
                for option in SessionOption::ALL {
                    scope.set_option(option, defaults.get(option));
                }
                if let Err(e) = scope.set_directory(directory) {
                    tracing::warn!(
                        "Could not restore directory {}: {}",
                        directory.display(),
                        e
                    );
                }
            }
            Err(e) => tracing::warn!("Could not restore session defaults: {}", e),
        }
    }
}

/// Local file a conflicting item corresponds to, for diff comparison
fn local_path(
    op: &BatchOp,
    scope: &SessionScope<'_>,
    item: &str,
    name: &str,
) -> Option<PathBuf> {
    match op {
        BatchOp::Get { .. } => Some(scope.directory().join(name)),
        BatchOp::Add | BatchOp::Replace => {
            let path = Path::new(item);
            Some(if path.is_absolute() {
                path.to_path_buf()
            } else {
                scope.directory().join(path)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CatalogEntry, ListFilter, TransactionId};
    use crate::ui::scripted::ScriptedDelegate;
    use crate::ui::{ui_channel, UiDispatcher};
    use std::collections::{HashSet, VecDeque};

    #[derive(Default)]
    struct NullHistory;

    impl History for NullHistory {
        fn record_completed(&self, _name: &str, _direction: TransferDirection) {}
    }

    /// Session whose results come from a per-name status table
    struct TableSession {
        statuses: Vec<(String, StatusCode, &'static str)>,
        options: HashSet<SessionOption>,
        queue: VecDeque<TransferResult>,
        next: TransactionId,
        fail_submit: bool,
        fail_result: bool,
        submitted: Vec<Command>,
    }

    impl TableSession {
        fn new(statuses: Vec<(&str, StatusCode, &'static str)>) -> Self {
            Self {
                statuses: statuses
                    .into_iter()
                    .map(|(n, s, m)| (n.to_string(), s, m))
                    .collect(),
                options: HashSet::new(),
                queue: VecDeque::new(),
                next: 0,
                fail_submit: false,
                fail_result: false,
                submitted: Vec::new(),
            }
        }
    }

    impl RemoteSession for TableSession {
        fn open(&mut self, _filetype: &str) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn filetype(&self) -> Option<&str> {
            Some("docs")
        }
        fn submit(&mut self, command: &Command) -> Result<TransactionId> {
            if self.fail_submit {
                return Err(SavannahError::Session {
                    code: 503,
                    message: "connection refused".to_string(),
                });
            }
            self.submitted.push(command.clone());
            self.next += 1;
            let name = command.name();
            let (status, message) = self
                .statuses
                .iter()
                .find(|(n, _, _)| *n == name)
                .map(|(_, s, m)| (*s, *m))
                .unwrap_or((StatusCode::Ok, "ok"));
            self.queue
                .push_back(TransferResult::new(self.next, name, status, message).with_size(1));
            Ok(self.next)
        }
        fn outstanding(&self) -> usize {
            self.queue.len()
        }
        fn result(&mut self) -> Result<Option<TransferResult>> {
            if self.fail_result {
                return Err(SavannahError::Session {
                    code: 502,
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.queue.pop_front())
        }
        fn set_option(&mut self, option: SessionOption, value: bool) {
            if value {
                self.options.insert(option);
            } else {
                self.options.remove(&option);
            }
        }
        fn option(&self, option: SessionOption) -> bool {
            self.options.contains(&option)
        }
        fn set_directory(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn directory(&self) -> PathBuf {
            PathBuf::from(".")
        }
        fn list(&mut self, _filter: &ListFilter) -> Result<Vec<CatalogEntry>> {
            Ok(vec![])
        }
    }

    fn orchestrator(session: TableSession) -> (TransferOrchestrator, UiDispatcher) {
        let (ui, dispatcher) = ui_channel();
        let orch = TransferOrchestrator::new(
            SharedSession::new(session),
            ui,
            Arc::new(NullHistory),
            Config::default(),
        );
        (orch, dispatcher)
    }

    /// Dispatch everything posted so far. Every handle must already be dropped.
    fn drain(dispatcher: UiDispatcher) -> ScriptedDelegate {
        let mut script = ScriptedDelegate::new();
        dispatcher.run(&mut script);
        script
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (orch, _dispatcher) = orchestrator(TableSession::new(vec![]));
        let handle = orch.submit("docs", BatchOp::Delete, vec![]).unwrap();
        assert!(handle.is_none());
        assert!(!orch.is_busy());
    }

    #[test]
    fn test_invalid_arguments_fail_before_spawn() {
        let (orch, dispatcher) = orchestrator(TableSession::new(vec![]));

        let empty_ft = orch.submit(" ", BatchOp::Delete, vec!["a".to_string()]);
        assert!(matches!(empty_ft, Err(SavannahError::InvalidArgument(_))));

        let empty_item = orch.submit("docs", BatchOp::Delete, vec!["a".into(), "".into()]);
        assert!(matches!(empty_item, Err(SavannahError::InvalidArgument(_))));

        let rename = orch.submit(
            "docs",
            BatchOp::Rename {
                new_names: vec!["x".to_string()],
            },
            vec!["a".to_string(), "b".to_string()],
        );
        assert!(matches!(rename, Err(SavannahError::InvalidArgument(_))));

        drop(orch);
        let script = drain(dispatcher);
        assert!(script.statuses.is_empty());
        assert!(script.busy.is_empty());
    }

    #[test]
    fn test_failures_continue_batch() {
        let session = TableSession::new(vec![(
            "b",
            StatusCode::Failure(42),
            "permission denied",
        )]);
        let (orch, dispatcher) = orchestrator(session);

        let summary = orch
            .submit(
                "docs",
                BatchOp::Delete,
                vec!["a".into(), "b".into(), "c".into()],
            )
            .unwrap()
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);

        drop(orch);
        let script = drain(dispatcher);
        assert_eq!(
            script.errors,
            vec![("b".to_string(), 42, "permission denied".to_string())]
        );
    }

    #[test]
    fn test_rename_conflict_is_an_error() {
        let session = TableSession::new(vec![("a", StatusCode::FileExists, "exists")]);
        let (orch, _dispatcher) = orchestrator(session);
        let summary = orch
            .submit(
                "docs",
                BatchOp::Rename {
                    new_names: vec!["b".to_string()],
                },
                vec!["a".to_string()],
            )
            .unwrap()
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.refreshes, 0);
    }

    #[test]
    fn test_transport_error_surfaces_per_item() {
        let mut session = TableSession::new(vec![]);
        session.fail_submit = true;
        let (orch, dispatcher) = orchestrator(session);

        let summary = orch
            .submit("docs", BatchOp::Add, vec!["a".into(), "b".into()])
            .unwrap()
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(summary.failed, 2);

        drop(orch);
        let codes: Vec<i32> = drain(dispatcher).errors.iter().map(|e| e.1).collect();
        assert_eq!(codes, vec![503, 503]);
    }

    #[test]
    fn test_lost_connection_mid_transfer_marks_record_error() {
        let mut session = TableSession::new(vec![]);
        session.fail_result = true;
        let (orch, dispatcher) = orchestrator(session);

        let summary = orch
            .submit("docs", BatchOp::Add, vec!["a".into(), "b".into()])
            .unwrap()
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 0);

        drop(orch);
        let mut script = ScriptedDelegate::new();
        let ledger = dispatcher.run(&mut script);
        let states: Vec<_> = ledger.iter().map(|r| (r.name.clone(), r.state)).collect();
        assert_eq!(
            states,
            vec![
                ("a".to_string(), TransferState::Error),
                ("b".to_string(), TransferState::Error),
            ]
        );
        let codes: Vec<_> = script.errors.iter().map(|e| (e.0.as_str(), e.1)).collect();
        assert_eq!(codes, vec![("a", 502), ("b", 502)]);
        assert!(script.errors[0].2.contains("connection reset"));
    }

    #[test]
    fn test_busy_restores_prior_value() {
        let (ui, dispatcher) = ui_channel();
        let busy = BusyIndicator::new(ui);
        {
            let _outer = busy.enter();
            {
                let _inner = busy.enter();
                assert!(busy.is_busy());
            }
            assert!(busy.is_busy());
        }
        assert!(!busy.is_busy());

        drop(busy);
        assert_eq!(drain(dispatcher).busy, vec![true, false]);
    }
}
