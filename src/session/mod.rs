//! Remote session abstraction.
//!
//! The catalog service is reached through an opaque [`RemoteSession`]:
//! commands are submitted and return a transaction id, then results are
//! drained one at a time until the outstanding count reaches zero.
//!
//! The session's option flags and working directory are process-wide
//! state. [`SharedSession`] is the single lock around it, and every lock
//! acquisition yields a [`SessionScope`] that puts options and directory
//! back the way it found them when dropped.

pub mod catalog;

pub use catalog::LocalCatalog;

use crate::checksum;
use crate::error::{Result, SavannahError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque id returned by [`RemoteSession::submit`]
pub type TransactionId = u64;

// =============================================================================
// Status codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    FileExists,
    FileAlreadyExists,
    /// Legacy servers report an existing file this way when it is held open.
    FileLocked,
    NotFound,
    Failure(i32),
}

impl StatusCode {
    pub const OK: i32 = 0;
    pub const FILE_EXISTS: i32 = 10;
    pub const FILE_ALREADY_EXISTS: i32 = 11;
    pub const FILE_LOCKED: i32 = 12;
    pub const NOT_FOUND: i32 = 20;

    pub fn code(&self) -> i32 {
        match self {
            StatusCode::Ok => Self::OK,
            StatusCode::FileExists => Self::FILE_EXISTS,
            StatusCode::FileAlreadyExists => Self::FILE_ALREADY_EXISTS,
            StatusCode::FileLocked => Self::FILE_LOCKED,
            StatusCode::NotFound => Self::NOT_FOUND,
            StatusCode::Failure(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::OK => StatusCode::Ok,
            Self::FILE_EXISTS => StatusCode::FileExists,
            Self::FILE_ALREADY_EXISTS => StatusCode::FileAlreadyExists,
            Self::FILE_LOCKED => StatusCode::FileLocked,
            Self::NOT_FOUND => StatusCode::NotFound,
            other => StatusCode::Failure(other),
        }
    }
}

/// Session-wide boolean options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOption {
    /// Overwrite an existing file instead of reporting it
    Replace,
    /// Keep the existing file as a numbered version, then write
    Version,
    /// Compare checksums before treating an existing file as a conflict
    Diff,
    /// Verify the written copy against its source, failing the item on mismatch
    Checksum,
}

impl SessionOption {
    pub const ALL: [SessionOption; 4] = [
        SessionOption::Replace,
        SessionOption::Version,
        SessionOption::Diff,
        SessionOption::Checksum,
    ];
}

// =============================================================================
// Commands and results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { path: PathBuf },
    Replace { path: PathBuf },
    Get { name: String },
    Delete { name: String },
    Rename { from: String, to: String },
    Comment { name: String, text: String },
}

impl Command {
    /// Catalog-side name the command operates on
    pub fn name(&self) -> String {
        match self {
            Command::Add { path } | Command::Replace { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            Command::Get { name }
            | Command::Delete { name }
            | Command::Rename { from: name, .. }
            | Command::Comment { name, .. } => name.clone(),
        }
    }
}

/// One drained sub-result of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub transaction: TransactionId,
    pub name: String,
    pub status: StatusCode,
    pub message: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
}

impl TransferResult {
    pub fn new(
        transaction: TransactionId,
        name: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transaction,
            name: name.into(),
            status,
            message: message.into(),
            size: None,
            checksum: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// Whether the result reports a like-named entry that already exists.
    ///
    /// `FileLocked` counts only when its message says the file exists.
    pub fn is_conflict(&self) -> bool {
        match self.status {
            StatusCode::FileExists | StatusCode::FileAlreadyExists => true,
            StatusCode::FileLocked => self.message.to_ascii_lowercase().contains("exist"),
            _ => false,
        }
    }
}

// =============================================================================
// Listing
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub pattern: Option<glob::Pattern>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ListFilter {
    pub fn matches(&self, name: &str, modified: DateTime<Utc>) -> bool {
        if let Some(ref pattern) = self.pattern {
            if !pattern.matches(name) {
                return false;
            }
        }
        if self.since.is_some_and(|since| modified < since) {
            return false;
        }
        if self.until.is_some_and(|until| modified > until) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub comment: Option<String>,
}

// =============================================================================
// RemoteSession
// =============================================================================

pub trait RemoteSession: Send {
    /// Open the channel for a filetype, closing any other one
    fn open(&mut self, filetype: &str) -> Result<()>;

    fn close(&mut self);

    fn filetype(&self) -> Option<&str>;

    fn submit(&mut self, command: &Command) -> Result<TransactionId>;

    /// Number of sub-results not yet drained
    fn outstanding(&self) -> usize;

    /// Next available result, or `None` when nothing is ready yet
    fn result(&mut self) -> Result<Option<TransferResult>>;

    fn set_option(&mut self, option: SessionOption, value: bool);

    fn option(&self, option: SessionOption) -> bool;

    /// Local working directory downloads land in and uploads resolve against
    fn set_directory(&mut self, path: &Path) -> Result<()>;

    fn directory(&self) -> PathBuf;

    fn list(&mut self, filter: &ListFilter) -> Result<Vec<CatalogEntry>>;

    /// Checksum of a local file, computed the way the session computes remote ones
    fn local_checksum(&self, path: &Path) -> io::Result<String> {
        checksum::file_checksum(path)
    }
}

/// Drain every result of `transaction`, yielding between empty polls.
///
/// No timeout: a session that never produces its results blocks the
/// caller indefinitely.
pub fn drain_transaction(
    session: &mut dyn RemoteSession,
    transaction: TransactionId,
) -> Result<Vec<TransferResult>> {
    let mut results = Vec::new();
    while session.outstanding() > 0 {
        match session.result()? {
            Some(result) if result.transaction == transaction => results.push(result),
            Some(stray) => {
                tracing::warn!(
                    "Dropping result for transaction {} while draining {}",
                    stray.transaction,
                    transaction
                );
            }
            None => std::thread::yield_now(),
        }
    }
    Ok(results)
}

// =============================================================================
// Shared handle and scoped access
// =============================================================================

/// The one lock every batch goes through to reach the session
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Box<dyn RemoteSession>>>,
}

impl SharedSession {
    pub fn new<S: RemoteSession + 'static>(session: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(session))),
        }
    }

    /// Acquire the lock. Options and directory changed through the
    /// returned scope are restored when it drops.
    pub fn lock(&self) -> Result<SessionScope<'_>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| SavannahError::SessionPoisoned)?;
        Ok(SessionScope {
            guard,
            saved_options: Vec::new(),
            saved_directory: None,
        })
    }

    /// Run a closure against the session under the lock
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn RemoteSession) -> R) -> Result<R> {
        let mut scope = self.lock()?;
        Ok(f(&mut *scope))
    }
}

pub struct SessionScope<'a> {
    guard: MutexGuard<'a, Box<dyn RemoteSession>>,
    saved_options: Vec<(SessionOption, bool)>,
    saved_directory: Option<PathBuf>,
}

impl SessionScope<'_> {
    /// Set an option for the lifetime of this scope
    pub fn set_scoped_option(&mut self, option: SessionOption, value: bool) {
        if !self.saved_options.iter().any(|(saved, _)| *saved == option) {
            let prior = self.guard.option(option);
            self.saved_options.push((option, prior));
        }
        self.guard.set_option(option, value);
    }

    /// Point the session at another directory for the lifetime of this scope
    pub fn set_scoped_directory(&mut self, path: &Path) -> Result<()> {
        if self.saved_directory.is_none() {
            self.saved_directory = Some(self.guard.directory());
        }
        self.guard.set_directory(path)
    }
}

impl Deref for SessionScope<'_> {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for SessionScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        for (option, value) in self.saved_options.drain(..).rev() {
            self.guard.set_option(option, value);
        }
        if let Some(dir) = self.saved_directory.take() {
            if let Err(e) = self.guard.set_directory(&dir) {
                tracing::warn!(
                    "Failed to restore session directory {}: {}",
                    dir.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// Session that answers every command with a canned status
    #[derive(Default)]
    struct CannedSession {
        options: HashMap<SessionOption, bool>,
        directory: PathBuf,
        queue: VecDeque<TransferResult>,
        next_id: TransactionId,
        empty_polls: usize,
    }

    impl RemoteSession for CannedSession {
        fn open(&mut self, _filetype: &str) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn filetype(&self) -> Option<&str> {
            None
        }
        fn submit(&mut self, command: &Command) -> Result<TransactionId> {
            self.next_id += 1;
            self.queue.push_back(TransferResult::new(
                self.next_id,
                command.name(),
                StatusCode::Ok,
                "done",
            ));
            Ok(self.next_id)
        }
        fn outstanding(&self) -> usize {
            self.queue.len()
        }
        fn result(&mut self) -> Result<Option<TransferResult>> {
            // Report "not ready" a few times before handing out each result
            if self.empty_polls < 3 {
                self.empty_polls += 1;
                return Ok(None);
            }
            self.empty_polls = 0;
            Ok(self.queue.pop_front())
        }
        fn set_option(&mut self, option: SessionOption, value: bool) {
            self.options.insert(option, value);
        }
        fn option(&self, option: SessionOption) -> bool {
            self.options.get(&option).copied().unwrap_or(false)
        }
        fn set_directory(&mut self, path: &Path) -> Result<()> {
            self.directory = path.to_path_buf();
            Ok(())
        }
        fn directory(&self) -> PathBuf {
            self.directory.clone()
        }
        fn list(&mut self, _filter: &ListFilter) -> Result<Vec<CatalogEntry>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_status_code_roundtrip_and_legacy_lock() {
        for code in [0, 10, 11, 12, 20, 99] {
            assert_eq!(StatusCode::from_code(code).code(), code);
        }

        let locked = TransferResult::new(1, "a", StatusCode::FileLocked, "File already exists");
        assert!(locked.is_conflict());
        let busy = TransferResult::new(1, "a", StatusCode::FileLocked, "locked by writer");
        assert!(!busy.is_conflict());
        assert!(TransferResult::new(1, "a", StatusCode::FileAlreadyExists, "").is_conflict());
        assert!(!TransferResult::new(1, "a", StatusCode::Failure(7), "exists").is_conflict());
    }

    #[test]
    fn test_scope_restores_options_and_directory() {
        let shared = SharedSession::new(CannedSession {
            directory: PathBuf::from("/home"),
            ..Default::default()
        });

        {
            let mut scope = shared.lock().unwrap();
            scope.set_scoped_option(SessionOption::Replace, true);
            scope.set_scoped_option(SessionOption::Replace, false);
            scope.set_scoped_option(SessionOption::Version, true);
            scope.set_scoped_directory(Path::new("/tmp/dest")).unwrap();
            assert!(scope.option(SessionOption::Version));
            assert_eq!(scope.directory(), PathBuf::from("/tmp/dest"));
        }

        shared
            .with(|s| {
                assert!(!s.option(SessionOption::Replace));
                assert!(!s.option(SessionOption::Version));
                assert_eq!(s.directory(), PathBuf::from("/home"));
            })
            .unwrap();
    }

    #[test]
    fn test_drain_waits_through_empty_polls() {
        let mut session = CannedSession::default();
        let tx = session
            .submit(&Command::Get {
                name: "a.txt".to_string(),
            })
            .unwrap();

        let results = drain_transaction(&mut session, tx).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a.txt");
        assert_eq!(session.outstanding(), 0);
    }

    #[test]
    fn test_command_name() {
        let add = Command::Add {
            path: PathBuf::from("/data/in/report.csv"),
        };
        assert_eq!(add.name(), "report.csv");
        let rename = Command::Rename {
            from: "old".to_string(),
            to: "new".to_string(),
        };
        assert_eq!(rename.name(), "old");
    }

    #[test]
    fn test_list_filter() {
        let now = Utc::now();
        let filter = ListFilter {
            pattern: Some(glob::Pattern::new("*.txt").unwrap()),
            since: Some(now - chrono::Duration::hours(1)),
            until: None,
        };
        assert!(filter.matches("a.txt", now));
        assert!(!filter.matches("a.csv", now));
        assert!(!filter.matches("a.txt", now - chrono::Duration::hours(2)));
    }
}
