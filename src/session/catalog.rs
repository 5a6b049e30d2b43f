//! Filesystem-backed catalog session.
//!
//! Each filetype is a sub-directory of the catalog root. Comments are kept
//! beside the files in a hidden `.comments/` directory. Commands execute
//! at submit time and their results wait in a queue until drained.

use super::{
    CatalogEntry, Command, ListFilter, RemoteSession, SessionOption, StatusCode, TransactionId,
    TransferResult,
};
use crate::checksum::file_checksum;
use crate::error::{Result, SavannahError};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

const COMMENT_DIR: &str = ".comments";

pub struct LocalCatalog {
    root: PathBuf,
    filetype: Option<String>,
    directory: PathBuf,
    options: HashSet<SessionOption>,
    pending: VecDeque<TransferResult>,
    next_transaction: TransactionId,
}

/// Reject names that could escape the filetype directory
fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("Empty name not allowed".to_string());
    }
    if name.starts_with('.') {
        return Err(format!("Hidden names not allowed: {}", name));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("Invalid catalog name: {}", name)),
    }
}

fn io_status(err: &io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NotFound,
        _ => StatusCode::Failure(err.raw_os_error().unwrap_or(-1)),
    }
}

/// Copy through a temp file in the destination directory, then rename into place
fn copy_atomic(src: &Path, dest: &Path) -> io::Result<u64> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let mut input = File::open(src)?;
    let size = io::copy(&mut input, tmp.as_file_mut())?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(size)
}

/// Digest of `dest` if it matches `src`, `None` when the copies differ
fn verify_copy(src: &Path, dest: &Path) -> io::Result<Option<String>> {
    let stored = file_checksum(dest)?;
    Ok((file_checksum(src)? == stored).then_some(stored))
}

/// Move an existing file aside as `<name>.~N~`, lowest free N
fn version_aside(path: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 1u32;
    loop {
        let candidate = path.with_file_name(format!("{}.~{}~", name, n));
        if !candidate.exists() {
            fs::rename(path, &candidate)?;
            return Ok(candidate);
        }
        n += 1;
    }
}

impl LocalCatalog {
    /// Open a catalog rooted at `root`, creating it if needed.
    /// `directory` is the initial local working directory.
    pub fn new(root: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            filetype: None,
            directory: directory.into(),
            options: HashSet::new(),
            pending: VecDeque::new(),
            next_transaction: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_filetype(&self, filetype: &str) -> Result<()> {
        validate_name(filetype).map_err(SavannahError::InvalidArgument)?;
        fs::create_dir_all(self.root.join(filetype).join(COMMENT_DIR))?;
        Ok(())
    }

    fn filetype_dir(&self) -> Result<PathBuf> {
        match self.filetype {
            Some(ref ft) => Ok(self.root.join(ft)),
            None => Err(SavannahError::Session {
                code: StatusCode::NOT_FOUND,
                message: "No filetype open".to_string(),
            }),
        }
    }

    fn comment_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(COMMENT_DIR).join(name)
    }

    fn resolve_local(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.directory.join(path)
        }
    }

    fn is_set(&self, option: SessionOption) -> bool {
        self.options.contains(&option)
    }

    fn execute(&self, tx: TransactionId, dir: &Path, command: &Command) -> TransferResult {
        let name = command.name();
        if let Err(msg) = validate_name(&name) {
            return TransferResult::new(tx, name, StatusCode::Failure(-1), msg);
        }
        let outcome = match command {
            Command::Add { path } => self.put(tx, dir, &name, path, false),
            Command::Replace { path } => self.put(tx, dir, &name, path, true),
            Command::Get { .. } => self.get(tx, dir, &name),
            Command::Delete { .. } => self.delete(tx, dir, &name),
            Command::Rename { to, .. } => self.rename(tx, dir, &name, to),
            Command::Comment { text, .. } => self.comment(tx, dir, &name, text),
        };
        outcome.unwrap_or_else(|e| TransferResult::new(tx, &name, io_status(&e), e.to_string()))
    }

    fn put(
        &self,
        tx: TransactionId,
        dir: &Path,
        name: &str,
        local: &Path,
        must_exist: bool,
    ) -> io::Result<TransferResult> {
        let local = self.resolve_local(local);
        if !local.is_file() {
            return Ok(TransferResult::new(
                tx,
                name,
                StatusCode::NotFound,
                format!("No such local file: {}", local.display()),
            ));
        }

        let dest = dir.join(name);
        let exists = dest.exists();
        if must_exist && !exists {
            return Ok(TransferResult::new(
                tx,
                name,
                StatusCode::NotFound,
                format!("'{}' is not in the catalog", name),
            ));
        }
        if exists && !must_exist {
            if self.is_set(SessionOption::Version) {
                version_aside(&dest)?;
            } else if !self.is_set(SessionOption::Replace) {
                return Ok(TransferResult::new(
                    tx,
                    name,
                    StatusCode::FileExists,
                    format!("File '{}' already exists", name),
                )
                .with_checksum(file_checksum(&dest)?));
            }
        }

        self.store(tx, name, &local, &dest, format!("Stored '{}'", name))
    }

    fn get(&self, tx: TransactionId, dir: &Path, name: &str) -> io::Result<TransferResult> {
        let src = dir.join(name);
        if !src.is_file() {
            return Ok(TransferResult::new(
                tx,
                name,
                StatusCode::NotFound,
                format!("'{}' is not in the catalog", name),
            ));
        }

        let local = self.directory.join(name);
        if local.exists() {
            if self.is_set(SessionOption::Version) {
                version_aside(&local)?;
            } else if !self.is_set(SessionOption::Replace) {
                return Ok(TransferResult::new(
                    tx,
                    name,
                    StatusCode::FileAlreadyExists,
                    format!("Local file '{}' already exists", local.display()),
                )
                .with_checksum(file_checksum(&src)?));
            }
        }

        self.store(tx, name, &src, &local, format!("Received '{}'", name))
    }

    fn store(
        &self,
        tx: TransactionId,
        name: &str,
        src: &Path,
        dest: &Path,
        message: String,
    ) -> io::Result<TransferResult> {
        let size = copy_atomic(src, dest)?;
        let checksum = if self.is_set(SessionOption::Checksum) {
            match verify_copy(src, dest)? {
                Some(checksum) => checksum,
                None => {
                    tracing::warn!("Checksum mismatch after copying '{}'", name);
                    return Ok(TransferResult::new(
                        tx,
                        name,
                        StatusCode::Failure(-1),
                        format!("Checksum mismatch for '{}'", name),
                    ));
                }
            }
        } else {
            file_checksum(dest)?
        };
        Ok(TransferResult::new(tx, name, StatusCode::Ok, message)
            .with_size(size)
            .with_checksum(checksum))
    }

    fn delete(&self, tx: TransactionId, dir: &Path, name: &str) -> io::Result<TransferResult> {
        fs::remove_file(dir.join(name))?;
        let comment = Self::comment_path(dir, name);
        if comment.exists() {
            fs::remove_file(comment)?;
        }
        Ok(TransferResult::new(
            tx,
            name,
            StatusCode::Ok,
            format!("Deleted '{}'", name),
        ))
    }

    fn rename(
        &self,
        tx: TransactionId,
        dir: &Path,
        from: &str,
        to: &str,
    ) -> io::Result<TransferResult> {
        if let Err(msg) = validate_name(to) {
            return Ok(TransferResult::new(tx, from, StatusCode::Failure(-1), msg));
        }
        let src = dir.join(from);
        if !src.is_file() {
            return Ok(TransferResult::new(
                tx,
                from,
                StatusCode::NotFound,
                format!("'{}' is not in the catalog", from),
            ));
        }
        let dest = dir.join(to);
        if dest.exists() {
            return Ok(TransferResult::new(
                tx,
                from,
                StatusCode::FileExists,
                format!("File '{}' already exists", to),
            ));
        }
        fs::rename(&src, &dest)?;
        let comment = Self::comment_path(dir, from);
        if comment.exists() {
            fs::rename(comment, Self::comment_path(dir, to))?;
        }
        Ok(TransferResult::new(
            tx,
            from,
            StatusCode::Ok,
            format!("Renamed '{}' to '{}'", from, to),
        ))
    }

    fn comment(
        &self,
        tx: TransactionId,
        dir: &Path,
        name: &str,
        text: &str,
    ) -> io::Result<TransferResult> {
        if !dir.join(name).is_file() {
            return Ok(TransferResult::new(
                tx,
                name,
                StatusCode::NotFound,
                format!("'{}' is not in the catalog", name),
            ));
        }
        let path = Self::comment_path(dir, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(TransferResult::new(
            tx,
            name,
            StatusCode::Ok,
            format!("Commented '{}'", name),
        ))
    }
}

impl RemoteSession for LocalCatalog {
    fn open(&mut self, filetype: &str) -> Result<()> {
        validate_name(filetype).map_err(SavannahError::InvalidArgument)?;
        if !self.root.join(filetype).is_dir() {
            return Err(SavannahError::Session {
                code: StatusCode::NOT_FOUND,
                message: format!("No such filetype: {}", filetype),
            });
        }
        self.filetype = Some(filetype.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.filetype = None;
    }

    fn filetype(&self) -> Option<&str> {
        self.filetype.as_deref()
    }

    fn submit(&mut self, command: &Command) -> Result<TransactionId> {
        let dir = self.filetype_dir()?;
        self.next_transaction += 1;
        let tx = self.next_transaction;
        let result = self.execute(tx, &dir, command);
        tracing::debug!(
            "catalog tx {}: {:?} -> {:?}",
            tx,
            command,
            result.status
        );
        self.pending.push_back(result);
        Ok(tx)
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn result(&mut self) -> Result<Option<TransferResult>> {
        Ok(self.pending.pop_front())
    }

    fn set_option(&mut self, option: SessionOption, value: bool) {
        if value {
            self.options.insert(option);
        } else {
            self.options.remove(&option);
        }
    }

    fn option(&self, option: SessionOption) -> bool {
        self.is_set(option)
    }

    fn set_directory(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(SavannahError::InvalidArgument(format!(
                "Not a directory: {}",
                path.display()
            )));
        }
        self.directory = path.to_path_buf();
        Ok(())
    }

    fn directory(&self) -> PathBuf {
        self.directory.clone()
    }

    fn list(&mut self, filter: &ListFilter) -> Result<Vec<CatalogEntry>> {
        let dir = self.filetype_dir()?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata()?;
            if name.starts_with('.') || !metadata.is_file() {
                continue;
            }
            let modified = DateTime::<Utc>::from(metadata.modified()?);
            if !filter.matches(&name, modified) {
                continue;
            }
            let comment = fs::read_to_string(Self::comment_path(&dir, &name)).ok();
            entries.push(CatalogEntry {
                name,
                size: metadata.len(),
                modified,
                comment,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::drain_transaction;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        local: PathBuf,
        catalog: LocalCatalog,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("local");
        fs::create_dir(&local).unwrap();
        let mut catalog = LocalCatalog::new(tmp.path().join("catalog"), &local).unwrap();
        catalog.create_filetype("docs").unwrap();
        catalog.open("docs").unwrap();
        Fixture {
            _tmp: tmp,
            local,
            catalog,
        }
    }

    fn run(catalog: &mut LocalCatalog, command: Command) -> TransferResult {
        let tx = catalog.submit(&command).unwrap();
        let mut results = drain_transaction(catalog, tx).unwrap();
        assert_eq!(results.len(), 1);
        results.remove(0)
    }

    #[test]
    fn test_add_then_conflict_then_replace() {
        let mut f = fixture();
        fs::write(f.local.join("a.txt"), "one").unwrap();

        let add = Command::Add {
            path: PathBuf::from("a.txt"),
        };
        let first = run(&mut f.catalog, add.clone());
        assert_eq!(first.status, StatusCode::Ok);
        assert_eq!(first.size, Some(3));

        fs::write(f.local.join("a.txt"), "two!").unwrap();
        let second = run(&mut f.catalog, add.clone());
        assert!(second.is_conflict());
        assert!(second.checksum.is_some());

        f.catalog.set_option(SessionOption::Replace, true);
        let third = run(&mut f.catalog, add);
        assert!(third.is_ok());
        assert_eq!(
            fs::read_to_string(f.catalog.root().join("docs/a.txt")).unwrap(),
            "two!"
        );
    }

    #[test]
    fn test_checksum_option_verifies_copies() {
        let mut f = fixture();
        f.catalog.set_option(SessionOption::Checksum, true);
        fs::write(f.local.join("v.bin"), "verified").unwrap();

        let stored = run(
            &mut f.catalog,
            Command::Add {
                path: PathBuf::from("v.bin"),
            },
        );
        assert!(stored.is_ok());
        assert_eq!(
            stored.checksum.unwrap(),
            file_checksum(&f.local.join("v.bin")).unwrap()
        );

        fs::remove_file(f.local.join("v.bin")).unwrap();
        let received = run(
            &mut f.catalog,
            Command::Get {
                name: "v.bin".to_string(),
            },
        );
        assert!(received.is_ok());
        assert_eq!(fs::read_to_string(f.local.join("v.bin")).unwrap(), "verified");
    }

    #[test]
    fn test_verify_copy_detects_mismatch() {
        let f = fixture();
        let src = f.local.join("src");
        let dest = f.local.join("dest");
        fs::write(&src, "original").unwrap();
        fs::write(&dest, "corrupted").unwrap();
        assert_eq!(verify_copy(&src, &dest).unwrap(), None);

        fs::write(&dest, "original").unwrap();
        assert_eq!(
            verify_copy(&src, &dest).unwrap(),
            Some(file_checksum(&src).unwrap())
        );
    }

    #[test]
    fn test_version_keeps_old_copy() {
        let mut f = fixture();
        fs::write(f.local.join("a.txt"), "one").unwrap();
        run(
            &mut f.catalog,
            Command::Add {
                path: PathBuf::from("a.txt"),
            },
        );

        fs::write(f.local.join("a.txt"), "two").unwrap();
        f.catalog.set_option(SessionOption::Version, true);
        let result = run(
            &mut f.catalog,
            Command::Add {
                path: PathBuf::from("a.txt"),
            },
        );
        assert!(result.is_ok());

        let docs = f.catalog.root().join("docs");
        assert_eq!(fs::read_to_string(docs.join("a.txt")).unwrap(), "two");
        assert_eq!(fs::read_to_string(docs.join("a.txt.~1~")).unwrap(), "one");
    }

    #[test]
    fn test_get_reports_existing_local_file() {
        let mut f = fixture();
        fs::write(f.catalog.root().join("docs/r.bin"), "remote").unwrap();

        let got = run(
            &mut f.catalog,
            Command::Get {
                name: "r.bin".to_string(),
            },
        );
        assert!(got.is_ok());
        assert_eq!(fs::read_to_string(f.local.join("r.bin")).unwrap(), "remote");

        let again = run(
            &mut f.catalog,
            Command::Get {
                name: "r.bin".to_string(),
            },
        );
        assert_eq!(again.status, StatusCode::FileAlreadyExists);
        assert_eq!(
            again.checksum.unwrap(),
            file_checksum(&f.local.join("r.bin")).unwrap()
        );
    }

    #[test]
    fn test_replace_requires_existing() {
        let mut f = fixture();
        fs::write(f.local.join("new.txt"), "x").unwrap();
        let result = run(
            &mut f.catalog,
            Command::Replace {
                path: PathBuf::from("new.txt"),
            },
        );
        assert_eq!(result.status, StatusCode::NotFound);
    }

    #[test]
    fn test_rename_comment_delete() {
        let mut f = fixture();
        let docs = f.catalog.root().join("docs");
        fs::write(docs.join("a"), "1").unwrap();
        fs::write(docs.join("b"), "2").unwrap();

        let comment = run(
            &mut f.catalog,
            Command::Comment {
                name: "a".to_string(),
                text: "first".to_string(),
            },
        );
        assert!(comment.is_ok());

        let clash = run(
            &mut f.catalog,
            Command::Rename {
                from: "a".to_string(),
                to: "b".to_string(),
            },
        );
        assert!(clash.is_conflict());

        let renamed = run(
            &mut f.catalog,
            Command::Rename {
                from: "a".to_string(),
                to: "c".to_string(),
            },
        );
        assert!(renamed.is_ok());

        let listing = f.catalog.list(&ListFilter::default()).unwrap();
        let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(listing[1].comment.as_deref(), Some("first"));

        let deleted = run(
            &mut f.catalog,
            Command::Delete {
                name: "c".to_string(),
            },
        );
        assert!(deleted.is_ok());
        let missing = run(
            &mut f.catalog,
            Command::Delete {
                name: "c".to_string(),
            },
        );
        assert_eq!(missing.status, StatusCode::NotFound);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let mut f = fixture();
        let result = run(
            &mut f.catalog,
            Command::Get {
                name: "../escape".to_string(),
            },
        );
        assert!(matches!(result.status, StatusCode::Failure(_)));
        assert!(f.catalog.open("..").is_err());
    }

    #[test]
    fn test_submit_without_filetype() {
        let tmp = TempDir::new().unwrap();
        let mut catalog = LocalCatalog::new(tmp.path(), tmp.path()).unwrap();
        let err = catalog
            .submit(&Command::Delete {
                name: "x".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SavannahError::Session { .. }));
    }
}
