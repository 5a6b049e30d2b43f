// Receival history
//
// Records every completed transfer. Uses a text file rewritten atomically
// after each entry, one line per transfer: <rfc3339> <direction> <name>

use crate::error::{Result, SavannahError};
use crate::ledger::TransferDirection;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Collaborator told about each completed transfer
pub trait History: Send + Sync {
    fn record_completed(&self, name: &str, direction: TransferDirection);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub when: DateTime<Utc>,
    pub direction: TransferDirection,
    pub name: String,
}

/// History kept in a plain text file
pub struct HistoryLog {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryLog {
    const FORMAT_VERSION: &'static str = "v1";

    /// Default location (~/.local/share/savannah/history.lst)
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().ok_or_else(|| {
            SavannahError::Config("Cannot determine data directory".to_string())
        })?;
        Ok(data_dir.join("savannah").join("history.lst"))
    }

    /// Open or create the history file
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn load_from_file(path: &Path) -> Result<Vec<HistoryEntry>> {
        let reader = BufReader::new(fs::File::open(path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // The name is the remainder, so it may contain spaces
            let parts: Vec<&str> = line.splitn(3, ' ').collect();
            if parts.len() != 3 {
                continue;
            }
            let Ok(when) = DateTime::parse_from_rfc3339(parts[0]) else {
                continue;
            };
            let Some(direction) = TransferDirection::from_str(parts[1]) else {
                continue;
            };

            entries.push(HistoryEntry {
                when: when.with_timezone(&Utc),
                direction,
                name: parts[2].to_string(),
            });
        }

        Ok(entries)
    }

    fn save_to_file(&self, entries: &[HistoryEntry]) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(dir)?;

        writeln!(file, "# savannah history {}", Self::FORMAT_VERSION)?;
        for entry in entries {
            writeln!(
                file,
                "{} {} {}",
                entry.when.to_rfc3339(),
                entry.direction,
                entry.name
            )?;
        }

        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn append(&self, name: &str, direction: TransferDirection) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SavannahError::Worker("history lock poisoned".to_string()))?;
        entries.push(HistoryEntry {
            when: Utc::now(),
            direction,
            name: name.to_string(),
        });
        self.save_to_file(&entries)
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl History for HistoryLog {
    fn record_completed(&self, name: &str, direction: TransferDirection) {
        if let Err(e) = self.append(name, direction) {
            tracing::warn!(
                "Failed to record '{}' in {}: {}",
                name,
                self.path.display(),
                e
            );
        }
    }
}
