//! Per-file conflict resolution.
//!
//! When a transfer reports that a like-named file already exists, the
//! orchestrator hands the conflict to [`ConflictResolver::resolve`] on the
//! worker thread. The resolver consults the batch's sticky policy, asks the
//! UI when it has to (blocking until answered), and returns a
//! [`Resolution`]. Applying it is the orchestrator's job: the resolver never
//! touches the session and never cancels the batch itself.

use crate::ui::UiHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// The local destination already has the file
    Download,
    /// The catalog already has the file
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictChoice {
    Cancel,
    SkipAll,
    Skip,
    VersionAll,
    Version,
    ReplaceAll,
    Replace,
    Yes,
    YesToAll,
    No,
}

impl ConflictChoice {
    pub const DOWNLOAD: [ConflictChoice; 7] = [
        ConflictChoice::Cancel,
        ConflictChoice::SkipAll,
        ConflictChoice::Skip,
        ConflictChoice::VersionAll,
        ConflictChoice::Version,
        ConflictChoice::ReplaceAll,
        ConflictChoice::Replace,
    ];

    pub const UPLOAD: [ConflictChoice; 4] = [
        ConflictChoice::Yes,
        ConflictChoice::YesToAll,
        ConflictChoice::No,
        ConflictChoice::Cancel,
    ];

    pub fn options(kind: ConflictKind) -> &'static [ConflictChoice] {
        match kind {
            ConflictKind::Download => &Self::DOWNLOAD,
            ConflictKind::Upload => &Self::UPLOAD,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConflictChoice::Cancel => "Cancel",
            ConflictChoice::SkipAll => "Skip All",
            ConflictChoice::Skip => "Skip",
            ConflictChoice::VersionAll => "Version All",
            ConflictChoice::Version => "Version",
            ConflictChoice::ReplaceAll => "Replace All",
            ConflictChoice::Replace => "Replace",
            ConflictChoice::Yes => "Yes",
            ConflictChoice::YesToAll => "Yes to All",
            ConflictChoice::No => "No",
        }
    }
}

/// How a resubmitted file overwrites the existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Replace,
    Version,
}

/// Sticky decision carried through the rest of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    #[default]
    Default,
    ReplaceAll,
    VersionAll,
    SkipAll,
}

/// Per-batch state threaded through the item loop
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    pub policy: BatchPolicy,
    cancelled: bool,
    identical_asked: bool,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub name: String,
    /// Checksum comparison, present only when diff is enabled
    pub identical: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Both copies are identical; nothing to transfer. `cancel_remaining`
    /// is set when the user chose to stop the rest of the batch.
    AlreadySatisfied { cancel_remaining: bool },
    /// Abort this file, continue with the batch
    Skip,
    /// Discard the attempt and submit this file again
    Resubmit(Overwrite),
    /// Abort this file and every file after it
    CancelRemaining,
}

pub struct ConflictResolver {
    ui: UiHandle,
    prompt_on_identical: bool,
}

impl ConflictResolver {
    pub fn new(ui: UiHandle, prompt_on_identical: bool) -> Self {
        Self {
            ui,
            prompt_on_identical,
        }
    }

    /// Decide what to do with one conflicting file. `remaining` counts the
    /// batch items after this one.
    pub fn resolve(
        &self,
        conflict: &Conflict,
        state: &mut BatchState,
        remaining: usize,
    ) -> Resolution {
        let name = conflict.name.as_str();

        if conflict.identical == Some(true) {
            return self.identical(name, state, remaining);
        }

        match state.policy {
            BatchPolicy::ReplaceAll => return self.resubmit(name, Overwrite::Replace),
            BatchPolicy::VersionAll => return self.resubmit(name, Overwrite::Version),
            BatchPolicy::SkipAll => return self.skip(name),
            BatchPolicy::Default => {}
        }

        let options = ConflictChoice::options(conflict.kind);
        let choice = match self.ui.prompt_conflict(conflict.kind, name, options) {
            Ok(choice) => choice,
            Err(_) => return self.cancel_remaining(),
        };
        tracing::debug!("Conflict on '{}' resolved as {:?}", name, choice);

        match choice {
            None | Some(ConflictChoice::Skip) | Some(ConflictChoice::No) => self.skip(name),
            Some(ConflictChoice::SkipAll) => {
                state.policy = BatchPolicy::SkipAll;
                self.skip(name)
            }
            Some(ConflictChoice::Replace) | Some(ConflictChoice::Yes) => {
                self.resubmit(name, Overwrite::Replace)
            }
            Some(ConflictChoice::ReplaceAll) | Some(ConflictChoice::YesToAll) => {
                state.policy = BatchPolicy::ReplaceAll;
                self.ui.status("Enabling file replacement for remaining files");
                self.resubmit(name, Overwrite::Replace)
            }
            Some(ConflictChoice::Version) => self.resubmit(name, Overwrite::Version),
            Some(ConflictChoice::VersionAll) => {
                state.policy = BatchPolicy::VersionAll;
                self.ui.status("Enabling file versioning for remaining files");
                self.resubmit(name, Overwrite::Version)
            }
            Some(ConflictChoice::Cancel) => self.confirm_cancel(name, state, remaining),
        }
    }

    fn identical(&self, name: &str, state: &mut BatchState, remaining: usize) -> Resolution {
        self.ui
            .status(format!("'{}' is identical to the existing copy", name));

        let mut cancel_remaining = false;
        if remaining > 0 && self.prompt_on_identical && !state.identical_asked {
            state.identical_asked = true;
            let question = format!(
                "'{}' is unchanged. Cancel the remaining {} file(s)?",
                name, remaining
            );
            // No UI to ask means no one to continue for
            cancel_remaining = self.ui.prompt_yes_no(&question).unwrap_or(true);
            if cancel_remaining {
                self.ui.status("Aborted remaining transfer.");
            }
        }
        Resolution::AlreadySatisfied { cancel_remaining }
    }

    fn confirm_cancel(&self, name: &str, state: &mut BatchState, remaining: usize) -> Resolution {
        if remaining == 0 {
            return self.skip(name);
        }
        match self.ui.prompt_yes_no("Cancel remaining files?") {
            Ok(false) => self.skip(name),
            Ok(true) | Err(_) => self.cancel_remaining(),
        }
    }

    fn skip(&self, name: &str) -> Resolution {
        self.ui.status(format!("Skipping '{}'", name));
        Resolution::Skip
    }

    fn resubmit(&self, name: &str, overwrite: Overwrite) -> Resolution {
        match overwrite {
            Overwrite::Replace => self
                .ui
                .status(format!("Enabling file replacement for '{}'", name)),
            Overwrite::Version => self
                .ui
                .status(format!("Enabling file versioning for '{}'", name)),
        }
        Resolution::Resubmit(overwrite)
    }

    fn cancel_remaining(&self) -> Resolution {
        self.ui.status("Aborted remaining transfer.");
        Resolution::CancelRemaining
    }
}
