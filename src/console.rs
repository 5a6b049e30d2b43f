//! Terminal delegate: spinner while busy, stdin prompts for conflicts.

use clap::ValueEnum;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use savannah::conflict::{ConflictChoice, ConflictKind};
use savannah::ledger::{TransferLedger, TransferState};
use savannah::ui::{RefreshTarget, UiDelegate};
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// How conflict prompts get answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Policy {
    /// Ask on the terminal
    Ask,
    Replace,
    Version,
    Skip,
}

impl Policy {
    /// Preferred answers in order; the first one offered wins
    fn preferences(&self) -> &'static [ConflictChoice] {
        match self {
            Policy::Ask => &[],
            Policy::Replace => &[ConflictChoice::ReplaceAll, ConflictChoice::YesToAll],
            Policy::Version => &[ConflictChoice::VersionAll, ConflictChoice::No],
            Policy::Skip => &[ConflictChoice::SkipAll, ConflictChoice::No],
        }
    }
}

pub struct ConsoleDelegate {
    spinner: ProgressBar,
    policy: Policy,
}

impl ConsoleDelegate {
    pub fn new(policy: Policy) -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg}") {
            spinner.set_style(style);
        }
        Self { spinner, policy }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn read_line(&self, question: &str) -> Option<String> {
        self.spinner.suspend(|| {
            print!("{} ", question);
            io::stdout().flush().ok()?;
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim().to_string()),
            }
        })
    }
}

impl UiDelegate for ConsoleDelegate {
    fn on_status(&mut self, text: &str) {
        self.spinner.set_message(text.to_string());
    }

    fn on_error(&mut self, item: &str, code: i32, message: &str) {
        self.spinner.suspend(|| {
            eprintln!(
                "{} {} ({}): {}",
                "error:".red().bold(),
                item.bold(),
                code,
                message
            );
        });
    }

    fn on_records_changed(&mut self, ledger: &TransferLedger) {
        let done = ledger.count(TransferState::Complete);
        self.spinner.set_prefix(format!("[{}/{}]", done, ledger.len()));
    }

    fn on_listing_refresh(&mut self, target: RefreshTarget) {
        tracing::debug!("{:?} listing changed", target);
    }

    fn on_busy(&mut self, busy: bool) {
        if busy {
            self.spinner.enable_steady_tick(Duration::from_millis(100));
        } else {
            self.spinner.disable_steady_tick();
        }
    }

    fn prompt_conflict(
        &mut self,
        kind: ConflictKind,
        name: &str,
        options: &[ConflictChoice],
    ) -> Option<ConflictChoice> {
        if self.policy != Policy::Ask {
            return self
                .policy
                .preferences()
                .iter()
                .find(|choice| options.contains(choice))
                .copied();
        }

        let heading = match kind {
            ConflictKind::Download => format!("'{}' already exists locally.", name),
            ConflictKind::Upload => format!("'{}' already exists in the catalog. Replace it?", name),
        };
        self.spinner.suspend(|| {
            println!("{}", heading.yellow());
            for (n, choice) in options.iter().enumerate() {
                println!("  {}) {}", n + 1, choice.label());
            }
        });

        // Anything unparseable dismisses the prompt
        let answer = self.read_line("Choice:")?;
        let n: usize = answer.parse().ok()?;
        options.get(n.checked_sub(1)?).copied()
    }

    fn prompt_yes_no(&mut self, text: &str) -> bool {
        if self.policy != Policy::Ask {
            return false;
        }
        self.read_line(&format!("{} [y/N]", text))
            .map(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }
}
