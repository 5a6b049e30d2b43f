//! Headless delegate with pre-recorded answers.
//!
//! Answers prompts from queues and records every notification it sees.
//! Once a queue runs dry the fallback answer is used.

use super::{RefreshTarget, UiDelegate};
use crate::conflict::{ConflictChoice, ConflictKind};
use crate::ledger::TransferLedger;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ScriptedDelegate {
    conflict_answers: VecDeque<Option<ConflictChoice>>,
    yes_no_answers: VecDeque<bool>,
    conflict_fallback: Option<ConflictChoice>,
    yes_no_fallback: bool,

    pub statuses: Vec<String>,
    pub errors: Vec<(String, i32, String)>,
    pub refreshes: Vec<RefreshTarget>,
    pub busy: Vec<bool>,
    pub conflict_prompts: Vec<(ConflictKind, String, Vec<ConflictChoice>)>,
    pub yes_no_prompts: Vec<String>,
    pub records_changed: usize,
}

impl ScriptedDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_conflicts(
        mut self,
        answers: impl IntoIterator<Item = Option<ConflictChoice>>,
    ) -> Self {
        self.conflict_answers.extend(answers);
        self
    }

    pub fn answer_yes_no(mut self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.yes_no_answers.extend(answers);
        self
    }

    /// Answer used for every conflict prompt once the queue is empty
    pub fn conflict_fallback(mut self, choice: Option<ConflictChoice>) -> Self {
        self.conflict_fallback = choice;
        self
    }

    pub fn yes_no_fallback(mut self, answer: bool) -> Self {
        self.yes_no_fallback = answer;
        self
    }
}

impl UiDelegate for ScriptedDelegate {
    fn on_status(&mut self, text: &str) {
        self.statuses.push(text.to_string());
    }

    fn on_error(&mut self, item: &str, code: i32, message: &str) {
        self.errors
            .push((item.to_string(), code, message.to_string()));
    }

    fn on_records_changed(&mut self, _ledger: &TransferLedger) {
        self.records_changed += 1;
    }

    fn on_listing_refresh(&mut self, target: RefreshTarget) {
        self.refreshes.push(target);
    }

    fn on_busy(&mut self, busy: bool) {
        self.busy.push(busy);
    }

    fn prompt_conflict(
        &mut self,
        kind: ConflictKind,
        name: &str,
        options: &[ConflictChoice],
    ) -> Option<ConflictChoice> {
        self.conflict_prompts
            .push((kind, name.to_string(), options.to_vec()));
        self.conflict_answers
            .pop_front()
            .unwrap_or(self.conflict_fallback)
    }

    fn prompt_yes_no(&mut self, text: &str) -> bool {
        self.yes_no_prompts.push(text.to_string());
        self.yes_no_answers
            .pop_front()
            .unwrap_or(self.yes_no_fallback)
    }
}
