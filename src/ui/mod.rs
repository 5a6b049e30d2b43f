//! Worker -> UI thread bridge.
//!
//! Workers hold a [`UiHandle`] and post [`UiEvent`]s over an unbounded
//! channel. A single [`UiDispatcher`] drains the channel on the UI thread,
//! applies ledger updates to the ledger it owns, and hands everything else
//! to a [`UiDelegate`].
//!
//! Posts are fire-and-forget. Prompts are the one synchronous crossing:
//! the event carries a bounded(1) reply sender and the worker blocks on the
//! receiving end. If the dispatcher goes away the reply sender drops with
//! the event, and the worker sees [`UiDisconnected`] instead of hanging.

pub mod scripted;

use crate::conflict::{ConflictChoice, ConflictKind};
use crate::ledger::{LedgerUpdate, TransferLedger};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::fmt;

/// Which listing should be reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTarget {
    Remote,
    Local,
}

#[derive(Debug)]
pub enum UiEvent {
    Status(String),
    Error {
        item: String,
        code: i32,
        message: String,
    },
    Ledger(LedgerUpdate),
    ListingRefresh(RefreshTarget),
    Busy(bool),
    Prompt(Prompt),
}

#[derive(Debug)]
pub enum Prompt {
    Conflict {
        kind: ConflictKind,
        name: String,
        options: Vec<ConflictChoice>,
        reply: Sender<Option<ConflictChoice>>,
    },
    YesNo {
        text: String,
        reply: Sender<bool>,
    },
}

/// The UI side stopped listening before answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiDisconnected;

impl fmt::Display for UiDisconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UI thread disconnected")
    }
}

impl std::error::Error for UiDisconnected {}

/// Create a connected handle/dispatcher pair
pub fn ui_channel() -> (UiHandle, UiDispatcher) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        UiHandle { tx },
        UiDispatcher {
            rx,
            ledger: TransferLedger::new(),
        },
    )
}

#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiEvent>,
}

impl UiHandle {
    fn post(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("UI dispatcher gone, dropping event");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{}", text);
        self.post(UiEvent::Status(text));
    }

    pub fn error(&self, item: impl Into<String>, code: i32, message: impl Into<String>) {
        let (item, message) = (item.into(), message.into());
        tracing::warn!("'{}' failed ({}): {}", item, code, message);
        self.post(UiEvent::Error {
            item,
            code,
            message,
        });
    }

    pub fn ledger(&self, update: LedgerUpdate) {
        self.post(UiEvent::Ledger(update));
    }

    pub fn refresh(&self, target: RefreshTarget) {
        self.post(UiEvent::ListingRefresh(target));
    }

    pub fn busy(&self, busy: bool) {
        self.post(UiEvent::Busy(busy));
    }

    /// Ask the UI how to resolve a conflict. Blocks until answered.
    /// `Ok(None)` means the prompt was dismissed without a choice.
    pub fn prompt_conflict(
        &self,
        kind: ConflictKind,
        name: &str,
        options: &[ConflictChoice],
    ) -> Result<Option<ConflictChoice>, UiDisconnected> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.tx
            .send(UiEvent::Prompt(Prompt::Conflict {
                kind,
                name: name.to_string(),
                options: options.to_vec(),
                reply,
            }))
            .map_err(|_| UiDisconnected)?;
        answer.recv().map_err(|_| UiDisconnected)
    }

    /// Ask a yes/no question. Blocks until answered.
    pub fn prompt_yes_no(&self, text: &str) -> Result<bool, UiDisconnected> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.tx
            .send(UiEvent::Prompt(Prompt::YesNo {
                text: text.to_string(),
                reply,
            }))
            .map_err(|_| UiDisconnected)?;
        answer.recv().map_err(|_| UiDisconnected)
    }
}

/// UI-thread collaborator. Everything but the prompts has a no-op default.
pub trait UiDelegate {
    fn on_status(&mut self, _text: &str) {}

    fn on_error(&mut self, _item: &str, _code: i32, _message: &str) {}

    fn on_records_changed(&mut self, _ledger: &TransferLedger) {}

    fn on_listing_refresh(&mut self, _target: RefreshTarget) {}

    fn on_busy(&mut self, _busy: bool) {}

    fn prompt_conflict(
        &mut self,
        kind: ConflictKind,
        name: &str,
        options: &[ConflictChoice],
    ) -> Option<ConflictChoice>;

    fn prompt_yes_no(&mut self, text: &str) -> bool;
}

pub struct UiDispatcher {
    rx: Receiver<UiEvent>,
    ledger: TransferLedger,
}

impl UiDispatcher {
    pub fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut TransferLedger {
        &mut self.ledger
    }

    pub fn dispatch(&mut self, event: UiEvent, delegate: &mut dyn UiDelegate) {
        match event {
            UiEvent::Status(text) => delegate.on_status(&text),
            UiEvent::Error {
                item,
                code,
                message,
            } => delegate.on_error(&item, code, &message),
            UiEvent::Ledger(update) => {
                if let Err(e) = self.ledger.apply(update) {
                    tracing::warn!("Ignoring ledger update: {}", e);
                }
                delegate.on_records_changed(&self.ledger);
            }
            UiEvent::ListingRefresh(target) => delegate.on_listing_refresh(target),
            UiEvent::Busy(busy) => delegate.on_busy(busy),
            UiEvent::Prompt(Prompt::Conflict {
                kind,
                name,
                options,
                reply,
            }) => {
                let choice = delegate.prompt_conflict(kind, &name, &options);
                // The worker may have been torn down meanwhile
                let _ = reply.send(choice);
            }
            UiEvent::Prompt(Prompt::YesNo { text, reply }) => {
                let answer = delegate.prompt_yes_no(&text);
                let _ = reply.send(answer);
            }
        }
    }

    /// Dispatch whatever is queued without blocking. Returns the number handled.
    pub fn pump(&mut self, delegate: &mut dyn UiDelegate) -> usize {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.dispatch(event, delegate);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    /// Dispatch until every [`UiHandle`] is dropped, then hand back the ledger
    pub fn run(mut self, delegate: &mut dyn UiDelegate) -> TransferLedger {
        while let Ok(event) = self.rx.recv() {
            self.dispatch(event, delegate);
        }
        self.ledger
    }
}
