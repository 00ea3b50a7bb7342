use std::sync::{Mutex, MutexGuard, PoisonError};

use shared::{
    domain::UserId,
    protocol::{Message, Peer},
};

use crate::ledger::MessageLedger;

/// Identifies one selection instance: the peer plus the generation at which it was selected.
///
/// Reselecting the same peer later yields a new generation, so results and listeners tied to
/// an earlier instance never match the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionScope {
    pub conversation_id: UserId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Authoritative state of one chat session. Only [`crate::SessionManager`] mutates it.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) selected: Option<Peer>,
    pub(crate) generation: u64,
    /// Id of the newest history fetch; only its result may seed the ledger.
    pub(crate) load_seq: u64,
    /// Bumped on logout so in-flight peer list fetches are dropped.
    pub(crate) peers_generation: u64,
    pub(crate) ledger: MessageLedger,
    pub(crate) history: HistoryPhase,
    pub(crate) users_loading: bool,
    pub(crate) peers: Vec<Peer>,
}

impl SessionState {
    pub(crate) fn scope(&self) -> Option<SelectionScope> {
        self.selected.as_ref().map(|peer| SelectionScope {
            conversation_id: peer.id.clone(),
            generation: self.generation,
        })
    }

    pub(crate) fn is_selected(&self, conversation_id: &UserId) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|peer| &peer.id == conversation_id)
    }

    /// Drops the selection and everything scoped to it.
    pub(crate) fn clear_selection(&mut self) {
        self.selected = None;
        self.generation += 1;
        self.ledger.reset();
        self.history = HistoryPhase::Idle;
    }

    /// Marks a new history fetch as the newest one and returns its id.
    pub(crate) fn begin_load(&mut self) -> u64 {
        self.load_seq += 1;
        self.history = HistoryPhase::Loading;
        self.load_seq
    }

    /// Whether a fetch issued as `load_seq` under `generation` may still apply its result.
    pub(crate) fn is_current_load(&self, generation: u64, load_seq: u64) -> bool {
        self.generation == generation && self.load_seq == load_seq
    }
}

/// Read-only copy of the session for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub selected: Option<Peer>,
    pub messages: Vec<Message>,
    pub history: HistoryPhase,
    pub is_messages_loading: bool,
    pub is_users_loading: bool,
    pub peers: Vec<Peer>,
    pub subscribed: bool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
