use shared::{domain::UserId, protocol::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    LoadPeers,
    LoadHistory,
    SendMessage,
}

/// Session changes broadcast to the rendering and notification collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Selection changed and the ledger was emptied.
    SelectionChanged {
        conversation_id: Option<UserId>,
    },
    HistoryLoaded {
        conversation_id: UserId,
        count: usize,
    },
    MessageAppended(Message),
    PeersUpdated {
        count: usize,
    },
    Subscribed {
        conversation_id: UserId,
    },
    Unsubscribed,
    /// User-facing failure notice; emitted once per failed fetch or send.
    Error {
        context: ErrorContext,
        message: String,
    },
}
