//! Client-side state engine for direct-message conversations.
//!
//! [`SessionManager`] reconciles a conversation's one-shot history fetch with the live push
//! stream into a single deduplicated [`MessageLedger`], and keeps exactly one push listener
//! installed for the selected conversation.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod ledger;
pub mod session;
pub mod state;
pub mod subscription;
pub mod transport;

pub use api::{ApiStatusError, ChatApi, HttpChatApi};
pub use config::{load_settings, ClientSettings};
pub use error::{ChatError, TransportError, ValidationError};
pub use events::{ErrorContext, SessionEvent};
pub use history::HistoryLoader;
pub use ledger::MessageLedger;
pub use session::{OutgoingMessage, SessionManager};
pub use state::{HistoryPhase, SelectionScope, SessionSnapshot, SessionState};
pub use subscription::LiveSubscriptionManager;
pub use transport::{pump_push_frames, EventHub, HandlerId, MessageHandler, PushTransport};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
