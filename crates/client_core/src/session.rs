//! Conversation selection, history loading, sending and live updates for one chat session.

use std::sync::{Arc, Mutex};

use shared::{
    domain::UserId,
    protocol::{Message, Peer, SendMessageRequest},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    config::ClientSettings,
    error::{ChatError, ValidationError},
    events::{ErrorContext, SessionEvent},
    history::HistoryLoader,
    state::{lock, HistoryPhase, SessionSnapshot, SessionState},
    subscription::LiveSubscriptionManager,
    transport::PushTransport,
};

const SEND_FAILED: &str = "Failed to send message";
const PEERS_FAILED: &str = "Failed to fetch users";

/// Outgoing message as composed by the user. Left untouched by failed sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub image: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Trimmed request body; blank text counts as no text.
    pub fn to_request(&self) -> Result<SendMessageRequest, ValidationError> {
        let text = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let image = self.image.clone().filter(|image| !image.is_empty());
        if text.is_none() && image.is_none() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(SendMessageRequest { text, image })
    }
}

struct SessionInner {
    api: Arc<dyn ChatApi>,
    history: HistoryLoader,
    state: Arc<Mutex<SessionState>>,
    subscriptions: LiveSubscriptionManager,
    events: broadcast::Sender<SessionEvent>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn PushTransport>,
        settings: &ClientSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            inner: Arc::new(SessionInner {
                history: HistoryLoader::new(Arc::clone(&api)),
                api,
                state: Arc::new(Mutex::new(SessionState::default())),
                subscriptions: LiveSubscriptionManager::new(transport, settings.push_event.clone()),
                events,
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.inner.state);
        SessionSnapshot {
            selected: state.selected.clone(),
            messages: state.ledger.messages().to_vec(),
            history: state.history,
            is_messages_loading: state.history == HistoryPhase::Loading,
            is_users_loading: state.users_loading,
            peers: state.peers.clone(),
            subscribed: self.inner.subscriptions.is_active(),
        }
    }

    pub fn selected_conversation(&self) -> Option<UserId> {
        lock(&self.inner.state)
            .selected
            .as_ref()
            .map(|peer| peer.id.clone())
    }

    /// Switches to `peer` and starts loading its history.
    ///
    /// Returns `None` when `peer` is already selected. Otherwise the previous listener is
    /// gone and the ledger is empty by the time this returns; the handle completes once the
    /// history fetch has resolved and a listener for the then-current selection is installed.
    pub fn select_conversation(&self, peer: Peer) -> Option<JoinHandle<()>> {
        let conversation_id = peer.id.clone();
        let (generation, load_seq) = {
            let mut state = lock(&self.inner.state);
            if state.is_selected(&conversation_id) {
                debug!(conversation_id = %conversation_id, "session: already selected");
                return None;
            }
            self.drop_listener();
            state.clear_selection();
            state.selected = Some(peer);
            let load_seq = state.begin_load();
            self.emit(SessionEvent::SelectionChanged {
                conversation_id: Some(conversation_id.clone()),
            });
            (state.generation, load_seq)
        };
        info!(conversation_id = %conversation_id, generation, "session: conversation selected");
        Some(self.spawn_history_load(conversation_id, generation, load_seq))
    }

    /// Refetches history for the current selection. No-op without one.
    ///
    /// Only the newest fetch for a selection may seed the ledger; older ones still in flight
    /// are discarded when they resolve.
    pub fn reload_history(&self) -> Option<JoinHandle<()>> {
        let (scope, load_seq) = {
            let mut state = lock(&self.inner.state);
            let scope = state.scope()?;
            let load_seq = state.begin_load();
            (scope, load_seq)
        };
        Some(self.spawn_history_load(scope.conversation_id, scope.generation, load_seq))
    }

    /// Drops the selection, its ledger and its listener.
    pub fn clear_selection(&self) {
        let mut state = lock(&self.inner.state);
        self.drop_listener();
        let had_selection = state.selected.is_some();
        state.clear_selection();
        if had_selection {
            self.emit(SessionEvent::SelectionChanged {
                conversation_id: None,
            });
        }
    }

    /// Logout: back to the initial empty session. Peer lists still in flight are dropped.
    pub fn reset(&self) {
        self.clear_selection();
        let mut state = lock(&self.inner.state);
        state.peers.clear();
        state.users_loading = false;
        state.peers_generation += 1;
    }

    /// Installs a listener for whatever is selected right now. Returns whether one was
    /// installed.
    pub fn subscribe_to_messages(&self) -> bool {
        let state = lock(&self.inner.state);
        let Some(scope) = state.scope() else {
            return false;
        };
        let conversation_id = scope.conversation_id.clone();
        let events = self.inner.events.clone();
        self.inner.subscriptions.subscribe(
            scope,
            Arc::downgrade(&self.inner.state),
            move |message: &Message| {
                let _ = events.send(SessionEvent::MessageAppended(message.clone()));
            },
        );
        self.emit(SessionEvent::Subscribed { conversation_id });
        true
    }

    /// Always safe, including when nothing is selected or subscribed.
    pub fn unsubscribe_from_messages(&self) {
        let _state = lock(&self.inner.state);
        self.drop_listener();
    }

    /// Sends `draft` to the selected peer and merges the created message into the ledger.
    pub async fn send_message(&self, draft: &OutgoingMessage) -> Result<Message, ChatError> {
        let conversation_id = self
            .selected_conversation()
            .ok_or(ValidationError::NoConversationSelected)?;
        let request = draft.to_request()?;

        let message = match self.inner.api.send_message(&conversation_id, &request).await {
            Ok(message) => message,
            Err(err) => {
                warn!(conversation_id = %conversation_id, "session: send failed: {err:#}");
                let err = ChatError::network(err, SEND_FAILED);
                self.notify(ErrorContext::SendMessage, &err);
                return Err(err);
            }
        };

        let appended = {
            let mut state = lock(&self.inner.state);
            let belongs = state
                .selected
                .as_ref()
                .is_some_and(|peer| message.involves(&peer.id));
            let appended = belongs && state.ledger.append(message.clone());
            if appended {
                self.emit(SessionEvent::MessageAppended(message.clone()));
            }
            appended
        };
        if !appended {
            debug!(message_id = %message.id, "session: sent message already present or off-screen");
        }
        Ok(message)
    }

    /// Fetches the peer list shown next to the conversation.
    ///
    /// A list that arrives after [`SessionManager::reset`] is returned to the caller but not
    /// applied, and a failure that arrives after it is not reported.
    pub async fn load_peers(&self) -> Result<Vec<Peer>, ChatError> {
        let peers_generation = {
            let mut state = lock(&self.inner.state);
            state.users_loading = true;
            state.peers_generation
        };
        let result = self.inner.api.list_peers().await;

        let outcome = {
            let mut state = lock(&self.inner.state);
            if state.peers_generation != peers_generation {
                debug!("session: discarding peer list fetched before reset");
                return result.map_err(|err| ChatError::network(err, PEERS_FAILED));
            }
            state.users_loading = false;
            match result {
                Ok(peers) => {
                    state.peers = peers.clone();
                    self.emit(SessionEvent::PeersUpdated { count: peers.len() });
                    Ok(peers)
                }
                Err(err) => Err(ChatError::network(err, PEERS_FAILED)),
            }
        };
        if let Err(err) = &outcome {
            warn!("session: peer list failed: {err}");
            self.notify(ErrorContext::LoadPeers, err);
        }
        outcome
    }

    /// Removes the listener, if any. Callers hold the state lock.
    fn drop_listener(&self) {
        if self.inner.subscriptions.unsubscribe() {
            self.emit(SessionEvent::Unsubscribed);
        }
    }

    fn spawn_history_load(
        &self,
        conversation_id: UserId,
        generation: u64,
        load_seq: u64,
    ) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            session
                .run_history_load(conversation_id, generation, load_seq)
                .await;
        })
    }

    async fn run_history_load(&self, conversation_id: UserId, generation: u64, load_seq: u64) {
        let result = self.inner.history.load(&conversation_id).await;

        {
            let mut state = lock(&self.inner.state);
            if !state.is_current_load(generation, load_seq) {
                debug!(
                    conversation_id = %conversation_id,
                    generation,
                    load_seq,
                    "session: discarding stale history result"
                );
            } else {
                match result {
                    Ok(messages) => {
                        let count = messages.len();
                        state.ledger.seed(messages);
                        state.history = HistoryPhase::Ready;
                        self.emit(SessionEvent::HistoryLoaded {
                            conversation_id,
                            count,
                        });
                    }
                    Err(err) => {
                        state.history = HistoryPhase::Failed;
                        self.notify(ErrorContext::LoadHistory, &err);
                    }
                }
            }
        }

        self.subscribe_to_messages();
    }

    fn notify(&self, context: ErrorContext, err: &ChatError) {
        self.emit(SessionEvent::Error {
            context,
            message: err.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
