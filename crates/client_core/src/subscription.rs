//! Single live listener over the shared push transport.

use std::sync::{Arc, Mutex, Weak};

use shared::protocol::Message;
use tracing::{debug, warn};

use crate::{
    error::{ChatError, TransportError},
    state::{lock, SelectionScope, SessionState},
    transport::{HandlerId, MessageHandler, PushTransport},
};

/// Outcome of routing one push event against the live selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    NoSelection,
    /// Neither end of the message is the selected peer.
    Unrelated,
    /// Relevant to the live selection, but the listener belongs to an earlier one.
    StaleListener,
    Deliver,
}

/// Decides what to do with `message` given the listener's captured scope and the live one.
pub fn route(captured: &SelectionScope, live: Option<&SelectionScope>, message: &Message) -> Route {
    let Some(live) = live else {
        return Route::NoSelection;
    };
    if !message.involves(&live.conversation_id) {
        return Route::Unrelated;
    }
    if live != captured {
        return Route::StaleListener;
    }
    Route::Deliver
}

struct ActiveSubscription {
    handler: HandlerId,
    scope: SelectionScope,
}

#[derive(Default)]
struct Registrations {
    active: Option<ActiveSubscription>,
    /// Handlers whose removal failed. Retried before every change and on drop.
    pending_teardown: Vec<HandlerId>,
}

pub struct LiveSubscriptionManager {
    transport: Arc<dyn PushTransport>,
    event: String,
    registrations: Mutex<Registrations>,
}

impl LiveSubscriptionManager {
    pub fn new(transport: Arc<dyn PushTransport>, event: impl Into<String>) -> Self {
        Self {
            transport,
            event: event.into(),
            registrations: Mutex::new(Registrations::default()),
        }
    }

    /// Replaces any listener this manager owns with one scoped to `scope`.
    ///
    /// The new handler appends routed messages to the ledger inside `state` and calls
    /// `on_append` for each message that actually changed it, while the state lock is still
    /// held. `on_append` must not lock `state` itself. Every handler this manager still knows
    /// about is removed before the new one is registered.
    pub fn subscribe<F>(&self, scope: SelectionScope, state: Weak<Mutex<SessionState>>, on_append: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut registrations = lock(&self.registrations);
        self.retry_pending(&mut registrations);
        if let Some(previous) = registrations.active.take() {
            self.teardown(previous, &mut registrations.pending_teardown);
        }

        let captured = scope.clone();
        let handler: MessageHandler = Arc::new(move |message: &Message| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut guard = lock(&state);
            let live = guard.scope();
            match route(&captured, live.as_ref(), message) {
                Route::Deliver => {
                    if guard.ledger.append(message.clone()) {
                        on_append(message);
                    }
                }
                dropped => debug!(
                    message_id = %message.id,
                    listener = %captured.conversation_id,
                    route = ?dropped,
                    "push: event dropped"
                ),
            }
        });

        let id = self.transport.on(&self.event, handler);
        debug!(
            conversation_id = %scope.conversation_id,
            generation = scope.generation,
            "push: listener installed"
        );
        registrations.active = Some(ActiveSubscription { handler: id, scope });
    }

    /// Removes the owned listener, if any. Returns whether one was registered.
    pub fn unsubscribe(&self) -> bool {
        let mut registrations = lock(&self.registrations);
        self.retry_pending(&mut registrations);
        match registrations.active.take() {
            Some(previous) => {
                self.teardown(previous, &mut registrations.pending_teardown);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.registrations).active.is_some()
    }

    pub fn active_scope(&self) -> Option<SelectionScope> {
        lock(&self.registrations)
            .active
            .as_ref()
            .map(|active| active.scope.clone())
    }

    /// Number of handlers whose removal failed and is still outstanding.
    pub fn pending_teardown(&self) -> usize {
        lock(&self.registrations).pending_teardown.len()
    }

    fn teardown(&self, previous: ActiveSubscription, pending: &mut Vec<HandlerId>) {
        if self.remove(previous.handler) {
            debug!(
                conversation_id = %previous.scope.conversation_id,
                "push: listener removed"
            );
        } else {
            pending.push(previous.handler);
        }
    }

    fn retry_pending(&self, registrations: &mut Registrations) {
        if registrations.pending_teardown.is_empty() {
            return;
        }
        registrations
            .pending_teardown
            .retain(|handler| !self.remove(*handler));
        if registrations.pending_teardown.is_empty() {
            debug!("push: orphaned listeners removed");
        }
    }

    /// Returns `false` only when the handler may still be registered.
    fn remove(&self, handler: HandlerId) -> bool {
        match self.transport.off(&self.event, handler) {
            Ok(()) => true,
            Err(err) => {
                let gone = matches!(err, TransportError::UnknownHandler { .. });
                warn!("push: {}", ChatError::from(err));
                gone
            }
        }
    }
}

impl Drop for LiveSubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
