//! Push-transport contract plus the in-process hub the connection owner feeds.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use futures::{Stream, StreamExt};
use shared::protocol::{Message, PushFrame};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::{error::TransportError, state::lock};

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Token returned by [`PushTransport::on`]; pass it back to `off` to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A named-event channel that is owned and kept alive by someone else.
///
/// Implementations must not hold internal locks while invoking handlers: a handler may
/// itself register or remove handlers.
pub trait PushTransport: Send + Sync {
    fn on(&self, event: &str, handler: MessageHandler) -> HandlerId;
    fn off(&self, event: &str, handler: HandlerId) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, MessageHandler)>>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = lock(&self.handlers);
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("EventHub").field("handlers", &counts).finish()
    }
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Invokes every handler registered for `event`; returns how many ran.
    pub fn dispatch(&self, event: &str, message: &Message) -> usize {
        let handlers: Vec<MessageHandler> = lock(&self.handlers)
            .get(event)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.handlers).get(event).map_or(0, Vec::len)
    }
}

impl PushTransport for EventHub {
    fn on(&self, event: &str, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn off(&self, event: &str, handler: HandlerId) -> Result<(), TransportError> {
        let mut handlers = lock(&self.handlers);
        let unknown = || TransportError::UnknownHandler {
            event: event.to_string(),
            handler,
        };
        let list = handlers.get_mut(event).ok_or_else(unknown)?;
        let position = list
            .iter()
            .position(|(id, _)| *id == handler)
            .ok_or_else(unknown)?;
        list.remove(position);
        if list.is_empty() {
            handlers.remove(event);
        }
        Ok(())
    }
}

/// Reads push frames off an already established websocket and dispatches them to `hub`.
///
/// Returns once the stream closes or errors, with the number of handler invocations made.
/// The connection itself stays with the caller.
pub async fn pump_push_frames<S, E>(mut frames: S, hub: &EventHub) -> usize
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: fmt::Display,
{
    let mut delivered = 0;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match decode_push_frame(&text) {
                Ok((event, message)) => delivered += hub.dispatch(&event, &message),
                Err(err) => warn!("push: dropping undecodable frame: {err}"),
            },
            Ok(WsMessage::Close(_)) => {
                debug!("push: connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("push: receive failed: {err}");
                break;
            }
        }
    }
    delivered
}

fn decode_push_frame(text: &str) -> serde_json::Result<(String, Message)> {
    let frame: PushFrame = serde_json::from_str(text)?;
    let message = serde_json::from_value(frame.payload)?;
    Ok((frame.event, message))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
