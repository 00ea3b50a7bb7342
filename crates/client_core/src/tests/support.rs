use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use shared::{
    domain::{MessageId, UserId},
    protocol::{Message, Peer, SendMessageRequest},
};
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::{api::ApiStatusError, events::SessionEvent};

pub(crate) const ME: &str = "me";

pub(crate) type Reply<T> = std::result::Result<T, String>;

pub(crate) fn peer(id: &str) -> Peer {
    Peer {
        id: UserId::from(id),
        full_name: format!("User {id}"),
        profile_pic: None,
    }
}

pub(crate) fn message(id: &str, sender: &str, receiver: &str) -> Message {
    Message {
        id: MessageId::from(id),
        sender_id: UserId::from(sender),
        receiver_id: UserId::from(receiver),
        text: Some(format!("text of {id}")),
        image: None,
        created_at: Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .expect("timestamp"),
    }
}

pub(crate) fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|message| message.id.as_str()).collect()
}

pub(crate) fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn backend_error(message: String) -> anyhow::Error {
    anyhow!(ApiStatusError {
        status: StatusCode::BAD_GATEWAY,
        message: Some(message),
    })
}

/// In-memory [`crate::ChatApi`] whose history replies can be held back per conversation.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    histories: Mutex<HashMap<UserId, Reply<Vec<Message>>>>,
    gates: Mutex<HashMap<UserId, VecDeque<oneshot::Receiver<Reply<Vec<Message>>>>>>,
    send_replies: Mutex<VecDeque<Reply<Message>>>,
    peers: Mutex<Option<Reply<Vec<Peer>>>>,
    peers_gate: Mutex<Option<oneshot::Receiver<Reply<Vec<Peer>>>>>,
    pub(crate) sent: Mutex<Vec<(UserId, SendMessageRequest)>>,
    pub(crate) history_calls: AtomicUsize,
    pub(crate) send_calls: AtomicUsize,
}

impl ScriptedApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) async fn set_history(&self, conversation: &str, reply: Reply<Vec<Message>>) {
        self.histories
            .lock()
            .await
            .insert(UserId::from(conversation), reply);
    }

    /// The next history fetch for `conversation` waits until the returned sender fires.
    pub(crate) async fn gate_history(
        &self,
        conversation: &str,
    ) -> oneshot::Sender<Reply<Vec<Message>>> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .await
            .entry(UserId::from(conversation))
            .or_default()
            .push_back(rx);
        tx
    }

    pub(crate) async fn push_send_reply(&self, reply: Reply<Message>) {
        self.send_replies.lock().await.push_back(reply);
    }

    pub(crate) async fn set_peers(&self, reply: Reply<Vec<Peer>>) {
        *self.peers.lock().await = Some(reply);
    }

    /// The next peer list fetch waits until the returned sender fires.
    pub(crate) async fn gate_peers(&self) -> oneshot::Sender<Reply<Vec<Peer>>> {
        let (tx, rx) = oneshot::channel();
        *self.peers_gate.lock().await = Some(rx);
        tx
    }

    pub(crate) fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::api::ChatApi for ScriptedApi {
    async fn list_peers(&self) -> Result<Vec<Peer>> {
        let gate = self.peers_gate.lock().await.take();
        let reply = match gate {
            Some(gate) => Some(gate.await.map_err(|_| anyhow!("peer list gate dropped"))?),
            None => self.peers.lock().await.clone(),
        };
        match reply {
            Some(Ok(peers)) => Ok(peers),
            Some(Err(message)) => Err(backend_error(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_messages(&self, conversation_id: &UserId) -> Result<Vec<Message>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gates
            .lock()
            .await
            .get_mut(conversation_id)
            .and_then(VecDeque::pop_front);
        let reply = match gate {
            Some(gate) => gate
                .await
                .map_err(|_| anyhow!("history gate for {conversation_id} dropped"))?,
            None => self
                .histories
                .lock()
                .await
                .get(conversation_id)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new())),
        };
        reply.map_err(backend_error)
    }

    async fn send_message(
        &self,
        conversation_id: &UserId,
        request: &SendMessageRequest,
    ) -> Result<Message> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .await
            .push((conversation_id.clone(), request.clone()));
        match self.send_replies.lock().await.pop_front() {
            Some(Ok(message)) => Ok(message),
            Some(Err(message)) => Err(backend_error(message)),
            None => Err(anyhow!("no scripted send reply")),
        }
    }
}
