use std::sync::Arc;

use shared::{domain::UserId, protocol::Message};
use tracing::warn;

use crate::{api::ChatApi, error::ChatError};

const LOAD_FAILED: &str = "Failed to load messages";

/// One-shot history fetch for a conversation. Keeps no state between calls.
#[derive(Clone)]
pub struct HistoryLoader {
    api: Arc<dyn ChatApi>,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    /// Server order is returned untouched; it is the initial ledger order.
    pub async fn load(&self, conversation_id: &UserId) -> Result<Vec<Message>, ChatError> {
        self.api
            .fetch_messages(conversation_id)
            .await
            .map_err(|err| {
                warn!(conversation_id = %conversation_id, "history: load failed: {err:#}");
                ChatError::network(err, LOAD_FAILED)
            })
    }
}
