use thiserror::Error;

use crate::{api::ApiStatusError, transport::HandlerId};

/// Rejections raised before any request leaves the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a user to chat with")]
    NoConversationSelected,
    #[error("message needs text or an image")]
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no handler {handler:?} registered for push event '{event}'")]
    UnknownHandler { event: String, handler: HandlerId },
    #[error("push transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// A fetch or send failed; `message` is what the user should see.
    #[error("{message}")]
    Network {
        message: String,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to remove push listener: {0}")]
    TransportTeardown(#[from] TransportError),
}

impl ChatError {
    /// Wraps a request failure, preferring the backend's own error text over `fallback`.
    pub fn network(source: anyhow::Error, fallback: &str) -> Self {
        let message = source
            .chain()
            .find_map(|cause| cause.downcast_ref::<ApiStatusError>())
            .and_then(|status| status.message.clone())
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        Self::Network { message, source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
