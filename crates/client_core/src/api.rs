//! Request client seam and its HTTP implementation.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::UserId,
    error::ApiErrorBody,
    protocol::{Message, Peer, SendMessageRequest},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ClientSettings;

/// Non-success response from the chat backend.
#[derive(Debug, Error)]
#[error("chat backend returned {status}: {}", message.as_deref().unwrap_or("no error message"))]
pub struct ApiStatusError {
    pub status: StatusCode,
    pub message: Option<String>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<Peer>>;
    async fn fetch_messages(&self, conversation_id: &UserId) -> Result<Vec<Message>>;
    async fn send_message(
        &self,
        conversation_id: &UserId,
        request: &SendMessageRequest,
    ) -> Result<Message>;
}

pub struct HttpChatApi {
    http: Client,
    base_url: Url,
}

impl HttpChatApi {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.server_url)
            .with_context(|| format!("invalid server_url '{}'", settings.server_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!(
                "server_url must be an http(s) base url: {}",
                settings.server_url
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("server_url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .map(|body| body.message);
    Err(ApiStatusError { status, message }.into())
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_peers(&self) -> Result<Vec<Peer>> {
        let url = self.endpoint(&["messages", "users"])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("peer list request failed")?;
        let peers: Vec<Peer> = ensure_success(response).await?.json().await?;
        debug!(count = peers.len(), "api: peers fetched");
        Ok(peers)
    }

    async fn fetch_messages(&self, conversation_id: &UserId) -> Result<Vec<Message>> {
        let url = self.endpoint(&["messages", conversation_id.as_str()])?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("history request for {conversation_id} failed"))?;
        let messages: Vec<Message> = ensure_success(response).await?.json().await?;
        debug!(
            conversation_id = %conversation_id,
            count = messages.len(),
            "api: history fetched"
        );
        Ok(messages)
    }

    async fn send_message(
        &self,
        conversation_id: &UserId,
        request: &SendMessageRequest,
    ) -> Result<Message> {
        let url = self.endpoint(&["messages", "send", conversation_id.as_str()])?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("send request to {conversation_id} failed"))?;
        let message: Message = ensure_success(response).await?.json().await?;
        Ok(message)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
