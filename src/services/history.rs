//! REST collaborators consumed by the core: the cursor-paginated message feed
//! and the conversation list/detail endpoints. These are thin typed wrappers;
//! durable storage and the endpoints themselves are server concerns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::error::{RealtimeError, RealtimeResult};
use crate::models::{ChatMessage, Conversation};

/// One page of a conversation's backward-paginated history. `next_cursor` is
/// opaque and server-issued; `None` means no more history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Seam over the history REST feed so synchronizers can be exercised against
/// an in-memory feed in tests.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Fetch up to `limit` messages, ascending by `sentAt` within the page.
    /// `mark_as_read` triggers the server-side read receipt as a side effect.
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: u32,
        mark_as_read: bool,
    ) -> RealtimeResult<MessagePage>;

    async fn list_conversations(&self, page: u32, limit: u32) -> RealtimeResult<Vec<Conversation>>;

    async fn get_conversation(&self, conversation_id: Uuid) -> RealtimeResult<Conversation>;
}

/// Shared slot for the bearer token; set at login, cleared at logout, read by
/// every request without rebuilding the client.
#[derive(Clone, Default)]
pub struct SessionToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionToken {
    pub fn set(&self, token: &str) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct HttpMessageHistory {
    http: reqwest::Client,
    base_url: String,
    token: SessionToken,
}

impl HttpMessageHistory {
    pub fn new(base_url: &str, token: SessionToken) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.get(format!("{}{path}", self.base_url));
        if let Some(token) = self.token.get() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> RealtimeResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::Api {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl MessageHistory for HttpMessageHistory {
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        limit: u32,
        mark_as_read: bool,
    ) -> RealtimeResult<MessagePage> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("sort", "sentAt,asc".to_string()),
            ("markAsRead", mark_as_read.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .request(&format!("/conversations/{conversation_id}/messages"))
            .query(&query)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn list_conversations(&self, page: u32, limit: u32) -> RealtimeResult<Vec<Conversation>> {
        let response = self
            .request("/conversations")
            .query(&[("page", page.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> RealtimeResult<Conversation> {
        let response = self
            .request(&format!("/conversations/{conversation_id}"))
            .send()
            .await?;
        Self::decode(response).await
    }
}
