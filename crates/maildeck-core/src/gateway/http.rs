//! HTTP gateway client.
//!
//! Maps each [`MailGateway`] operation onto the mail service's REST routes.
//! JSON in, JSON out; a bearer token is attached when configured.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{
    AdvancedSearchPage, BulkAction, CancelResponse, Folder, Message, MessageId, MessagePage,
    MessageQuery, OutboxId, OutgoingMessage, QueueKind, QueueReceipt, QueuedMessage,
};
use super::{GatewayError, GatewayResult, MailGateway};

const fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the mail service, e.g. `https://mail.example.com/api`.
    pub base_url: String,
    /// Bearer token, if the service requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    /// Creates a configuration without authentication.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Serialize)]
struct ReadBody {
    read: bool,
}

#[derive(Serialize)]
struct StarBody {
    starred: bool,
}

#[derive(Serialize)]
struct MoveBody<'a> {
    folder: &'a str,
}

#[derive(Serialize)]
struct BulkBody<'a> {
    ids: &'a [MessageId],
    #[serde(flatten)]
    action: &'a BulkAction,
}

#[derive(Serialize)]
struct QueueBody<'a> {
    message: &'a OutgoingMessage,
    delay_secs: u64,
    kind: QueueKind,
}

#[derive(Serialize)]
struct RescheduleBody {
    send_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`MailGateway`] backed by the mail service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base: Url,
    token: Option<String>,
    client: Client,
}

impl HttpGateway {
    /// Creates a client for the given service.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Network(format!("invalid base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::Network(format!(
                "invalid base URL: {}",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            base,
            token: config.token.clone(),
            client,
        })
    }

    /// Builds the URL for a route, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::Network(format!("invalid base URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> GatewayResult<RequestBuilder> {
        let url = self.url(segments)?;
        tracing::debug!(%method, %url, "Gateway request");
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn dispatch(request: RequestBuilder) -> GatewayResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        tracing::warn!(status = status.as_u16(), %message, "Gateway request failed");
        Err(status_error(status, message))
    }

    async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder) -> GatewayResult<T> {
        let response = Self::dispatch(request).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn fetch_empty(request: RequestBuilder) -> GatewayResult<()> {
        Self::dispatch(request).await.map(|_| ())
    }
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_decode() {
        GatewayError::Decode(error.to_string())
    } else {
        GatewayError::Network(error.to_string())
    }
}

/// Extracts `{"error": "..."}` from an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn status_error(status: StatusCode, message: String) -> GatewayError {
    if status == StatusCode::NOT_FOUND {
        GatewayError::NotFound(message)
    } else {
        GatewayError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

impl MailGateway for HttpGateway {
    async fn list_folders(&self) -> GatewayResult<Vec<Folder>> {
        Self::fetch_json(self.request(Method::GET, &["folders"])?).await
    }

    async fn list_messages(&self, query: &MessageQuery) -> GatewayResult<MessagePage> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(q) = &query.query {
            params.push(("q", q.clone()));
        }
        let request = self
            .request(Method::GET, &["folders", &query.folder, "messages"])?
            .query(&params);
        Self::fetch_json(request).await
    }

    async fn fetch_message(&self, id: MessageId) -> GatewayResult<Message> {
        let id = id.to_string();
        Self::fetch_json(self.request(Method::GET, &["messages", &id])?).await
    }

    async fn fetch_thread(&self, subject: &str) -> GatewayResult<Vec<Message>> {
        let request = self
            .request(Method::GET, &["threads"])?
            .query(&[("subject", subject)]);
        Self::fetch_json(request).await
    }

    async fn mark_read(&self, id: MessageId, read: bool) -> GatewayResult<()> {
        let id = id.to_string();
        let request = self
            .request(Method::PUT, &["messages", &id, "read"])?
            .json(&ReadBody { read });
        Self::fetch_empty(request).await
    }

    async fn set_starred(&self, id: MessageId, starred: bool) -> GatewayResult<()> {
        let id = id.to_string();
        let request = self
            .request(Method::PUT, &["messages", &id, "star"])?
            .json(&StarBody { starred });
        Self::fetch_empty(request).await
    }

    async fn set_label(&self, id: MessageId, label: &str, add: bool) -> GatewayResult<()> {
        let id = id.to_string();
        let method = if add { Method::PUT } else { Method::DELETE };
        Self::fetch_empty(self.request(method, &["messages", &id, "labels", label])?).await
    }

    async fn delete_message(&self, id: MessageId) -> GatewayResult<()> {
        let id = id.to_string();
        Self::fetch_empty(self.request(Method::DELETE, &["messages", &id])?).await
    }

    async fn move_message(&self, id: MessageId, folder: &str) -> GatewayResult<()> {
        let id = id.to_string();
        let request = self
            .request(Method::POST, &["messages", &id, "move"])?
            .json(&MoveBody { folder });
        Self::fetch_empty(request).await
    }

    async fn bulk_action(&self, ids: &[MessageId], action: &BulkAction) -> GatewayResult<()> {
        let request = self
            .request(Method::POST, &["messages", "bulk"])?
            .json(&BulkBody { ids, action });
        Self::fetch_empty(request).await
    }

    async fn search(&self, query: &str, folder: &str) -> GatewayResult<Vec<Message>> {
        let request = self
            .request(Method::GET, &["search"])?
            .query(&[("q", query), ("folder", folder)]);
        Self::fetch_json(request).await
    }

    async fn advanced_search(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> GatewayResult<AdvancedSearchPage> {
        let request = self
            .request(Method::GET, &["search", "advanced"])?
            .query(&[
                ("q", query.to_string()),
                ("page", page.to_string()),
                ("limit", limit.to_string()),
            ]);
        Self::fetch_json(request).await
    }

    async fn send(&self, message: &OutgoingMessage) -> GatewayResult<()> {
        Self::fetch_empty(self.request(Method::POST, &["send"])?.json(message)).await
    }

    async fn queue(
        &self,
        message: &OutgoingMessage,
        delay_secs: u64,
        kind: QueueKind,
    ) -> GatewayResult<QueueReceipt> {
        let request = self.request(Method::POST, &["outbox"])?.json(&QueueBody {
            message,
            delay_secs,
            kind,
        });
        Self::fetch_json(request).await
    }

    async fn cancel_queued(&self, id: &OutboxId) -> GatewayResult<CancelResponse> {
        Self::fetch_json(self.request(Method::DELETE, &["outbox", id.as_str()])?).await
    }

    async fn list_outbox(&self) -> GatewayResult<Vec<QueuedMessage>> {
        Self::fetch_json(self.request(Method::GET, &["outbox"])?).await
    }

    async fn list_scheduled(&self) -> GatewayResult<Vec<QueuedMessage>> {
        Self::fetch_json(self.request(Method::GET, &["scheduled"])?).await
    }

    async fn update_scheduled(
        &self,
        id: &OutboxId,
        send_at: DateTime<Utc>,
    ) -> GatewayResult<QueueReceipt> {
        let request = self
            .request(Method::PATCH, &["scheduled", id.as_str()])?
            .json(&RescheduleBody { send_at });
        Self::fetch_json(request).await
    }

    async fn cancel_scheduled(&self, id: &OutboxId) -> GatewayResult<CancelResponse> {
        Self::fetch_json(self.request(Method::DELETE, &["scheduled", id.as_str()])?).await
    }
}
