//! HTTP plumbing between list pages and the back-office API server.

use crate::credentials::{AuthHeader, CredentialProvider};
use crate::errors::{AppError, AppResult};
use crate::models::{
    CollectionPage, ConsoleSettings, FetchQuery, HttpMethod, MutationAck, MutationRequest, PaginationMeta, Record,
};
use crate::redaction::Redactor;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Remote collection source and mutation sink. `ApiClient` talks HTTP;
/// tests substitute an in-memory double.
#[async_trait]
pub trait ConsoleApi: Send + Sync {
    async fn fetch_collection(&self, route: &str, collection_key: &str, query: FetchQuery) -> AppResult<CollectionPage>;

    async fn mutate(&self, request: &MutationRequest) -> AppResult<MutationAck>;
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    header_name: String,
    token_prefix: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(settings: &ConsoleSettings, credentials: Arc<dyn CredentialProvider>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            header_name: settings.auth_header_name.clone(),
            token_prefix: settings.token_prefix.clone(),
            credentials,
        })
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> AppResult<(RequestBuilder, Redactor)> {
        let header = AuthHeader::resolve(self.credentials.as_ref(), &self.header_name, &self.token_prefix)?;
        let redactor = Redactor::new().with_secret(header.value.trim_start_matches(self.token_prefix.as_str()));
        Ok((request.header(header.name.as_str(), header.value.as_str()), redactor))
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> AppResult<Value> {
        let (request, redactor) = self.authorize(request)?;
        let response = request.send().await.map_err(|error| {
            let error = AppError::from(error);
            tracing::warn!(path = %path, error = %redactor.scrub(&error.to_string()), "request failed to send");
            error
        })?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(success_body(&body));
        }

        let message = error_message(&body);
        tracing::warn!(
            path = %path,
            status = status.as_u16(),
            message = %redactor.scrub(message.as_deref().unwrap_or("")),
            "api request rejected"
        );
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthenticated(
                message.unwrap_or_else(|| "session rejected by server".to_string()),
            ));
        }
        Err(AppError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ConsoleApi for ApiClient {
    async fn fetch_collection(&self, route: &str, collection_key: &str, query: FetchQuery) -> AppResult<CollectionPage> {
        let mut request = self.client.get(self.url(route));
        if let Some(page) = query.page {
            request = request.query(&[("page", page)]);
        }
        if let Some(limit) = query.limit {
            request = request.query(&[("limit", limit)]);
        }
        let body = self.send(request, route).await?;
        parse_collection(body, collection_key)
    }

    async fn mutate(&self, request: &MutationRequest) -> AppResult<MutationAck> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Patch => self.client.patch(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let body = self.send(builder, &request.path).await?;
        Ok(mutation_ack(body))
    }
}

/// A 2xx body that is not JSON (`OK`, `Deleted`) is kept as text; the
/// server has already applied the change.
pub fn success_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

pub fn mutation_ack(body: Value) -> MutationAck {
    match body {
        Value::String(text) => MutationAck {
            message: Some(text),
            body: Value::Null,
        },
        body => MutationAck {
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            body,
        },
    }
}

/// `{ message }` from an error payload, if the server sent one.
pub fn error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<Value>(body).ok()?;
    parsed
        .get("message")
        .or_else(|| parsed.get("error"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(ToString::to_string)
}

/// Accepts `{ <collection_key>: [...], pagination?, unreadCount? }`, a
/// `{ data: [...] }` envelope, or a bare array.
pub fn parse_collection(body: Value, collection_key: &str) -> AppResult<CollectionPage> {
    let (items, pagination, unread_count) = match body {
        Value::Array(items) => (items, None, None),
        Value::Object(mut map) => {
            let items = match map.remove(collection_key).or_else(|| map.remove("data")) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(AppError::Internal(format!(
                        "Expected '{}' to be an array",
                        collection_key
                    )))
                }
            };
            let pagination = match map.remove("pagination") {
                Some(Value::Null) | None => None,
                Some(value) => Some(serde_json::from_value::<PaginationMeta>(value)?),
            };
            let unread_count = map.get("unreadCount").and_then(Value::as_u64);
            (items, pagination, unread_count)
        }
        Value::Null => (Vec::new(), None, None),
        _ => return Err(AppError::Internal("Unexpected collection payload".to_string())),
    };

    let total = items.len();
    let records = items.into_iter().filter_map(Record::from_value).collect::<Vec<_>>();
    if records.len() != total {
        tracing::warn!(
            collection = collection_key,
            dropped = total - records.len(),
            "ignored non-object entries in collection payload"
        );
    }

    Ok(CollectionPage {
        records,
        pagination,
        unread_count,
    })
}
