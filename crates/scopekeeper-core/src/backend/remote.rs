// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP object-store backend.
//!
//! Object API:
//!
//! | Operation | Request | Outcome |
//! |-----------|---------|---------|
//! | read | `GET {endpoint}/{key}` | 200 body, 404 = not found |
//! | write | `PUT {endpoint}/{key}` | 2xx |
//! | write_if_absent | `PUT` + `If-None-Match: *` | 2xx created, 412 = exists |
//! | delete | `DELETE {endpoint}/{key}` | 2xx or 404 |
//! | list | `GET {endpoint}/?prefix=...` | `{"keys": [...]}` |
//!
//! Connection errors, timeouts, 5xx and 429 are retried under the configured
//! [`RetryPolicy`]; any other 4xx is a permanent rejection.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use reqwest::header::IF_NONE_MATCH;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Backend, validate_key};
use crate::config::RemoteBackendConfig;
use crate::error::{Result, ScopeError};
use crate::retry::RetryPolicy;

/// Backend talking to an HTTP object store.
pub struct RemoteBackend {
    client: reqwest::Client,
    config: RemoteBackendConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    keys: Vec<String>,
}

/// Outcome of a single failed HTTP attempt.
#[derive(Debug)]
enum Failure {
    Transient(String),
    Rejected(String),
}

impl Failure {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Rejected(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }

    async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let details = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(details)
        } else {
            Self::Rejected(details)
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(details) | Self::Rejected(details) => write!(f, "{}", details),
        }
    }
}

impl RemoteBackend {
    pub fn new(config: RemoteBackendConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScopeError::BackendRejected {
                operation: "connect".to_string(),
                path: config.endpoint.clone(),
                details: e.to_string(),
            })?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), key)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Run one HTTP exchange under the retry policy and map the final failure.
    async fn execute<T, F, Fut>(&self, operation: &str, key: &str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Failure>>,
    {
        self.retry
            .run(operation, attempt, Failure::is_transient)
            .await
            .map_err(|failure| match failure.error {
                Failure::Transient(details) => {
                    warn!(
                        operation = operation,
                        key = %key,
                        attempts = failure.attempts,
                        error = %details,
                        "Remote backend unavailable after retries"
                    );
                    ScopeError::BackendUnavailable {
                        operation: operation.to_string(),
                        path: key.to_string(),
                        attempts: failure.attempts,
                        details,
                    }
                }
                Failure::Rejected(details) => ScopeError::BackendRejected {
                    operation: operation.to_string(),
                    path: key.to_string(),
                    details,
                },
            })
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let url = self.url(key);
        let (this, url) = (self, &url);
        self.execute("read", key, move || async move {
            let response = this
                .request(Method::GET, url)
                .send()
                .await
                .map_err(Failure::from_reqwest)?;
            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => response
                    .bytes()
                    .await
                    .map(|body| Some(body.to_vec()))
                    .map_err(Failure::from_reqwest),
                _ => Err(Failure::from_response(response).await),
            }
        })
        .await
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        let url = self.url(key);
        let (this, url) = (self, &url);
        self.execute("write", key, move || async move {
            let response = this
                .request(Method::PUT, url)
                .body(data.to_vec())
                .send()
                .await
                .map_err(Failure::from_reqwest)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(Failure::from_response(response).await)
            }
        })
        .await?;
        debug!(key = %key, bytes = data.len(), "Wrote remote object");
        Ok(())
    }

    async fn write_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let url = self.url(key);
        let (this, url) = (self, &url);
        self.execute("write_if_absent", key, move || async move {
            let response = this
                .request(Method::PUT, url)
                .header(IF_NONE_MATCH, "*")
                .body(data.to_vec())
                .send()
                .await
                .map_err(Failure::from_reqwest)?;
            match response.status() {
                StatusCode::PRECONDITION_FAILED => Ok(false),
                status if status.is_success() => Ok(true),
                _ => Err(Failure::from_response(response).await),
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let url = self.url(key);
        let (this, url) = (self, &url);
        self.execute("delete", key, move || async move {
            let response = this
                .request(Method::DELETE, url)
                .send()
                .await
                .map_err(Failure::from_reqwest)?;
            let status = response.status();
            if status.is_success() || status == StatusCode::NOT_FOUND {
                Ok(())
            } else {
                Err(Failure::from_response(response).await)
            }
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/", self.config.endpoint.trim_end_matches('/'));
        let (this, url) = (self, &url);
        let mut keys = self
            .execute("list", prefix, move || async move {
                let response = this
                    .request(Method::GET, url)
                    .query(&[("prefix", prefix)])
                    .send()
                    .await
                    .map_err(Failure::from_reqwest)?;
                if !response.status().is_success() {
                    return Err(Failure::from_response(response).await);
                }
                response
                    .json::<ListResponse>()
                    .await
                    .map(|list| list.keys)
                    .map_err(|e| Failure::Rejected(format!("invalid list response: {}", e)))
            })
            .await?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "remote"
    }
}
