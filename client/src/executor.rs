//! Networking collaborators that replay queued requests.

use crate::error::ExecuteError;
use futures::future::BoxFuture;
use outbox_engine::{HttpMethod, QueuedRequest};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Sends one queued request to the server.
pub trait Executor: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: &'a QueuedRequest,
    ) -> BoxFuture<'a, Result<Value, ExecuteError>>;
}

/// Executor backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    /// Build an executor with its own client.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ExecuteError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ExecuteError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Build an executor sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Join the base URL and a request path.
    pub fn url_for(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    async fn send(&self, request: &QueuedRequest) -> Result<Value, ExecuteError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url_for(&request.url));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ExecuteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }
}

impl Executor for HttpExecutor {
    fn execute<'a>(
        &'a self,
        request: &'a QueuedRequest,
    ) -> BoxFuture<'a, Result<Value, ExecuteError>> {
        Box::pin(self.send(request))
    }
}

fn transport_error(err: reqwest::Error) -> ExecuteError {
    if err.is_builder() {
        ExecuteError::InvalidRequest(err.to_string())
    } else if err.is_timeout() {
        ExecuteError::Timeout
    } else {
        ExecuteError::Network(err.to_string())
    }
}

/// Executor built from a closure.
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(QueuedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecuteError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(QueuedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecuteError>> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        request: &'a QueuedRequest,
    ) -> BoxFuture<'a, Result<Value, ExecuteError>> {
        Box::pin((self.f)(request.clone()))
    }
}
