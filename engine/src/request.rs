//! Request types for expressing queued mutations.
//!
//! A mutation made while offline is captured as a [`QueuedRequest`]: the HTTP
//! call that should be replayed once connectivity returns, together with its
//! priority tier and retry budget.

use crate::{RequestId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Retry budget given to requests that do not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP method of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tier of a queued request.
///
/// The derived ordering follows drain order: `High < Medium < Low`, so
/// sorting ascending puts the most urgent requests first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// All tiers in drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

/// A mutation submitted for queueing, before an id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub method: HttpMethod,
    pub url: String,
    /// JSON body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NewRequest {
    /// Create a request with medium priority and the default retry budget.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: None,
            headers: BTreeMap::new(),
            priority: Priority::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A durable record describing one pending mutation awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    /// Unique id assigned at enqueue time
    pub id: RequestId,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    /// When the request was queued (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Failed replay attempts so far
    #[serde(default)]
    pub retries: u32,
    pub max_retries: u32,
}

impl QueuedRequest {
    /// Materialize a submitted request with its assigned id and creation time.
    pub fn from_new(request: NewRequest, id: impl Into<RequestId>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            method: request.method,
            url: request.url,
            data: request.data,
            headers: request.headers,
            priority: request.priority,
            created_at,
            retries: 0,
            max_retries: request.max_retries,
        }
    }

    /// Whether the retry budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// The submitted form of this request, without id, timestamp and retry count.
    pub fn to_new(&self) -> NewRequest {
        NewRequest {
            method: self.method,
            url: self.url.clone(),
            data: self.data.clone(),
            headers: self.headers.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
        }
    }
}

/// Drain order: priority tier first, then creation time.
///
/// Entries that compare equal keep their insertion order when sorted with a
/// stable sort.
pub fn drain_order(a: &QueuedRequest, b: &QueuedRequest) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_request_defaults() {
        let request = NewRequest::new(HttpMethod::Post, "/contacts");
        assert_eq!(request.priority, Priority::Medium);
        assert_eq!(request.max_retries, DEFAULT_MAX_RETRIES);
        assert!(request.data.is_none());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn from_new_starts_with_zero_retries() {
        let request = NewRequest::new(HttpMethod::Put, "/profile")
            .with_data(json!({"name": "Alice"}))
            .with_header("X-Trace", "abc")
            .with_priority(Priority::High)
            .with_max_retries(5);

        let queued = QueuedRequest::from_new(request.clone(), "req-1", 1000);
        assert_eq!(queued.id, "req-1");
        assert_eq!(queued.created_at, 1000);
        assert_eq!(queued.retries, 0);
        assert_eq!(queued.max_retries, 5);
        assert_eq!(queued.to_new(), request);
    }

    #[test]
    fn priority_orders_high_first() {
        let mut tiers = vec![Priority::Low, Priority::High, Priority::Medium];
        tiers.sort();
        assert_eq!(tiers, Priority::ALL.to_vec());
    }

    #[test]
    fn drain_order_by_priority_then_time() {
        let low_early = QueuedRequest::from_new(
            NewRequest::new(HttpMethod::Post, "/a").with_priority(Priority::Low),
            "a",
            1,
        );
        let high_late = QueuedRequest::from_new(
            NewRequest::new(HttpMethod::Post, "/b").with_priority(Priority::High),
            "b",
            50,
        );
        let high_early = QueuedRequest::from_new(
            NewRequest::new(HttpMethod::Post, "/c").with_priority(Priority::High),
            "c",
            10,
        );

        assert_eq!(drain_order(&high_late, &low_early), Ordering::Less);
        assert_eq!(drain_order(&high_early, &high_late), Ordering::Less);
    }

    #[test]
    fn exhausted_when_retries_reach_limit() {
        let mut queued = QueuedRequest::from_new(
            NewRequest::new(HttpMethod::Delete, "/contacts/1").with_max_retries(2),
            "req-1",
            0,
        );
        assert!(!queued.is_exhausted());
        queued.retries = 2;
        assert!(queued.is_exhausted());
    }

    #[test]
    fn wire_format_is_camel_case() {
        let queued = QueuedRequest::from_new(
            NewRequest::new(HttpMethod::Patch, "/subscriptions/7")
                .with_data(json!({"active": false})),
            "req-9",
            1706745600000,
        );

        let value = serde_json::to_value(&queued).unwrap();
        assert_eq!(value["method"], "PATCH");
        assert_eq!(value["priority"], "medium");
        assert_eq!(value["createdAt"], 1706745600000u64);
        assert_eq!(value["maxRetries"], 3);

        let parsed: QueuedRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, queued);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let parsed: QueuedRequest = serde_json::from_value(json!({
            "id": "req-1",
            "method": "POST",
            "url": "/contacts",
            "createdAt": 5,
            "maxRetries": 3
        }))
        .unwrap();

        assert_eq!(parsed.priority, Priority::Medium);
        assert_eq!(parsed.retries, 0);
        assert!(parsed.headers.is_empty());
    }
}
