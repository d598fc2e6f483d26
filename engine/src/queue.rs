//! Queue - the in-memory container of pending mutations.
//!
//! The Queue holds every [`QueuedRequest`] in insertion order and hands them
//! out in drain order. It never touches storage; the runtime persists a
//! [`QueueSnapshot`] after each change.

use crate::{
    error::Result, request::drain_order, Error, NewRequest, QueueSnapshot, QueuedRequest,
    RequestId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What happened to a request after a transient replay failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RetryDecision {
    /// The request stays queued for a later drain
    Retry { retries: u32 },
    /// The retry budget is used up and the request was removed
    Exhausted { request: QueuedRequest },
}

/// Ordered queue of pending requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    /// Entries in insertion order
    requests: Vec<QueuedRequest>,
}

impl Queue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    /// Build a queue from previously persisted entries.
    ///
    /// Fails on duplicate ids or on entries that break `retries <= max_retries`.
    pub fn from_requests(requests: Vec<QueuedRequest>) -> Result<Self> {
        {
            let mut seen = HashSet::with_capacity(requests.len());
            for request in &requests {
                if !seen.insert(request.id.as_str()) {
                    return Err(Error::DuplicateRequestId(request.id.clone()));
                }
                if request.retries > request.max_retries {
                    return Err(Error::RetryInvariant {
                        id: request.id.clone(),
                        retries: request.retries,
                        max_retries: request.max_retries,
                    });
                }
            }
        }
        Ok(Self { requests })
    }

    /// Append a new request with its assigned id and creation time.
    pub fn enqueue(
        &mut self,
        request: NewRequest,
        id: impl Into<RequestId>,
        now: Timestamp,
    ) -> Result<&QueuedRequest> {
        let id = id.into();
        if self.contains(&id) {
            return Err(Error::DuplicateRequestId(id));
        }

        self.requests.push(QueuedRequest::from_new(request, id, now));
        let index = self.requests.len() - 1;
        Ok(&self.requests[index])
    }

    /// Entries in drain order: priority tier, then creation time, then insertion.
    pub fn ordered(&self) -> Vec<&QueuedRequest> {
        let mut ordered: Vec<_> = self.requests.iter().collect();
        ordered.sort_by(|a, b| drain_order(a, b));
        ordered
    }

    /// Owned copy of the entries in drain order.
    pub fn ordered_cloned(&self) -> Vec<QueuedRequest> {
        self.ordered().into_iter().cloned().collect()
    }

    /// Entries in insertion order.
    pub fn requests(&self) -> &[QueuedRequest] {
        &self.requests
    }

    pub fn get(&self, id: &str) -> Option<&QueuedRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Remove one entry, returning it if it was queued.
    pub fn remove(&mut self, id: &str) -> Option<QueuedRequest> {
        let index = self.requests.iter().position(|r| r.id == id)?;
        Some(self.requests.remove(index))
    }

    /// Count a transient failure against a request's retry budget.
    pub fn record_failure(&mut self, id: &str) -> Result<RetryDecision> {
        let index = self
            .requests
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::RequestNotFound(id.to_string()))?;

        let request = &mut self.requests[index];
        request.retries = request.retries.saturating_add(1);

        if request.is_exhausted() {
            let request = self.requests.remove(index);
            Ok(RetryDecision::Exhausted { request })
        } else {
            Ok(RetryDecision::Retry {
                retries: request.retries,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    /// Export the queue for persistence.
    pub fn to_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.requests.clone())
    }

    /// Restore a queue from a persisted snapshot.
    pub fn from_snapshot(snapshot: QueueSnapshot) -> Result<Self> {
        Self::from_requests(snapshot.requests)
    }
}
