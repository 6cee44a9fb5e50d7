//! Scripted transport for exercising delivery outcomes.
//!
//! A [`MockTransport`] answers each send with the next scripted
//! [`MockOutcome`], falling back to a default once the script runs dry. Every
//! request is recorded so tests can assert on order and attempt numbers.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use beacon_delivery::{client::DeliveryRequest, DeliveryError, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

/// Answer of one scripted send.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Collector accepts and echoes the body.
    Success,
    /// Collector accepts with the given response.
    Respond(Value),
    /// Connection could not be made.
    Network,
    /// Request did not complete in time.
    Timeout,
    /// HTTP 5xx response.
    ServerError(u16),
    /// HTTP 4xx response.
    ClientError(u16),
    /// HTTP 429 with the given Retry-After.
    RateLimited(u64),
    /// Post function rejected the payload.
    Rejected {
        /// Whether the rejection may succeed on retry
        retryable: bool,
    },
    /// Waits before answering with the inner outcome.
    Delayed(Duration, Box<MockOutcome>),
}

impl MockOutcome {
    fn into_result(self, request: &DeliveryRequest) -> Result<Value, DeliveryError> {
        match self {
            Self::Success => Ok(request.body.clone()),
            Self::Respond(value) => Ok(value),
            Self::Network => Err(DeliveryError::network("connection refused")),
            Self::Timeout => Err(DeliveryError::timeout(Duration::from_secs(10))),
            Self::ServerError(status) => Err(DeliveryError::server_error(status, "mock error")),
            Self::ClientError(status) => Err(DeliveryError::client_error(status, "mock error")),
            Self::RateLimited(seconds) => Err(DeliveryError::rate_limited(seconds)),
            Self::Rejected { retryable } => {
                Err(DeliveryError::rejected("mock rejection", retryable))
            },
            Self::Delayed(_, inner) => inner.into_result(request),
        }
    }
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<MockOutcome>,
    fallback: MockOutcome,
    requests: Vec<DeliveryRequest>,
    delivered: Vec<Uuid>,
}

/// Transport answering from a script. Clones share state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::always(MockOutcome::Success)
    }

    /// Creates a transport answering every send with `outcome`.
    pub fn always(outcome: MockOutcome) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                fallback: outcome,
                requests: Vec::new(),
                delivered: Vec::new(),
            })),
        }
    }

    /// Queues `outcome` for the next unscripted send.
    pub fn push(&self, outcome: MockOutcome) -> &Self {
        self.state.lock().script.push_back(outcome);
        self
    }

    /// Queues `outcome` for the next `times` sends.
    pub fn fail_next(&self, times: usize, outcome: MockOutcome) -> &Self {
        let mut state = self.state.lock();
        state.script.extend(std::iter::repeat(outcome).take(times));
        drop(state);
        self
    }

    /// Replaces the answer used once the script is exhausted.
    pub fn set_fallback(&self, outcome: MockOutcome) {
        self.state.lock().fallback = outcome;
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of sends attempted.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Attempt numbers of the sends for `payload_id`, in order.
    pub fn attempts_for(&self, payload_id: Uuid) -> Vec<u32> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.payload_id == payload_id)
            .map(|request| request.attempt_number)
            .collect()
    }

    /// Ids of the payloads accepted, in acceptance order.
    pub fn delivered(&self) -> Vec<Uuid> {
        self.state.lock().delivered.clone()
    }

    /// Bodies of the accepted payloads.
    pub fn delivered_bodies(&self) -> Vec<Value> {
        let state = self.state.lock();
        state
            .requests
            .iter()
            .filter(|request| state.delivered.contains(&request.payload_id))
            .map(|request| request.body.clone())
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &DeliveryRequest) -> beacon_delivery::Result<Value> {
        let outcome = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            let fallback = state.fallback.clone();
            state.script.pop_front().unwrap_or(fallback)
        };

        if let MockOutcome::Delayed(delay, _) = &outcome {
            tokio::time::sleep(*delay).await;
        }

        let result = outcome.into_result(request);
        if result.is_ok() {
            self.state.lock().delivered.push(request.payload_id);
        }
        result
    }
}
