//! Per-call options for queue manager and collaborator operations.

use crate::Timestamp;
use chrono::Duration;
use tokio_util::sync::CancellationToken;

/// Options forwarded to the storage collaborators with every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Per-request timeout enforced by the collaborator
    pub server_timeout: Option<std::time::Duration>,
}

/// Tracing context for a single logical operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Client-side request identifier propagated to the storage service
    pub client_request_id: String,
    /// When the logical operation started
    pub started_at: Timestamp,
}

impl OperationContext {
    /// Create context with a specific client request ID
    pub fn with_client_request_id(client_request_id: impl Into<String>) -> Self {
        Self {
            client_request_id: client_request_id.into(),
            started_at: Timestamp::now(),
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::with_client_request_id(uuid::Uuid::new_v4().to_string())
    }
}

/// Everything a collaborator receives alongside the request payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub options: RequestOptions,
    pub operation: OperationContext,
}

/// Options common to every queue manager call
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Request options and operation context handed to collaborators
    pub context: RequestContext,
    /// Aborts the in-flight collaborator call when triggered
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    /// Create call options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the per-request collaborator timeout
    pub fn with_server_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.context.options.server_timeout = Some(timeout);
        self
    }

    /// Set the client request ID used for tracing
    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.context.operation = OperationContext::with_client_request_id(id);
        self
    }
}

/// Options for [`QueueManager::send`](crate::manager::QueueManager::send)
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Time-to-live after which the queue service discards the message
    pub time_to_live: Option<Duration>,
    /// Delay before the message first becomes visible to receivers
    pub initial_visibility_delay: Option<Duration>,
    pub call: CallOptions,
}

impl SendOptions {
    /// Create send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Hide the message for a while after it is enqueued
    pub fn with_initial_visibility_delay(mut self, delay: Duration) -> Self {
        self.initial_visibility_delay = Some(delay);
        self
    }

    /// Replace the common call options
    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }
}

/// Options for [`QueueManager::receive`](crate::manager::QueueManager::receive)
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// How long the dequeued message stays hidden from other receivers
    pub visibility_timeout: Option<Duration>,
    pub call: CallOptions,
}

impl ReceiveOptions {
    /// Create receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Replace the common call options
    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
