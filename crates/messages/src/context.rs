use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sagabus_core::MessageId;

/// Well-known header carrying the transport message id.
pub const HEADER_MESSAGE_ID: &str = "sagabus-msg-id";
/// Well-known header carrying a business correlation id.
pub const HEADER_CORRELATION_ID: &str = "sagabus-corr-id";
/// Well-known header naming the queue a message was received from.
pub const HEADER_SOURCE_QUEUE: &str = "sagabus-source-queue";

/// Per-message transport context visible to correlation rules and handlers.
///
/// Notes:
/// - `headers` are the string headers of the transport message, ordered by key.
/// - The context is immutable once handlers run; the pipeline builds it before
///   dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    message_id: MessageId,
    headers: BTreeMap<String, String>,
    received_at: DateTime<Utc>,
    source_queue: Option<String>,
}

impl MessageContext {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            headers: BTreeMap::new(),
            received_at: Utc::now(),
            source_queue: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_source_queue(mut self, queue: impl Into<String>) -> Self {
        self.source_queue = Some(queue.into());
        self
    }

    pub fn with_received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn source_queue(&self) -> Option<&str> {
        self.source_queue.as_deref()
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new(MessageId::new())
    }
}
