//! Wire frame definitions for bridge traffic
//!
//! A bridge multiplexes three kinds of frames over its transport: requests
//! (with or without a correlation id), responses settling a correlated
//! request, and announcements of the locally subscribed event names. The
//! frame set is closed so transports get exhaustive handling at the
//! boundary instead of duck-typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Protocol version for compatibility checking between endpoints.
pub const PROTOCOL_VERSION: u32 = 1;

/// A single frame exchanged between two bridge endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Invoke an event on the peer. A missing `id` marks the request as
    /// fire-and-forget; no response frame will ever follow it.
    Request {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        event: String,
        param: JsonValue,
        priority: bool,
    },

    /// Settle the pending call registered under `id` on the peer.
    Response {
        id: u64,
        event: String,
        #[serde(flatten)]
        outcome: ResponseOutcome,
    },

    /// The full set of event names this endpoint currently subscribes to.
    /// Lets the peer skip transmitting events nobody is listening for.
    Subscriptions { events: Vec<String> },
}

impl Frame {
    /// Build a fire-and-forget request frame (no correlation id).
    pub fn fire_and_forget(event: impl Into<String>, param: JsonValue) -> Self {
        Frame::Request {
            id: None,
            event: event.into(),
            param,
            priority: false,
        }
    }

    /// Build a correlated request frame.
    pub fn request(id: u64, event: impl Into<String>, param: JsonValue, priority: bool) -> Self {
        Frame::Request {
            id: Some(id),
            event: event.into(),
            param,
            priority,
        }
    }

    /// Build a success response frame.
    pub fn success(id: u64, event: impl Into<String>, value: JsonValue) -> Self {
        Frame::Response {
            id,
            event: event.into(),
            outcome: ResponseOutcome::Success { value },
        }
    }

    /// Build an error response frame.
    pub fn error(id: u64, event: impl Into<String>, value: JsonValue, metadata: JsonValue) -> Self {
        Frame::Response {
            id,
            event: event.into(),
            outcome: ResponseOutcome::Error { value, metadata },
        }
    }

    /// The event name this frame concerns, if any.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Frame::Request { event, .. } | Frame::Response { event, .. } => Some(event),
            Frame::Subscriptions { .. } => None,
        }
    }
}

/// Outcome carried by a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    /// The remote handler settled with a value.
    Success { value: JsonValue },
    /// The remote handler failed; `value` is the serialized error and
    /// `metadata` carries whatever the remote error builder needs to
    /// reconstruct it (name, stack, codes).
    Error {
        value: JsonValue,
        #[serde(default)]
        metadata: JsonValue,
    },
}

/// Envelope wrapping every frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope stamped with the current version.
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if the protocol version is compatible.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}
