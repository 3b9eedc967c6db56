//! Error types for the event and bridge layer

use burnish_ipc::{Direction, EndpointKind, IpcError};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Failures surfaced by events and bridged calls.
///
/// Cloneable so bridge teardown can fan a single failure out to every
/// pending call.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// `call`/`call_sync` on an event with no root handler
    #[error("no subscription registered for event '{0}'")]
    NoSubscription(String),

    /// The same callback was registered twice
    #[error("callback already subscribed to event '{0}'")]
    AlreadySubscribed(String),

    /// A second subscription on an event declared `unique`
    #[error("event '{0}' permits only a single subscription")]
    UniqueViolation(String),

    /// A handler returned a deferred result inside `call_sync`
    #[error("subscription returned a deferred result for a synchronous call to event '{0}'")]
    DeferredInSyncCall(String),

    /// `wait` elapsed before the event fired
    #[error("timed out waiting for event '{0}'")]
    WaitTimeout(String),

    /// A bridged call's response deadline expired
    #[error("call {id} to event '{event}' timed out after {timeout_ms}ms")]
    CallTimeout {
        event: String,
        id: u64,
        timeout_ms: u64,
    },

    /// This endpoint's role may not call/send the event
    #[error("role '{role}' may not send event '{event}' ({direction})")]
    DirectionSend {
        event: String,
        direction: Direction,
        role: EndpointKind,
    },

    /// This endpoint's role may not subscribe to the event
    #[error("role '{role}' may not subscribe to event '{event}' ({direction})")]
    DirectionSubscribe {
        event: String,
        direction: Direction,
        role: EndpointKind,
    },

    /// A response arrived for a correlation id with no pending entry
    #[error("response for unknown correlation id {id} on event '{event}'")]
    UnknownCorrelation { event: String, id: u64 },

    /// The bridge terminated while work was in flight
    #[error("bridge has ended: {0}")]
    BridgeEnded(String),

    /// A failure reconstructed from a remotely serialized error payload
    #[error("remote error: {message}")]
    Remote { message: String, data: JsonValue },

    /// Parameter or return value could not cross the wire boundary
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Protocol-level failure from the IPC layer
    #[error("ipc error: {0}")]
    Ipc(String),

    /// A domain handler failed
    #[error("handler failed: {0}")]
    Handler(String),
}

impl BridgeError {
    /// Protocol misuse no retry can fix: calling or subscribing against an
    /// event's declared direction, or correlating a response nobody asked
    /// for.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::DirectionSend { .. }
                | BridgeError::DirectionSubscribe { .. }
                | BridgeError::UnknownCorrelation { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<IpcError> for BridgeError {
    fn from(err: IpcError) -> Self {
        BridgeError::Ipc(err.to_string())
    }
}
