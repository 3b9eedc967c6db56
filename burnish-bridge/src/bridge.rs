//! Contracts between bridge events and their owning transport multiplexer

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;

use burnish_ipc::{EndpointKind, Frame, ResponseOutcome};

use crate::error::BridgeError;

/// The transport multiplexer owning a set of bridged events.
///
/// A bridge allocates correlation ids, moves frames over its transport,
/// tracks which event names are actively subscribed on either side, and
/// reconstructs remote errors. Bridges are passed to events explicitly so
/// several can coexist in one process without cross-contamination.
///
/// `send_frame` enqueues without suspending the caller; flow control is a
/// transport concern, not this layer's.
pub trait Bridge: Send + Sync {
    /// Allocate a correlation id, monotonically unique per bridge instance.
    fn next_message_id(&self) -> u64;

    /// The counterpart role this endpoint is declared against.
    fn endpoint(&self) -> EndpointKind;

    /// Fails once the transport has ended.
    fn assert_alive(&self) -> Result<(), BridgeError>;

    /// Enqueue a frame for transmission to the peer.
    fn send_frame(&self, frame: Frame) -> Result<(), BridgeError>;

    /// Re-announce the full set of locally subscribed event names.
    fn send_subscriptions(&self) -> Result<(), BridgeError>;

    /// Whether `event` is actively subscribed, locally or (after an
    /// announcement) on the remote side.
    fn has_listener(&self, event: &str) -> bool;

    /// Reconstruct a failure from a remotely serialized error payload. An
    /// implementation whose reconstruction fails returns that secondary
    /// failure as its result instead.
    fn build_error(&self, value: &JsonValue, metadata: &JsonValue) -> BridgeError {
        let message = value
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| value.to_string());
        BridgeError::Remote {
            message,
            data: metadata.clone(),
        }
    }
}

/// Type-erased surface a bridge drives its event registry through.
///
/// Implemented by [`crate::BridgeEvent`] for every parameter/return pairing
/// so a bridge can hold heterogeneous events in one registry.
pub trait BridgeDispatch: Send + Sync {
    /// The event name this dispatcher answers for.
    fn event_name(&self) -> &str;

    /// Answer an incoming request frame locally. The returned value is
    /// framed back as the response by the bridge.
    fn dispatch_request(&self, param: JsonValue) -> BoxFuture<'_, Result<JsonValue, BridgeError>>;

    /// Settle the pending call registered under `id`.
    fn dispatch_response(&self, id: u64, outcome: ResponseOutcome) -> Result<(), BridgeError>;

    /// Reject every pending call with `err`; used at bridge termination.
    fn end(&self, err: BridgeError);

    /// Drop subscription state and pending correlation entries.
    fn clear(&self);

    /// Whether anyone listens for this event.
    fn has_subscribers(&self) -> bool;
}
