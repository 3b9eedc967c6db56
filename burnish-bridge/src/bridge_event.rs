//! Cross-process events with request/response correlation
//!
//! [`BridgeEvent`] extends the in-process [`Event`] with everything a call
//! needs to behave like a local function call across a transport: direction
//! validation against the endpoint's declared role, correlation-id matching
//! of responses to pending calls, call timeouts, and termination draining.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use burnish_ipc::{Direction, EndpointKind, Frame, ResponseOutcome};

use crate::bridge::{Bridge, BridgeDispatch};
use crate::error::BridgeError;
use crate::event::{Event, EventOptions, Handler, Subscription, SubscriptionHook};

/// Per-call options for a bridged request.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Ask the bridge to schedule this request ahead of normal traffic.
    pub priority: bool,
    /// Deadline for the response; expiry drops the pending entry and fails
    /// the call.
    pub timeout: Option<Duration>,
}

type Pending<R> = Mutex<HashMap<u64, oneshot::Sender<Result<R, BridgeError>>>>;

/// A named protocol message bound to a bridge.
///
/// Created once per message name and alive for the lifetime of its owning
/// bridge. Outbound traffic (`send`, `call`) is direction-checked against
/// the endpoint's role before it reaches the wire; inbound traffic arrives
/// through [`BridgeEvent::dispatch_request`] and
/// [`BridgeEvent::dispatch_response`], driven by the bridge.
pub struct BridgeEvent<P, R> {
    event: Event<P, R>,
    bridge: Arc<dyn Bridge>,
    direction: Direction,
    pending: Arc<Pending<R>>,
}

/// Subscription hook enforcing direction rules and keeping the peer's view
/// of the active subscription set current.
struct DirectionHook {
    bridge: Arc<dyn Bridge>,
    direction: Direction,
    event: String,
}

impl SubscriptionHook for DirectionHook {
    fn validate_subscribe(&self) -> Result<(), BridgeError> {
        let role = self.bridge.endpoint().opposite();
        if self.direction.may_subscribe(role) {
            Ok(())
        } else {
            Err(BridgeError::DirectionSubscribe {
                event: self.event.clone(),
                direction: self.direction,
                role,
            })
        }
    }

    fn subscriptions_changed(&self) -> Result<(), BridgeError> {
        self.bridge.send_subscriptions()
    }
}

impl<P, R> BridgeEvent<P, R>
where
    P: Serialize + DeserializeOwned + Clone + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    /// Bind a named event to `bridge` with a declared direction.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        options: EventOptions,
        bridge: Arc<dyn Bridge>,
    ) -> Self {
        let event = Event::new(name, options);
        event.set_hook(Arc::new(DirectionHook {
            bridge: Arc::clone(&bridge),
            direction,
            event: event.name().to_string(),
        }));
        Self {
            event,
            bridge,
            direction,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Identifying name, used in diagnostics.
    pub fn name(&self) -> &str {
        self.event.name()
    }

    /// Declared direction of this event.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The underlying in-process event (for advanced usage).
    pub fn event(&self) -> &Event<P, R> {
        &self.event
    }

    fn local_role(&self) -> EndpointKind {
        self.bridge.endpoint().opposite()
    }

    /// Validate that this endpoint's role may call/send this event.
    pub fn validate_can_send(&self) -> Result<(), BridgeError> {
        let role = self.local_role();
        if self.direction.may_send(role) {
            Ok(())
        } else {
            Err(BridgeError::DirectionSend {
                event: self.event.name().to_string(),
                direction: self.direction,
                role,
            })
        }
    }

    /// Whether this event name is actively subscribed anywhere on the
    /// bridge, locally or (after an announcement) remotely.
    pub fn has_subscribers(&self) -> bool {
        self.bridge.has_listener(self.event.name())
    }

    /// Fire-and-forget transmission to the peer. A no-op when nobody
    /// listens.
    pub fn send(&self, param: P) -> Result<(), BridgeError> {
        if !self.has_subscribers() {
            return Ok(());
        }
        self.validate_can_send()?;
        self.bridge.assert_alive()?;
        let value = serde_json::to_value(&param)?;
        self.bridge
            .send_frame(Frame::fire_and_forget(self.event.name(), value))
    }

    /// Call the peer and await its response.
    pub async fn call(&self, param: P) -> Result<R, BridgeError> {
        self.call_with(param, CallOptions::default()).await
    }

    /// Call the peer with explicit options.
    ///
    /// The pending entry lives until a response with the same correlation
    /// id settles it, the timeout expires, or the bridge ends. A timeout
    /// removes the entry before failing, so a response arriving afterwards
    /// finds nothing to settle.
    pub async fn call_with(&self, param: P, options: CallOptions) -> Result<R, BridgeError> {
        let (id, rx) = match self.register_call(param, &options) {
            Ok(registered) => registered,
            Err(err) => return self.reject(err),
        };
        match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(settled) => self.settle_call(id, settled),
                Err(_) => {
                    self.pending.lock().expect("lock poisoned").remove(&id);
                    self.reject(BridgeError::CallTimeout {
                        event: self.event.name().to_string(),
                        id,
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => {
                let settled = rx.await;
                self.settle_call(id, settled)
            }
        }
    }

    fn register_call(
        &self,
        param: P,
        options: &CallOptions,
    ) -> Result<(u64, oneshot::Receiver<Result<R, BridgeError>>), BridgeError> {
        self.validate_can_send()?;
        self.bridge.assert_alive()?;
        let value = serde_json::to_value(&param)?;
        let id = self.bridge.next_message_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("lock poisoned").insert(id, tx);
        debug!("issuing call {} on '{}'", id, self.event.name());
        if let Err(err) = self.bridge.send_frame(Frame::request(
            id,
            self.event.name(),
            value,
            options.priority,
        )) {
            self.pending.lock().expect("lock poisoned").remove(&id);
            return Err(err);
        }
        Ok((id, rx))
    }

    fn settle_call(
        &self,
        id: u64,
        settled: Result<Result<R, BridgeError>, oneshot::error::RecvError>,
    ) -> Result<R, BridgeError> {
        match settled {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => self.reject(err),
            // Entry dropped without settling: cleared mid-flight.
            Err(_) => self.reject(BridgeError::BridgeEnded(format!(
                "bridge event '{}' cleared with call {} in flight",
                self.event.name(),
                id
            ))),
        }
    }

    fn reject<T>(&self, err: BridgeError) -> Result<T, BridgeError> {
        self.event.on_error(&err);
        Err(err)
    }

    /// Answer an incoming request frame locally.
    ///
    /// Delegates to the base asynchronous dispatch; the returned value is
    /// what the bridge frames back as the response.
    pub async fn dispatch_request(&self, param: JsonValue) -> Result<JsonValue, BridgeError> {
        let param: P = serde_json::from_value(param)?;
        let value = self.event.call(param).await?;
        Ok(serde_json::to_value(&value)?)
    }

    /// Settle the pending call registered under `id`.
    ///
    /// A success outcome resolves the caller with the decoded value; an
    /// error outcome rejects it with the bridge's reconstruction of the
    /// remote failure. An unknown id (never issued, or already dropped by a
    /// timeout) settles nothing and is reported back to the bridge.
    pub fn dispatch_response(&self, id: u64, outcome: ResponseOutcome) -> Result<(), BridgeError> {
        let entry = self.pending.lock().expect("lock poisoned").remove(&id);
        let Some(tx) = entry else {
            warn!(
                "response for unknown correlation id {} on '{}'",
                id,
                self.event.name()
            );
            return Err(BridgeError::UnknownCorrelation {
                event: self.event.name().to_string(),
                id,
            });
        };
        let settled = match outcome {
            ResponseOutcome::Success { value } => {
                serde_json::from_value(value).map_err(BridgeError::from)
            }
            ResponseOutcome::Error { value, metadata } => {
                Err(self.bridge.build_error(&value, &metadata))
            }
        };
        // The caller may have given up already; nothing left to notify.
        let _ = tx.send(settled);
        Ok(())
    }

    /// Reject every in-flight call with `err` and drop the entries so
    /// nothing can settle afterwards. Used when the bridge terminates.
    pub fn end(&self, err: BridgeError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            pending.drain().collect()
        };
        for (id, tx) in drained {
            debug!(
                "rejecting in-flight call {} on '{}': {}",
                id,
                self.event.name(),
                err
            );
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Drop subscription state and pending correlation entries.
    pub fn clear(&self) {
        self.event.clear();
        self.pending.lock().expect("lock poisoned").clear();
    }

    // Base event surface, unchanged by the bridge extension.

    /// Register `handler`; the endpoint's role must permit subscribing to
    /// this event's direction.
    pub fn subscribe(
        &self,
        handler: Handler<P, R>,
        make_root: bool,
    ) -> Result<Subscription<P, R>, BridgeError> {
        self.event.subscribe(handler, make_root)
    }

    /// Remove `handler`.
    pub fn unsubscribe(&self, handler: &Handler<P, R>) -> Result<(), BridgeError> {
        self.event.unsubscribe(handler)
    }

    /// True iff a local root handler is registered.
    pub fn has_subscriptions(&self) -> bool {
        self.event.has_subscriptions()
    }

    /// Synchronous dispatch to local handlers only.
    pub fn call_sync(&self, param: P) -> Result<R, BridgeError> {
        self.event.call_sync(param)
    }

    /// Asynchronous dispatch to local handlers; `Ok(None)` without a root.
    pub async fn call_optional(&self, param: P) -> Result<Option<R>, BridgeError> {
        self.event.call_optional(param).await
    }

    /// Wait for the next local dispatch of this event.
    pub async fn wait(&self, returned: R, timeout: Option<Duration>) -> Result<P, BridgeError>
    where
        R: Clone + Sync,
    {
        self.event.wait(returned, timeout).await
    }
}

impl<P, R> BridgeDispatch for BridgeEvent<P, R>
where
    P: Serialize + DeserializeOwned + Clone + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    fn event_name(&self) -> &str {
        self.event.name()
    }

    fn dispatch_request(&self, param: JsonValue) -> BoxFuture<'_, Result<JsonValue, BridgeError>> {
        Box::pin(BridgeEvent::dispatch_request(self, param))
    }

    fn dispatch_response(&self, id: u64, outcome: ResponseOutcome) -> Result<(), BridgeError> {
        BridgeEvent::dispatch_response(self, id, outcome)
    }

    fn end(&self, err: BridgeError) {
        BridgeEvent::end(self, err)
    }

    fn clear(&self) {
        BridgeEvent::clear(self)
    }

    fn has_subscribers(&self) -> bool {
        BridgeEvent::has_subscribers(self)
    }
}
