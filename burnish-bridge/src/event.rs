//! Generic publish/subscribe event primitive
//!
//! An [`Event`] holds one distinguished root handler plus any number of
//! secondary handlers. The root's return value is what `call`/`call_sync`
//! report back to the caller; secondary handlers run alongside it and their
//! values are discarded, though their failures are not. Four dispatch modes
//! are supported: fire-and-forget (`send`), synchronous (`call_sync`),
//! asynchronous (`call`/`call_optional`) and one-shot waiting (`wait`).

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::BridgeError;

/// Result produced by an event handler.
pub type HandlerResult<R> = Result<R, BridgeError>;

/// What a handler hands back when invoked: an immediate value, or a
/// deferred result that settles later on the runtime.
pub enum Reply<R> {
    Now(HandlerResult<R>),
    Later(BoxFuture<'static, HandlerResult<R>>),
}

/// A subscribable callback. Clones share identity, and identity is what
/// duplicate-subscription checks compare: registering the same handler
/// value twice is rejected.
pub struct Handler<P, R> {
    f: Arc<dyn Fn(P) -> Reply<R> + Send + Sync>,
}

impl<P, R> Clone for Handler<P, R> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<P, R> Handler<P, R> {
    /// Wrap a purely synchronous callback.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(P) -> HandlerResult<R> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(move |param| Reply::Now(f(param))),
        }
    }

    /// Wrap a callback producing a deferred result.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |param| Reply::Later(Box::pin(f(param)))),
        }
    }

    /// Wrap a callback that decides per invocation whether to reply
    /// immediately or defer.
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(P) -> Reply<R> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    fn invoke(&self, param: P) -> Reply<R> {
        (self.f)(param)
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

/// Callback invoked with every failure before it is returned to the caller.
pub type ErrorCallback = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// Per-event dispatch options.
#[derive(Clone, Default)]
pub struct EventOptions {
    /// Await secondary handlers strictly after the root, in subscription
    /// order.
    pub serial: bool,
    /// Forbid more than one live subscription.
    pub unique: bool,
    /// Failure hook for telemetry; never suppresses the failure itself.
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for EventOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventOptions")
            .field("serial", &self.serial)
            .field("unique", &self.unique)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Hook run around subscription mutations. The base event has none;
/// `BridgeEvent` installs one to enforce direction rules and announce the
/// active subscription set to the peer. Validation runs before the
/// mutation so a rejected subscribe leaves no state behind; the change
/// notification runs after it.
pub(crate) trait SubscriptionHook: Send + Sync {
    fn validate_subscribe(&self) -> Result<(), BridgeError>;
    fn subscriptions_changed(&self) -> Result<(), BridgeError>;
}

struct Subscribers<P, R> {
    root: Option<Handler<P, R>>,
    /// Ordered so root promotion on unsubscribe is deterministic: the
    /// oldest secondary subscriber is promoted first.
    secondary: Vec<Handler<P, R>>,
}

impl<P, R> Default for Subscribers<P, R> {
    fn default() -> Self {
        Self {
            root: None,
            secondary: Vec::new(),
        }
    }
}

impl<P, R> Subscribers<P, R> {
    fn contains(&self, handler: &Handler<P, R>) -> bool {
        self.root.as_ref().map_or(false, |r| r.ptr_eq(handler))
            || self.secondary.iter().any(|s| s.ptr_eq(handler))
    }

    fn is_empty(&self) -> bool {
        self.root.is_none() && self.secondary.is_empty()
    }
}

struct Inner<P, R> {
    name: String,
    options: EventOptions,
    subscribers: Mutex<Subscribers<P, R>>,
    hook: Mutex<Option<Arc<dyn SubscriptionHook>>>,
}

/// In-process publish/subscribe event.
///
/// Cloning yields another handle onto the same subscription state. Handlers
/// are always invoked outside the subscriber lock, so a handler may
/// subscribe or unsubscribe re-entrantly.
pub struct Event<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for Event<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, R> fmt::Debug for Event<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("name", &self.inner.name).finish()
    }
}

impl<P, R> Event<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new(name: impl Into<String>, options: EventOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                options,
                subscribers: Mutex::new(Subscribers::default()),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Identifying name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &EventOptions {
        &self.inner.options
    }

    pub(crate) fn set_hook(&self, hook: Arc<dyn SubscriptionHook>) {
        *self.inner.hook.lock().expect("lock poisoned") = Some(hook);
    }

    fn hook(&self) -> Option<Arc<dyn SubscriptionHook>> {
        self.inner.hook.lock().expect("lock poisoned").clone()
    }

    /// True iff a root handler is registered. Promotion on unsubscribe
    /// guarantees secondary-only states cannot exist.
    pub fn has_subscriptions(&self) -> bool {
        self.inner
            .subscribers
            .lock()
            .expect("lock poisoned")
            .root
            .is_some()
    }

    /// Register `handler`. The first subscriber becomes the root; later
    /// subscribers join the secondary queue unless `make_root` demotes the
    /// current root to the back of that queue.
    pub fn subscribe(
        &self,
        handler: Handler<P, R>,
        make_root: bool,
    ) -> Result<Subscription<P, R>, BridgeError> {
        let hook = self.hook();
        if let Some(hook) = &hook {
            hook.validate_subscribe()?;
        }
        {
            let mut subs = self.inner.subscribers.lock().expect("lock poisoned");
            if self.inner.options.unique && !subs.is_empty() {
                return Err(BridgeError::UniqueViolation(self.inner.name.clone()));
            }
            if subs.contains(&handler) {
                return Err(BridgeError::AlreadySubscribed(self.inner.name.clone()));
            }
            if subs.root.is_none() {
                subs.root = Some(handler.clone());
            } else if make_root {
                if let Some(demoted) = subs.root.replace(handler.clone()) {
                    subs.secondary.push(demoted);
                }
            } else {
                subs.secondary.push(handler.clone());
            }
        }
        if let Some(hook) = &hook {
            hook.subscriptions_changed()?;
        }
        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            handler,
        })
    }

    /// Remove `handler`. Removing the root promotes the oldest secondary
    /// subscriber, if any. Unknown handlers are ignored.
    pub fn unsubscribe(&self, handler: &Handler<P, R>) -> Result<(), BridgeError> {
        let removed = {
            let mut subs = self.inner.subscribers.lock().expect("lock poisoned");
            if let Some(pos) = subs.secondary.iter().position(|s| s.ptr_eq(handler)) {
                subs.secondary.remove(pos);
                true
            } else if subs.root.as_ref().map_or(false, |r| r.ptr_eq(handler)) {
                subs.root = if subs.secondary.is_empty() {
                    None
                } else {
                    Some(subs.secondary.remove(0))
                };
                true
            } else {
                false
            }
        };
        if removed {
            if let Some(hook) = self.hook() {
                hook.subscriptions_changed()?;
            }
        }
        Ok(())
    }

    /// Drop all subscriptions. Used at teardown; does not notify the hook.
    pub fn clear(&self) {
        let mut subs = self.inner.subscribers.lock().expect("lock poisoned");
        subs.root = None;
        subs.secondary.clear();
    }

    fn snapshot(&self) -> (Option<Handler<P, R>>, Vec<Handler<P, R>>) {
        let subs = self.inner.subscribers.lock().expect("lock poisoned");
        (subs.root.clone(), subs.secondary.clone())
    }

    /// Invoke the configured failure hook, if any. Never suppresses the
    /// failure itself.
    pub fn on_error(&self, err: &BridgeError) {
        if let Some(cb) = &self.inner.options.on_error {
            cb(err);
        }
    }

    fn fail<T>(&self, err: BridgeError) -> Result<T, BridgeError> {
        self.on_error(&err);
        Err(err)
    }

    /// Fire-and-forget dispatch. A no-op without a root handler.
    ///
    /// Synchronous failures propagate to the caller and stop dispatch.
    /// Deferred replies are detached onto the runtime without being
    /// awaited (a Tokio runtime must be current for those), their failures
    /// routed to `on_error`.
    pub fn send(&self, param: P) -> Result<(), BridgeError> {
        let (root, secondary) = self.snapshot();
        let Some(root) = root else { return Ok(()) };
        for handler in std::iter::once(root).chain(secondary) {
            match handler.invoke(param.clone()) {
                Reply::Now(Ok(_)) => {}
                Reply::Now(Err(err)) => return self.fail(err),
                Reply::Later(fut) => self.detach(fut),
            }
        }
        Ok(())
    }

    fn detach(&self, fut: BoxFuture<'static, HandlerResult<R>>) {
        let name = self.inner.name.clone();
        let on_error = self.inner.options.on_error.clone();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                warn!("fire-and-forget handler for '{}' failed: {}", name, err);
                if let Some(cb) = on_error {
                    cb(&err);
                }
            }
        });
    }

    /// Synchronous dispatch returning the root handler's value.
    ///
    /// Every handler must reply immediately; a deferred reply is a contract
    /// violation and fails the whole call. Hot, purely synchronous paths
    /// use this to skip deferred-result overhead.
    pub fn call_sync(&self, param: P) -> Result<R, BridgeError> {
        let (root, secondary) = self.snapshot();
        let Some(root) = root else {
            return self.fail(BridgeError::NoSubscription(self.inner.name.clone()));
        };
        let value = match root.invoke(param.clone()) {
            Reply::Now(Ok(value)) => value,
            Reply::Now(Err(err)) => return self.fail(err),
            Reply::Later(_) => {
                return self.fail(BridgeError::DeferredInSyncCall(self.inner.name.clone()))
            }
        };
        for handler in secondary {
            match handler.invoke(param.clone()) {
                Reply::Now(Ok(_)) => {}
                Reply::Now(Err(err)) => return self.fail(err),
                Reply::Later(_) => {
                    return self.fail(BridgeError::DeferredInSyncCall(self.inner.name.clone()))
                }
            }
        }
        Ok(value)
    }

    /// Asynchronous dispatch returning the root handler's value.
    ///
    /// With `serial` set, the root settles before any secondary handler is
    /// invoked and secondaries settle strictly in subscription order.
    /// Otherwise every handler is issued before any of them is awaited, and
    /// the call returns once the whole group has settled.
    pub async fn call(&self, param: P) -> Result<R, BridgeError> {
        let (root, secondary) = self.snapshot();
        let Some(root) = root else {
            return self.fail(BridgeError::NoSubscription(self.inner.name.clone()));
        };
        if self.inner.options.serial {
            let value = match settle(root.invoke(param.clone())).await {
                Ok(value) => value,
                Err(err) => return self.fail(err),
            };
            for handler in secondary {
                if let Err(err) = settle(handler.invoke(param.clone())).await {
                    return self.fail(err);
                }
            }
            Ok(value)
        } else {
            let root_reply = settle(root.invoke(param.clone()));
            let rest: Vec<_> = secondary
                .into_iter()
                .map(|handler| settle(handler.invoke(param.clone())))
                .collect();
            let (value, rest) = futures::join!(root_reply, join_all(rest));
            match value {
                Ok(value) => {
                    for outcome in rest {
                        if let Err(err) = outcome {
                            return self.fail(err);
                        }
                    }
                    Ok(value)
                }
                Err(err) => self.fail(err),
            }
        }
    }

    /// Like [`Event::call`], but an absent root yields `Ok(None)` instead
    /// of failing.
    pub async fn call_optional(&self, param: P) -> Result<Option<R>, BridgeError> {
        if !self.has_subscriptions() {
            return Ok(None);
        }
        self.call(param).await.map(Some)
    }

    /// Wait for the next dispatch of this event, resolving with its
    /// parameter. `returned` is handed back to each dispatcher to satisfy
    /// the handler contract. A take-once guard means a firing after the
    /// timeout can never resolve the waiter, and the waiter can never
    /// resolve twice.
    pub async fn wait(&self, returned: R, timeout: Option<Duration>) -> Result<P, BridgeError>
    where
        R: Clone + Sync,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let handler = Handler::raw({
            let slot = Arc::clone(&slot);
            move |param: P| {
                if let Some(tx) = slot.lock().expect("lock poisoned").take() {
                    let _ = tx.send(param);
                }
                Reply::Now(Ok(returned.clone()))
            }
        });
        let subscription = self.subscribe(handler, false)?;
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(param)) => Ok(param),
                Ok(Err(_)) => Err(BridgeError::BridgeEnded(format!(
                    "event '{}' dropped while waiting",
                    self.inner.name
                ))),
                Err(_) => Err(BridgeError::WaitTimeout(self.inner.name.clone())),
            },
            None => rx.await.map_err(|_| {
                BridgeError::BridgeEnded(format!(
                    "event '{}' dropped while waiting",
                    self.inner.name
                ))
            }),
        };
        let _ = subscription.unsubscribe();
        match received {
            Ok(param) => Ok(param),
            Err(err) => self.fail(err),
        }
    }
}

async fn settle<R>(reply: Reply<R>) -> HandlerResult<R> {
    match reply {
        Reply::Now(outcome) => outcome,
        Reply::Later(fut) => fut.await,
    }
}

/// Handle for removing exactly one registered callback. Dropping the
/// handle leaves the subscription in place.
pub struct Subscription<P, R> {
    inner: Weak<Inner<P, R>>,
    handler: Handler<P, R>,
}

impl<P, R> fmt::Debug for Subscription<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<P, R> Subscription<P, R>
where
    P: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Remove the callback this handle was returned for.
    pub fn unsubscribe(self) -> Result<(), BridgeError> {
        if let Some(inner) = self.inner.upgrade() {
            Event { inner }.unsubscribe(&self.handler)
        } else {
            Ok(())
        }
    }
}
