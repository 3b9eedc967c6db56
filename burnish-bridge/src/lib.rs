//! Event and bridge correlation layer for burnish
//!
//! This crate sits between raw byte transports and the toolchain's domain
//! logic, giving every cross-process call the semantics of a local function
//! call. It provides two building blocks, layered:
//!
//! - [`Event`]: an in-process publish/subscribe primitive with one root
//!   handler and any number of secondary handlers, supporting
//!   fire-and-forget, synchronous, asynchronous and one-shot-wait dispatch.
//! - [`BridgeEvent`]: the cross-process extension, adding correlation-id
//!   matching of requests to responses, direction validation against the
//!   endpoint's declared role, call timeouts, and termination draining.
//!
//! A set of bridge events is owned by a transport multiplexer implementing
//! [`Bridge`], which allocates correlation ids, moves [`burnish_ipc::Frame`]
//! values over its transport, and drives events through the type-erased
//! [`BridgeDispatch`] surface. Bridges are always passed explicitly so
//! several of them can coexist in one process without cross-contamination.

pub mod bridge;
pub mod bridge_event;
pub mod error;
pub mod event;

// Re-export main types
pub use bridge::{Bridge, BridgeDispatch};
pub use bridge_event::{BridgeEvent, CallOptions};
pub use error::BridgeError;
pub use event::{
    ErrorCallback, Event, EventOptions, Handler, HandlerResult, Reply, Subscription,
};
