//! Endpoint roles and event direction rules
//!
//! Every bridge endpoint declares which counterpart it talks to, and every
//! bridged event declares which role may call/send it and which role may
//! subscribe. The checks here are what keeps a worker from answering a
//! message only the daemon is allowed to answer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role an endpoint represents for direction checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Client,
    Server,
    /// A single process acting as both client and server.
    Dual,
}

impl EndpointKind {
    /// The role on the other side of a bridge. Dual peers with dual.
    pub fn opposite(self) -> Self {
        match self {
            EndpointKind::Client => EndpointKind::Server,
            EndpointKind::Server => EndpointKind::Client,
            EndpointKind::Dual => EndpointKind::Dual,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Client => write!(f, "client"),
            EndpointKind::Server => write!(f, "server"),
            EndpointKind::Dual => write!(f, "dual"),
        }
    }
}

/// Which role may call/send an event versus subscribe to it.
///
/// For a one-directional event exactly one singular role may send and the
/// other may subscribe; a dual endpoint embodies both roles and may do
/// either. A bidirectional event is the reverse: either singular role may
/// send or subscribe, but a dual endpoint is ambiguous about which
/// counterpart it addresses and is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Server calls/sends, client subscribes.
    ServerToClient,
    /// Client calls/sends, server subscribes.
    ClientToServer,
    /// Either singular role may call or subscribe.
    Bidirectional,
}

impl Direction {
    /// Whether `role` may call or send an event of this direction.
    pub fn may_send(self, role: EndpointKind) -> bool {
        match self {
            Direction::ServerToClient => {
                matches!(role, EndpointKind::Server | EndpointKind::Dual)
            }
            Direction::ClientToServer => {
                matches!(role, EndpointKind::Client | EndpointKind::Dual)
            }
            Direction::Bidirectional => {
                matches!(role, EndpointKind::Server | EndpointKind::Client)
            }
        }
    }

    /// Whether `role` may subscribe to an event of this direction.
    pub fn may_subscribe(self, role: EndpointKind) -> bool {
        match self {
            Direction::ServerToClient => {
                matches!(role, EndpointKind::Client | EndpointKind::Dual)
            }
            Direction::ClientToServer => {
                matches!(role, EndpointKind::Server | EndpointKind::Dual)
            }
            Direction::Bidirectional => {
                matches!(role, EndpointKind::Server | EndpointKind::Client)
            }
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ServerToClient => write!(f, "server->client"),
            Direction::ClientToServer => write!(f, "client->server"),
            Direction::Bidirectional => write!(f, "server<->client"),
        }
    }
}
