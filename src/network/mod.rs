//! Peer connectivity
//!
//! Transports deliver `PeerEvent`s to the session and hand it a
//! `PeerChannel` per connection. The session keeps channels in the
//! `PeerRegistry`; nothing else holds on to them.

pub mod memory;
pub mod registry;
pub mod tcp;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::protocol::PeerMessage;

pub use registry::{BroadcastReport, PeerInfo, PeerRegistry};
pub use tcp::TcpTransport;

/// Opaque remote peer identifier
pub type PeerId = String;

/// Distinguishes successive connections to the same peer
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Accepted by us; we owe the remote a sync
    Incoming,
    Outgoing,
}

/// Ordered message channel to one remote peer
///
/// `send` must not block; delivery is not confirmed.
pub trait PeerChannel: Send + Sync {
    fn remote_id(&self) -> &str;

    fn connection_id(&self) -> ConnectionId;

    fn send(&self, message: &PeerMessage) -> Result<(), NetworkError>;

    fn close(&self);
}

pub type PeerHandle = Arc<dyn PeerChannel>;

/// Everything a transport reports to the session
pub enum PeerEvent {
    Opened {
        channel: PeerHandle,
        direction: Direction,
    },
    Message {
        peer_id: PeerId,
        connection: ConnectionId,
        message: PeerMessage,
    },
    Closed {
        peer_id: PeerId,
        connection: ConnectionId,
    },
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Opened { channel, direction } => f
                .debug_struct("Opened")
                .field("peer_id", &channel.remote_id())
                .field("direction", direction)
                .finish(),
            PeerEvent::Message {
                peer_id, message, ..
            } => f
                .debug_struct("Message")
                .field("peer_id", peer_id)
                .field("command", &message.command())
                .finish(),
            PeerEvent::Closed { peer_id, connection } => f
                .debug_struct("Closed")
                .field("peer_id", peer_id)
                .field("connection", connection)
                .finish(),
        }
    }
}

pub type PeerEventSink = mpsc::UnboundedSender<PeerEvent>;
