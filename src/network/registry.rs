//! Set of live peer connections

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::{ConnectionId, Direction, PeerHandle, PeerId};
use crate::error::NetworkError;
use crate::protocol::PeerMessage;

/// Public view of one connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub direction: Direction,
    pub connected_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub send_failures: u64,
}

struct Entry {
    channel: PeerHandle,
    info: PeerInfo,
}

/// Outcome of a broadcast; failures are collected, never fatal
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<(PeerId, NetworkError)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Live connections in registration order, at most one per remote id
pub struct PeerRegistry {
    entries: Vec<Entry>,
    peers_tx: watch::Sender<Vec<PeerInfo>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (peers_tx, _) = watch::channel(Vec::new());
        Self {
            entries: Vec::new(),
            peers_tx,
        }
    }

    pub fn register_incoming(&mut self, channel: PeerHandle) -> bool {
        self.register(channel, Direction::Incoming)
    }

    pub fn register_outgoing(&mut self, channel: PeerHandle) -> bool {
        self.register(channel, Direction::Outgoing)
    }

    /// Add a connection; returns true if it replaced one for the same peer
    pub fn register(&mut self, channel: PeerHandle, direction: Direction) -> bool {
        let info = PeerInfo {
            peer_id: channel.remote_id().to_string(),
            direction,
            connected_at: Utc::now(),
            messages_sent: 0,
            send_failures: 0,
        };

        let replaced = match self.position(&info.peer_id) {
            Some(index) => {
                let old = std::mem::replace(&mut self.entries[index], Entry { channel, info });
                if old.channel.connection_id() != self.entries[index].channel.connection_id() {
                    old.channel.close();
                }
                true
            }
            None => {
                tracing::info!(peer = %info.peer_id, ?direction, "Peer registered");
                self.entries.push(Entry { channel, info });
                false
            }
        };
        self.publish();
        replaced
    }

    /// Remove a peer; absent peers are a no-op
    ///
    /// With `connection` set, only that connection is removed, so a stale
    /// close cannot evict a newer connection from the same peer.
    pub fn remove(&mut self, peer_id: &str, connection: Option<ConnectionId>) -> Option<PeerInfo> {
        let index = self.position(peer_id)?;
        if let Some(connection) = connection {
            if self.entries[index].channel.connection_id() != connection {
                return None;
            }
        }
        let entry = self.entries.remove(index);
        entry.channel.close();
        tracing::info!(peer = %peer_id, "Peer removed");
        self.publish();
        Some(entry.info)
    }

    /// Send to every registered peer
    pub fn broadcast(&mut self, message: &PeerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for entry in &mut self.entries {
            match entry.channel.send(message) {
                Ok(()) => {
                    entry.info.messages_sent += 1;
                    report.delivered.push(entry.info.peer_id.clone());
                }
                Err(e) => {
                    entry.info.send_failures += 1;
                    tracing::warn!(peer = %entry.info.peer_id, command = message.command(), "Send failed: {}", e);
                    report.failed.push((entry.info.peer_id.clone(), e));
                }
            }
        }
        report
    }

    pub fn send_to(&mut self, peer_id: &str, message: &PeerMessage) -> Result<(), NetworkError> {
        let index = self
            .position(peer_id)
            .ok_or_else(|| NetworkError::NotConnected(peer_id.to_string()))?;
        let entry = &mut self.entries[index];
        match entry.channel.send(message) {
            Ok(()) => {
                entry.info.messages_sent += 1;
                Ok(())
            }
            Err(e) => {
                entry.info.send_failures += 1;
                Err(e)
            }
        }
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.position(peer_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &PeerHandle> {
        self.entries.iter().map(|e| &e.channel)
    }

    /// Observe the peer list
    pub fn subscribe(&self) -> watch::Receiver<Vec<PeerInfo>> {
        self.peers_tx.subscribe()
    }

    /// Close and drop every connection
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.channel.close();
        }
        self.publish();
    }

    fn position(&self, peer_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.info.peer_id == peer_id)
    }

    fn publish(&self) {
        self.peers_tx.send_replace(self.peers());
    }
}
