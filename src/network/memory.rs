//! In-process transport linking two sessions directly

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{next_connection_id, ConnectionId, Direction, PeerChannel, PeerEvent, PeerEventSink, PeerId};
use crate::error::NetworkError;
use crate::protocol::PeerMessage;

/// One direction of an in-memory link
pub struct MemoryChannel {
    local_id: PeerId,
    remote_id: PeerId,
    connection: ConnectionId,
    remote_connection: ConnectionId,
    remote: PeerEventSink,
    local: PeerEventSink,
    closed: Arc<AtomicBool>,
}

impl PeerChannel for MemoryChannel {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn send(&self, message: &PeerMessage) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::NotConnected(self.remote_id.clone()));
        }
        self.remote
            .send(PeerEvent::Message {
                peer_id: self.local_id.clone(),
                connection: self.remote_connection,
                message: message.clone(),
            })
            .map_err(|_| NetworkError::SendFailed(format!("{} is gone", self.remote_id)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.local.send(PeerEvent::Closed {
            peer_id: self.remote_id.clone(),
            connection: self.connection,
        });
        let _ = self.remote.send(PeerEvent::Closed {
            peer_id: self.local_id.clone(),
            connection: self.remote_connection,
        });
    }
}

/// Connect `dialer` to `acceptor`
///
/// The dialer sees an outgoing connection, the acceptor an incoming one.
/// Both are reported before either side can send.
pub fn link(dialer_id: &str, dialer: &PeerEventSink, acceptor_id: &str, acceptor: &PeerEventSink) -> Result<(), NetworkError> {
    let closed = Arc::new(AtomicBool::new(false));
    let dialer_connection = next_connection_id();
    let acceptor_connection = next_connection_id();

    let to_acceptor = Arc::new(MemoryChannel {
        local_id: dialer_id.to_string(),
        remote_id: acceptor_id.to_string(),
        connection: dialer_connection,
        remote_connection: acceptor_connection,
        remote: acceptor.clone(),
        local: dialer.clone(),
        closed: closed.clone(),
    });
    let to_dialer = Arc::new(MemoryChannel {
        local_id: acceptor_id.to_string(),
        remote_id: dialer_id.to_string(),
        connection: acceptor_connection,
        remote_connection: dialer_connection,
        remote: dialer.clone(),
        local: acceptor.clone(),
        closed,
    });

    let gone = |id: &str| NetworkError::ConnectionFailed(format!("{id} is not running"));
    dialer
        .send(PeerEvent::Opened {
            channel: to_acceptor,
            direction: Direction::Outgoing,
        })
        .map_err(|_| gone(dialer_id))?;
    acceptor
        .send(PeerEvent::Opened {
            channel: to_dialer,
            direction: Direction::Incoming,
        })
        .map_err(|_| gone(acceptor_id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MixerAction;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_link_delivers_and_closes() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        link("a", &a_tx, "b", &b_tx).unwrap();

        let PeerEvent::Opened { channel: a_to_b, direction } = a_rx.recv().await.unwrap() else {
            panic!("expected open on dialer");
        };
        assert_eq!(direction, Direction::Outgoing);
        assert_eq!(a_to_b.remote_id(), "b");

        let PeerEvent::Opened { channel: b_to_a, direction } = b_rx.recv().await.unwrap() else {
            panic!("expected open on acceptor");
        };
        assert_eq!(direction, Direction::Incoming);

        a_to_b.send(&PeerMessage::Action(MixerAction::AddTrack)).unwrap();
        match b_rx.recv().await.unwrap() {
            PeerEvent::Message {
                peer_id,
                connection,
                message,
            } => {
                assert_eq!(peer_id, "a");
                assert_eq!(connection, b_to_a.connection_id());
                assert_eq!(message, PeerMessage::Action(MixerAction::AddTrack));
            }
            other => panic!("unexpected {other:?}"),
        }

        b_to_a.close();
        assert!(matches!(a_rx.recv().await.unwrap(), PeerEvent::Closed { .. }));
        assert!(matches!(b_rx.recv().await.unwrap(), PeerEvent::Closed { .. }));
        assert!(a_to_b.send(&PeerMessage::RecEnd { track_id: 1 }).is_err());
    }
}
