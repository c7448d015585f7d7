//! TCP transport for the peer mesh
//!
//! Each connection starts with a hello exchange carrying peer ids, then
//! splits into a writer task fed by an unbounded queue and a reader task
//! forwarding decoded messages to the session.

use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{next_connection_id, ConnectionId, Direction, PeerChannel, PeerEvent, PeerEventSink, PeerId};
use crate::error::NetworkError;
use crate::protocol::{read_frame, write_frame, Hello, PeerMessage, WireFrame};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const LISTEN_BACKLOG: i32 = 128;

/// Write side of one TCP connection
pub struct TcpChannel {
    remote_id: PeerId,
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PeerChannel for TcpChannel {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn send(&self, message: &PeerMessage) -> Result<(), NetworkError> {
        let frame = WireFrame::Message(message.clone())
            .encode()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.tx
            .send(frame)
            .map_err(|_| NetworkError::NotConnected(self.remote_id.clone()))
    }

    fn close(&self) {
        // Writer task drains and shuts the socket once every sender is gone;
        // an empty frame asks it to stop early.
        let _ = self.tx.send(Bytes::new());
    }
}

/// Accepts and dials TCP peer connections
#[derive(Clone)]
pub struct TcpTransport {
    local_id: PeerId,
    events: PeerEventSink,
    nodelay: bool,
}

impl TcpTransport {
    pub fn new(local_id: impl Into<PeerId>, events: PeerEventSink, nodelay: bool) -> Self {
        Self {
            local_id: local_id.into(),
            events,
            nodelay,
        }
    }

    /// Bind a listener with address reuse enabled
    pub fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
        let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{addr}: {e}"));

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

        let listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(listener).map_err(bind_err)
    }

    /// Accept connections until the listener fails
    pub fn serve(&self, listener: TcpListener) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "Incoming peer connection");
                        let transport = transport.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transport.establish(stream, Direction::Incoming).await {
                                tracing::warn!(%addr, "Incoming handshake failed: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        })
    }

    /// Dial a peer; returns its id once the handshake completes
    pub async fn connect(&self, addr: &str) -> Result<PeerId, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{addr}: {e}")))?;
        self.establish(stream, Direction::Outgoing).await
    }

    async fn establish(&self, mut stream: TcpStream, direction: Direction) -> Result<PeerId, NetworkError> {
        if self.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        }

        let remote = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(&mut stream))
            .await
            .map_err(|_| NetworkError::Handshake("timed out".into()))??;
        if remote.peer_id == self.local_id {
            return Err(NetworkError::Handshake("connected to self".into()));
        }

        let connection = next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = std::sync::Arc::new(TcpChannel {
            remote_id: remote.peer_id.clone(),
            connection,
            tx,
        });

        self.events
            .send(PeerEvent::Opened { channel, direction })
            .map_err(|_| NetworkError::ConnectionFailed("session is gone".into()))?;

        let (reader, writer) = stream.into_split();
        tokio::spawn(write_loop(writer, rx, remote.peer_id.clone()));
        tokio::spawn(read_loop(reader, self.events.clone(), remote.peer_id.clone(), connection));

        tracing::info!(peer = %remote.peer_id, ?direction, "Peer connected");
        Ok(remote.peer_id)
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<Hello, NetworkError> {
        let hello = WireFrame::Hello(Hello::new(self.local_id.clone()))
            .encode()
            .map_err(|e| NetworkError::Handshake(e.to_string()))?;
        write_frame(stream, &hello).await?;

        let (kind, body) = read_frame(stream)
            .await?
            .ok_or_else(|| NetworkError::Handshake("closed during handshake".into()))?;
        match WireFrame::decode(kind, &body) {
            Ok(WireFrame::Hello(remote)) if remote.version == crate::protocol::wire::PROTOCOL_VERSION => Ok(remote),
            Ok(WireFrame::Hello(remote)) => Err(NetworkError::Handshake(format!(
                "unsupported protocol version {}",
                remote.version
            ))),
            Ok(_) => Err(NetworkError::Handshake("expected hello".into())),
            Err(e) => Err(NetworkError::Handshake(e.to_string())),
        }
    }
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    peer_id: PeerId,
) {
    while let Some(frame) = rx.recv().await {
        if frame.is_empty() {
            break;
        }
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!(peer = %peer_id, "Write failed: {}", e);
            break;
        }
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut writer).await;
}

async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    events: PeerEventSink,
    peer_id: PeerId,
    connection: ConnectionId,
) {
    loop {
        let (kind, body) = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %peer_id, "Read failed: {}", e);
                break;
            }
        };

        match WireFrame::decode(kind, &body) {
            Ok(WireFrame::Message(message)) => {
                let event = PeerEvent::Message {
                    peer_id: peer_id.clone(),
                    connection,
                    message,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(WireFrame::Hello(_)) => {
                tracing::warn!(peer = %peer_id, "Ignoring repeated hello");
            }
            Err(e) => {
                tracing::warn!(peer = %peer_id, bytes = body.len(), "Dropping message: {}", e);
            }
        }
    }

    tracing::info!(peer = %peer_id, "Peer connection closed");
    let _ = events.send(PeerEvent::Closed { peer_id, connection });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MixerAction;

    #[tokio::test]
    async fn test_tcp_handshake_and_messages() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let server = TcpTransport::new("server", server_tx, true);
        let _accept = server.serve(listener);

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let client = TcpTransport::new("client", client_tx, true);
        let remote = client.connect(&addr.to_string()).await.unwrap();
        assert_eq!(remote, "server");

        let PeerEvent::Opened { channel: to_server, direction } = client_rx.recv().await.unwrap() else {
            panic!("expected open");
        };
        assert_eq!(direction, Direction::Outgoing);

        let PeerEvent::Opened { channel: to_client, direction } = server_rx.recv().await.unwrap() else {
            panic!("expected open");
        };
        assert_eq!(direction, Direction::Incoming);
        assert_eq!(to_client.remote_id(), "client");

        to_server
            .send(&PeerMessage::Action(MixerAction::AddTrack))
            .unwrap();
        to_server
            .send(&PeerMessage::FlacChunk {
                track_id: 1,
                buf: Bytes::from_static(b"fLaC"),
            })
            .unwrap();

        for expected in [
            PeerMessage::Action(MixerAction::AddTrack),
            PeerMessage::FlacChunk {
                track_id: 1,
                buf: Bytes::from_static(b"fLaC"),
            },
        ] {
            match server_rx.recv().await.unwrap() {
                PeerEvent::Message { peer_id, message, .. } => {
                    assert_eq!(peer_id, "client");
                    assert_eq!(message, expected);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        to_server.close();
        match server_rx.recv().await.unwrap() {
            PeerEvent::Closed { peer_id, .. } => assert_eq!(peer_id, "client"),
            other => panic!("unexpected {other:?}"),
        }
        drop(to_client);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = TcpTransport::new("client", tx, false);
        assert!(matches!(
            client.connect(&addr.to_string()).await,
            Err(NetworkError::ConnectionFailed(_))
        ));
    }
}
