//! Length-prefixed framing for peer streams
//!
//! ```text
//! +------+-------------+------------------+
//! | kind | length (BE) | body             |
//! | u8   | u32         | `length` bytes   |
//! +------+-------------+------------------+
//! ```
//!
//! Hello and control frames carry JSON; audio frames carry a bincode
//! `AudioPacket` so compressed chunks are not inflated into number arrays.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::{PeerMessage, RawMessage, TrackId};
use crate::constants::MAX_FRAME_SIZE;
use crate::error::{NetworkError, ProtocolError};

pub const FRAME_HEADER_LEN: usize = 5;

/// Bumped on incompatible wire changes
pub const PROTOCOL_VERSION: u16 = 1;

const KIND_HELLO: u8 = 0x01;
const KIND_CONTROL: u8 = 0x02;
const KIND_AUDIO: u8 = 0x03;

/// First frame on every connection, in both directions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub peer_id: String,
    pub version: u16,
}

impl Hello {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Binary body of an audio frame
#[derive(Debug, Serialize, Deserialize)]
struct AudioPacket {
    track_id: TrackId,
    data: Vec<u8>,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Hello(Hello),
    Message(PeerMessage),
}

impl WireFrame {
    /// Serialize with the frame header
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let (kind, body) = match self {
            WireFrame::Hello(hello) => (KIND_HELLO, json_body(hello)?),
            WireFrame::Message(PeerMessage::FlacChunk { track_id, buf }) => {
                let packet = AudioPacket {
                    track_id: *track_id,
                    data: buf.to_vec(),
                };
                let body = bincode::serialize(&packet)
                    .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
                (KIND_AUDIO, body)
            }
            WireFrame::Message(message) => (KIND_CONTROL, json_body(&RawMessage::from(message))?),
        };

        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "body of {} bytes exceeds limit",
                body.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        buf.put_u8(kind);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Parse a frame body; failures drop this frame only
    pub fn decode(kind: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        match kind {
            KIND_HELLO => serde_json::from_slice(body)
                .map(WireFrame::Hello)
                .map_err(|e| ProtocolError::InvalidFrame(format!("hello: {e}"))),
            KIND_CONTROL => {
                let raw: RawMessage = serde_json::from_slice(body)
                    .map_err(|e| ProtocolError::InvalidFrame(format!("control: {e}")))?;
                Ok(WireFrame::Message(PeerMessage::try_from(raw)?))
            }
            KIND_AUDIO => {
                let packet: AudioPacket = bincode::deserialize(body)
                    .map_err(|e| ProtocolError::InvalidFrame(format!("audio: {e}")))?;
                Ok(WireFrame::Message(PeerMessage::FlacChunk {
                    track_id: packet.track_id,
                    buf: Bytes::from(packet.data),
                }))
            }
            other => Err(ProtocolError::InvalidFrame(format!("unknown frame kind {other:#04x}"))),
        }
    }
}

fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
}

/// Read one raw frame; `Ok(None)` on a clean close between frames
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(u8, Bytes)>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
    }

    let kind = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
    Ok(Some((kind, Bytes::from(body))))
}

/// Write an already encoded frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{MixerAction, Transport};

    async fn through_pipe(frame: &WireFrame) -> WireFrame {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        let bytes = frame.encode().unwrap();
        write_frame(&mut a, &bytes).await.unwrap();
        let (kind, body) = read_frame(&mut b).await.unwrap().unwrap();
        WireFrame::decode(kind, &body).unwrap()
    }

    #[tokio::test]
    async fn test_control_and_hello_frames() {
        let hello = WireFrame::Hello(Hello::new("peer-a"));
        assert_eq!(through_pipe(&hello).await, hello);

        let sync = WireFrame::Message(PeerMessage::Sync(vec![
            MixerAction::AddTrack,
            MixerAction::RemoveTrack { id: 1 },
        ]));
        assert_eq!(through_pipe(&sync).await, sync);

        let seek = WireFrame::Message(PeerMessage::Transport {
            track_id: 2,
            transport: Transport::SeekTo {
                position_seconds: 0.25,
            },
        });
        assert_eq!(through_pipe(&seek).await, seek);
    }

    #[test]
    fn test_audio_frame_is_binary() {
        let chunk = WireFrame::Message(PeerMessage::FlacChunk {
            track_id: 9,
            buf: Bytes::from(vec![0xAB; 1000]),
        });
        let bytes = chunk.encode().unwrap();
        assert_eq!(bytes[0], KIND_AUDIO);
        // track id + length prefix + payload, no JSON expansion
        assert!(bytes.len() < FRAME_HEADER_LEN + 1000 + 16);
        let decoded = WireFrame::decode(bytes[0], &bytes[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[tokio::test]
    async fn test_clean_eof_and_oversized_frame() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), None);

        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = vec![KIND_CONTROL];
        header.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        write_frame(&mut a, &header).await.unwrap();
        assert_eq!(
            read_frame(&mut b).await,
            Err(NetworkError::FrameTooLarge(MAX_FRAME_SIZE + 1))
        );
    }

    #[test]
    fn test_bad_frames_are_protocol_errors() {
        assert!(matches!(
            WireFrame::decode(0x7F, b"{}"),
            Err(ProtocolError::InvalidFrame(_))
        ));
        assert_eq!(
            WireFrame::decode(KIND_CONTROL, br#"{"command":"eval","payload":"x"}"#),
            Err(ProtocolError::UnknownCommand("eval".into()))
        );
    }
}
