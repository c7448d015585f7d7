//! Peer messages and the replicated action log entries
//!
//! Everything on the wire has the `{command, payload}` shape. Inbound
//! messages are parsed into `RawMessage` first and then matched against the
//! closed set of known commands; anything else is rejected with
//! `ProtocolError::UnknownCommand`.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Session-local track identifier
pub type TrackId = u32;

pub mod commands {
    pub const ADD_TRACK: &str = "addTrack";
    pub const REMOVE_TRACK: &str = "removeTrack";
    pub const SYNC: &str = "sync";
    pub const PLAY: &str = "play";
    pub const PAUSE: &str = "pause";
    pub const STOP: &str = "stop";
    pub const PLAY_PAUSE: &str = "playPause";
    pub const SEEK_TO: &str = "seekTo";
    pub const FLAC_CHUNK: &str = "flac-chunk";
    pub const REC_END: &str = "rec-end";
}

/// Untyped `{command, payload}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawMessage {
    pub fn new(command: &str, payload: Value) -> Self {
        Self {
            command: command.to_string(),
            payload,
        }
    }

    fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ProtocolError::malformed(&self.command, e))
    }
}

/// A replicable change to the track topology; one History Log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum MixerAction {
    AddTrack,
    RemoveTrack { id: TrackId },
}

impl MixerAction {
    pub fn command(&self) -> &'static str {
        match self {
            Self::AddTrack => commands::ADD_TRACK,
            Self::RemoveTrack { .. } => commands::REMOVE_TRACK,
        }
    }
}

/// Playback control routed to one track's engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transport {
    Play,
    Pause,
    Stop,
    PlayPause,
    SeekTo { position_seconds: f64 },
}

impl Transport {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Play => commands::PLAY,
            Self::Pause => commands::PAUSE,
            Self::Stop => commands::STOP,
            Self::PlayPause => commands::PLAY_PAUSE,
            Self::SeekTo { .. } => commands::SEEK_TO,
        }
    }
}

/// Everything one peer can send another
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    Action(MixerAction),
    Sync(Vec<MixerAction>),
    Transport { track_id: TrackId, transport: Transport },
    FlacChunk { track_id: TrackId, buf: Bytes },
    RecEnd { track_id: TrackId },
}

impl PeerMessage {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Action(action) => action.command(),
            Self::Sync(_) => commands::SYNC,
            Self::Transport { transport, .. } => transport.command(),
            Self::FlacChunk { .. } => commands::FLAC_CHUNK,
            Self::RecEnd { .. } => commands::REC_END,
        }
    }

    /// Whether this travels as binary audio rather than JSON control
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::FlacChunk { .. })
    }
}

#[derive(Serialize, Deserialize)]
struct IdPayload {
    id: TrackId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackPayload {
    track_id: TrackId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeekPayload {
    track_id: TrackId,
    position_seconds: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkPayload {
    track_id: TrackId,
    buf: Vec<u8>,
}

fn to_value<T: Serialize>(payload: T) -> Value {
    // Plain structs of numbers and byte vectors always serialize
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

impl From<MixerAction> for RawMessage {
    fn from(action: MixerAction) -> Self {
        match action {
            MixerAction::AddTrack => RawMessage::new(commands::ADD_TRACK, Value::Null),
            MixerAction::RemoveTrack { id } => {
                RawMessage::new(commands::REMOVE_TRACK, to_value(IdPayload { id }))
            }
        }
    }
}

impl TryFrom<RawMessage> for MixerAction {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.command.as_str() {
            commands::ADD_TRACK => Ok(Self::AddTrack),
            commands::REMOVE_TRACK => {
                let IdPayload { id } = raw.payload_as()?;
                Ok(Self::RemoveTrack { id })
            }
            _ => Err(ProtocolError::UnknownCommand(raw.command)),
        }
    }
}

impl From<&PeerMessage> for RawMessage {
    fn from(message: &PeerMessage) -> Self {
        let command = message.command();
        match message {
            PeerMessage::Action(action) => RawMessage::from(*action),
            PeerMessage::Sync(entries) => {
                let entries: Vec<RawMessage> = entries.iter().copied().map(RawMessage::from).collect();
                RawMessage::new(command, to_value(entries))
            }
            PeerMessage::Transport {
                track_id,
                transport: Transport::SeekTo { position_seconds },
            } => RawMessage::new(
                command,
                to_value(SeekPayload {
                    track_id: *track_id,
                    position_seconds: *position_seconds,
                }),
            ),
            PeerMessage::Transport { track_id, .. } | PeerMessage::RecEnd { track_id } => {
                RawMessage::new(command, to_value(TrackPayload { track_id: *track_id }))
            }
            PeerMessage::FlacChunk { track_id, buf } => RawMessage::new(
                command,
                to_value(ChunkPayload {
                    track_id: *track_id,
                    buf: buf.to_vec(),
                }),
            ),
        }
    }
}

impl TryFrom<RawMessage> for PeerMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let routed = |raw: &RawMessage, transport: Transport| -> Result<Self, ProtocolError> {
            let TrackPayload { track_id } = raw.payload_as()?;
            Ok(Self::Transport { track_id, transport })
        };

        match raw.command.as_str() {
            commands::ADD_TRACK | commands::REMOVE_TRACK => Ok(Self::Action(raw.try_into()?)),
            commands::SYNC => {
                let entries: Vec<RawMessage> = raw.payload_as()?;
                let actions = entries
                    .into_iter()
                    .map(MixerAction::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Sync(actions))
            }
            commands::PLAY => routed(&raw, Transport::Play),
            commands::PAUSE => routed(&raw, Transport::Pause),
            commands::STOP => routed(&raw, Transport::Stop),
            commands::PLAY_PAUSE => routed(&raw, Transport::PlayPause),
            commands::SEEK_TO => {
                let SeekPayload {
                    track_id,
                    position_seconds,
                } = raw.payload_as()?;
                if !position_seconds.is_finite() || position_seconds < 0.0 {
                    return Err(ProtocolError::malformed(
                        commands::SEEK_TO,
                        format!("invalid position {position_seconds}"),
                    ));
                }
                Ok(Self::Transport {
                    track_id,
                    transport: Transport::SeekTo { position_seconds },
                })
            }
            commands::FLAC_CHUNK => {
                let ChunkPayload { track_id, buf } = raw.payload_as()?;
                Ok(Self::FlacChunk {
                    track_id,
                    buf: Bytes::from(buf),
                })
            }
            commands::REC_END => {
                let TrackPayload { track_id } = raw.payload_as()?;
                Ok(Self::RecEnd { track_id })
            }
            _ => Err(ProtocolError::UnknownCommand(raw.command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<PeerMessage, ProtocolError> {
        let raw: RawMessage = serde_json::from_value(value).unwrap();
        PeerMessage::try_from(raw)
    }

    #[test]
    fn test_add_track_wire_shape() {
        let raw = RawMessage::from(&PeerMessage::Action(MixerAction::AddTrack));
        assert_eq!(
            serde_json::to_value(&raw).unwrap(),
            json!({"command": "addTrack", "payload": null})
        );
        // payload may be omitted entirely
        assert_eq!(
            parse(json!({"command": "addTrack"})).unwrap(),
            PeerMessage::Action(MixerAction::AddTrack)
        );
    }

    #[test]
    fn test_history_entry_serializes_as_envelope() {
        let entries = vec![MixerAction::AddTrack, MixerAction::RemoveTrack { id: 3 }];
        let value = serde_json::to_value(&entries).unwrap();
        assert_eq!(
            value,
            json!([
                {"command": "addTrack", "payload": null},
                {"command": "removeTrack", "payload": {"id": 3}}
            ])
        );
        let back: Vec<MixerAction> = serde_json::from_value(value).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn test_sync_payload() {
        let message = parse(json!({
            "command": "sync",
            "payload": [
                {"command": "addTrack", "payload": null},
                {"command": "addTrack", "payload": null},
                {"command": "removeTrack", "payload": {"id": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(
            message,
            PeerMessage::Sync(vec![
                MixerAction::AddTrack,
                MixerAction::AddTrack,
                MixerAction::RemoveTrack { id: 1 }
            ])
        );
    }

    #[test]
    fn test_transport_payloads() {
        assert_eq!(
            parse(json!({"command": "playPause", "payload": {"trackId": 2}})).unwrap(),
            PeerMessage::Transport {
                track_id: 2,
                transport: Transport::PlayPause
            }
        );
        let seek = PeerMessage::Transport {
            track_id: 4,
            transport: Transport::SeekTo {
                position_seconds: 1.5,
            },
        };
        let raw = RawMessage::from(&seek);
        assert_eq!(raw.payload, json!({"trackId": 4, "positionSeconds": 1.5}));
        assert_eq!(PeerMessage::try_from(raw).unwrap(), seek);
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert_eq!(
            parse(json!({"command": "__proto__", "payload": null})),
            Err(ProtocolError::UnknownCommand("__proto__".into()))
        );
        // Sync entries are held to the same closed set
        assert_eq!(
            parse(json!({"command": "sync", "payload": [{"command": "play", "payload": {"trackId": 1}}]})),
            Err(ProtocolError::UnknownCommand("play".into()))
        );
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(matches!(
            parse(json!({"command": "removeTrack", "payload": null})),
            Err(ProtocolError::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse(json!({"command": "seekTo", "payload": {"trackId": 1, "positionSeconds": -2.0}})),
            Err(ProtocolError::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse(json!({"command": "play", "payload": {"id": 1}})),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_flac_chunk_json_fallback() {
        let chunk = PeerMessage::FlacChunk {
            track_id: 7,
            buf: Bytes::from_static(&[0x66, 0x4C, 0x61, 0x43]),
        };
        let raw = RawMessage::from(&chunk);
        assert_eq!(raw.payload, json!({"trackId": 7, "buf": [102, 76, 97, 67]}));
        assert_eq!(PeerMessage::try_from(raw).unwrap(), chunk);
        assert!(chunk.is_audio());
    }
}
