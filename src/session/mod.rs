//! Mixing session
//!
//! One `SessionActor` task owns the mixer state, history, peer registry,
//! playback engines and codec sessions. Everything else goes through a
//! `SessionHandle`.

pub mod actor;
pub mod bus;
pub mod history;
pub mod state;

use serde::Serialize;

use crate::network::{PeerId, PeerInfo};
use crate::protocol::TrackId;
use crate::tracks::PlaybackStatus;

pub use actor::{SessionActor, SessionHandle, SessionOptions, SessionStatus, TrackView};
pub use bus::ReplicationBus;
pub use history::ActionHistory;
pub use state::{Applied, MasterBus, MixerState, Track};

/// Where a mutating call came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Originated here; broadcast to peers
    Local,
    /// Received from a peer; never rebroadcast
    FromPeer(PeerId),
}

impl Provenance {
    pub fn is_local(&self) -> bool {
        matches!(self, Provenance::Local)
    }
}

/// Notifications for session observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    TracksChanged {
        tracks: Vec<Track>,
    },
    PeersChanged {
        peers: Vec<PeerInfo>,
    },
    Transport {
        #[serde(rename = "trackId")]
        track_id: TrackId,
        status: PlaybackStatus,
    },
    Recording {
        #[serde(rename = "trackId")]
        track_id: TrackId,
        recording: bool,
    },
    MeterLevel {
        db: f32,
    },
    CodecFailed {
        #[serde(rename = "trackId")]
        track_id: TrackId,
        error: String,
    },
}
