//! Command replication
//!
//! Local actions mutate the state, go into the history and are broadcast.
//! Actions from peers mutate and go into the history but are never sent
//! on, which is what keeps the mesh free of echo loops.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::broadcast;

use super::history::ActionHistory;
use super::state::{Applied, MixerState};
use super::{Provenance, SessionEvent};
use crate::error::TrackError;
use crate::network::{BroadcastReport, ConnectionId, Direction, PeerHandle, PeerId, PeerRegistry};
use crate::protocol::{MixerAction, PeerMessage, TrackId, Transport};
use crate::tracks::{seek_fraction, PlaybackEngine, PlaybackStatus, TransportClock};

/// Builds the playback engine for a new track
pub type EngineFactory = Box<dyn Fn(TrackId) -> Box<dyn PlaybackEngine> + Send>;

/// Inbound audio the bus hands back to the codec layer
#[derive(Debug, Clone, PartialEq)]
pub enum AudioMessage {
    Chunk { track_id: TrackId, buf: Bytes },
    End { track_id: TrackId },
}

pub struct ReplicationBus {
    state: MixerState,
    history: ActionHistory,
    registry: PeerRegistry,
    engines: HashMap<TrackId, Box<dyn PlaybackEngine>>,
    engine_factory: EngineFactory,
    events: broadcast::Sender<SessionEvent>,
}

impl ReplicationBus {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            state: MixerState::new(),
            history: ActionHistory::new(),
            registry: PeerRegistry::new(),
            engines: HashMap::new(),
            engine_factory: Box::new(|_| Box::new(TransportClock::new())),
            events,
        }
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    /// Apply a topology action
    pub fn apply(&mut self, action: MixerAction, provenance: &Provenance) -> Result<Applied, TrackError> {
        let applied = self.state.apply(action)?;
        self.history.append(action);

        match applied {
            Applied::Added(id) => {
                self.engines.insert(id, (self.engine_factory)(id));
            }
            Applied::Removed(id) => {
                self.engines.remove(&id);
            }
        }
        tracing::debug!(?action, ?provenance, "Action applied");

        if provenance.is_local() {
            self.broadcast(&PeerMessage::Action(action));
        }
        self.emit_tracks();
        Ok(applied)
    }

    /// Route a transport command to the track's engine
    ///
    /// Not recorded in the history; transport position is not replicated
    /// session state.
    pub fn transport(
        &mut self,
        track_id: TrackId,
        transport: Transport,
        provenance: &Provenance,
    ) -> Result<PlaybackStatus, TrackError> {
        let engine = self
            .engines
            .get_mut(&track_id)
            .ok_or(TrackError::NotFound(track_id))?;

        match transport {
            Transport::Play => engine.play(),
            Transport::Pause => engine.pause(),
            Transport::Stop => engine.stop(),
            Transport::PlayPause => engine.play_pause(),
            Transport::SeekTo { position_seconds } => {
                match seek_fraction(position_seconds, engine.duration()) {
                    Some(fraction) => engine.seek(fraction),
                    None => tracing::debug!(track_id, "Seek ignored, no local media"),
                }
            }
        }
        let status = engine.status();

        if provenance.is_local() {
            self.broadcast(&PeerMessage::Transport { track_id, transport });
        }
        let _ = self.events.send(SessionEvent::Transport { track_id, status });
        Ok(status)
    }

    /// Apply a sync message entry by entry, in order
    pub fn replay(&mut self, entries: Vec<MixerAction>, provenance: &Provenance) -> usize {
        let total = entries.len();
        let applied = entries
            .into_iter()
            .filter(|&entry| match self.apply(entry, provenance) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(?entry, "Skipping sync entry: {}", e);
                    false
                }
            })
            .count();
        tracing::info!(applied, total, ?provenance, "Sync replayed");
        applied
    }

    /// Dispatch one message from a peer
    ///
    /// Audio messages are returned for the caller to hand to a decoder.
    pub fn handle_peer_message(&mut self, peer_id: &str, message: PeerMessage) -> Option<AudioMessage> {
        let from = Provenance::FromPeer(peer_id.to_string());
        match message {
            PeerMessage::Action(action) => {
                if let Err(e) = self.apply(action, &from) {
                    tracing::warn!(peer = %peer_id, ?action, "Dropping action: {}", e);
                }
                None
            }
            PeerMessage::Sync(entries) => {
                self.replay(entries, &from);
                None
            }
            PeerMessage::Transport { track_id, transport } => {
                if let Err(e) = self.transport(track_id, transport, &from) {
                    tracing::warn!(peer = %peer_id, command = transport.command(), "Dropping transport: {}", e);
                }
                None
            }
            PeerMessage::FlacChunk { track_id, buf } => Some(AudioMessage::Chunk { track_id, buf }),
            PeerMessage::RecEnd { track_id } => Some(AudioMessage::End { track_id }),
        }
    }

    /// Register a new connection; the accepting side sends its history once
    pub fn peer_opened(&mut self, channel: PeerHandle, direction: Direction) {
        let peer_id = channel.remote_id().to_string();
        self.registry.register(channel, direction);

        if direction == Direction::Incoming {
            let snapshot = self.history.snapshot();
            let entries = snapshot.len();
            match self.registry.send_to(&peer_id, &PeerMessage::Sync(snapshot)) {
                Ok(()) => tracing::info!(peer = %peer_id, entries, "Sent sync"),
                Err(e) => {
                    tracing::warn!(peer = %peer_id, "Sync send failed: {}", e);
                    self.registry.remove(&peer_id, None);
                }
            }
        }
        self.emit_peers();
    }

    pub fn peer_closed(&mut self, peer_id: &str, connection: ConnectionId) {
        if self.registry.remove(peer_id, Some(connection)).is_some() {
            self.emit_peers();
        }
    }

    /// Broadcast to every peer, dropping peers whose send failed
    pub fn broadcast(&mut self, message: &PeerMessage) -> BroadcastReport {
        let report = self.registry.broadcast(message);
        if !report.is_clean() {
            for (peer_id, _) in &report.failed {
                self.registry.remove(peer_id, None);
            }
            self.emit_peers();
        }
        report
    }

    pub fn state(&self) -> &MixerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MixerState {
        &mut self.state
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PeerRegistry {
        &mut self.registry
    }

    pub fn engine(&self, track_id: TrackId) -> Option<&dyn PlaybackEngine> {
        self.engines.get(&track_id).map(|e| e.as_ref())
    }

    pub fn engine_mut(&mut self, track_id: TrackId) -> Option<&mut (dyn PlaybackEngine + 'static)> {
        self.engines.get_mut(&track_id).map(|e| e.as_mut())
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_tracks(&self) {
        self.emit(SessionEvent::TracksChanged {
            tracks: self.state.tracks().to_vec(),
        });
    }

    fn emit_peers(&self) {
        self.emit(SessionEvent::PeersChanged {
            peers: self.registry.peers(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::{next_connection_id, PeerChannel};
    use crate::tracks::PlaybackState;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        id: String,
        connection: u64,
        sent: Mutex<Vec<PeerMessage>>,
    }

    impl Recorder {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                connection: next_connection_id(),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl PeerChannel for Recorder {
        fn remote_id(&self) -> &str {
            &self.id
        }

        fn connection_id(&self) -> u64 {
            self.connection
        }

        fn send(&self, message: &PeerMessage) -> Result<(), NetworkError> {
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn close(&self) {}
    }

    fn bus() -> ReplicationBus {
        let (events, _) = broadcast::channel(64);
        ReplicationBus::new(events)
    }

    #[test]
    fn test_local_actions_broadcast_and_record() {
        let mut bus = bus();
        let peer = Recorder::new("b");
        bus.peer_opened(peer.clone(), Direction::Outgoing);

        assert_eq!(bus.apply(MixerAction::AddTrack, &Provenance::Local), Ok(Applied::Added(1)));
        assert_eq!(bus.history().len(), 1);
        assert_eq!(
            *peer.sent.lock(),
            vec![PeerMessage::Action(MixerAction::AddTrack)]
        );
    }

    #[test]
    fn test_peer_actions_are_not_rebroadcast() {
        let mut bus = bus();
        let a = Recorder::new("a");
        let c = Recorder::new("c");
        bus.peer_opened(a.clone(), Direction::Outgoing);
        bus.peer_opened(c.clone(), Direction::Outgoing);

        let audio = bus.handle_peer_message("a", PeerMessage::Action(MixerAction::AddTrack));
        assert!(audio.is_none());
        bus.handle_peer_message(
            "a",
            PeerMessage::Transport {
                track_id: 1,
                transport: Transport::Play,
            },
        );

        assert_eq!(bus.state().track_ids(), vec![1]);
        assert_eq!(bus.history().len(), 1);
        assert!(a.sent.lock().is_empty());
        assert!(c.sent.lock().is_empty());
        assert_eq!(bus.engine(1).unwrap().state(), PlaybackState::Playing);
    }

    #[test]
    fn test_incoming_connection_gets_one_sync() {
        let mut bus = bus();
        bus.apply(MixerAction::AddTrack, &Provenance::Local).unwrap();
        bus.apply(MixerAction::AddTrack, &Provenance::Local).unwrap();
        bus.apply(MixerAction::RemoveTrack { id: 1 }, &Provenance::Local).unwrap();

        let dialer = Recorder::new("late");
        bus.peer_opened(dialer.clone(), Direction::Incoming);
        assert_eq!(
            *dialer.sent.lock(),
            vec![PeerMessage::Sync(vec![
                MixerAction::AddTrack,
                MixerAction::AddTrack,
                MixerAction::RemoveTrack { id: 1 }
            ])]
        );

        let dialed = Recorder::new("other");
        bus.peer_opened(dialed.clone(), Direction::Outgoing);
        assert!(dialed.sent.lock().is_empty());
    }

    #[test]
    fn test_sync_replay_converges() {
        let mut source = bus();
        for action in [
            MixerAction::AddTrack,
            MixerAction::AddTrack,
            MixerAction::AddTrack,
            MixerAction::RemoveTrack { id: 2 },
        ] {
            source.apply(action, &Provenance::Local).unwrap();
        }

        let mut joiner = bus();
        joiner.handle_peer_message("src", PeerMessage::Sync(source.history().snapshot()));
        assert_eq!(joiner.state().track_ids(), source.state().track_ids());
        assert_eq!(joiner.history().entries(), source.history().entries());
    }

    #[test]
    fn test_seek_converts_seconds_to_local_fraction() {
        let mut bus = bus();
        bus.apply(MixerAction::AddTrack, &Provenance::Local).unwrap();
        bus.engine_mut(1).unwrap().extend(8.0);

        let status = bus
            .transport(
                1,
                Transport::SeekTo {
                    position_seconds: 2.0,
                },
                &Provenance::FromPeer("a".into()),
            )
            .unwrap();
        assert_eq!(status.position_seconds, 2.0);
        assert_eq!(
            bus.transport(7, Transport::Play, &Provenance::Local),
            Err(TrackError::NotFound(7))
        );
    }

    #[test]
    fn test_audio_messages_are_handed_back() {
        let mut bus = bus();
        let chunk = bus.handle_peer_message(
            "a",
            PeerMessage::FlacChunk {
                track_id: 3,
                buf: Bytes::from_static(b"x"),
            },
        );
        assert_eq!(
            chunk,
            Some(AudioMessage::Chunk {
                track_id: 3,
                buf: Bytes::from_static(b"x")
            })
        );
        assert_eq!(
            bus.handle_peer_message("a", PeerMessage::RecEnd { track_id: 3 }),
            Some(AudioMessage::End { track_id: 3 })
        );
        assert!(bus.history().is_empty());
    }
}
