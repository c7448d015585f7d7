//! Session actor and its handle
//!
//! The actor is the single writer for everything session-scoped. Callers,
//! transports and codec workers all reach it through channels; it never
//! blocks on any of them.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use super::bus::{AudioMessage, EngineFactory, ReplicationBus};
use super::{Provenance, SessionEvent, Track};
use crate::audio::{CaptureHandle, CaptureSource};
use crate::codec::decoder::DecoderEventSink;
use crate::codec::encoder::EncoderEventSink;
use crate::codec::{CodecSessionId, DecodedBlock, DecoderEvent, DecoderHandle, EncoderEvent, EncoderHandle};
use crate::config::EncoderConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{CodecError, Error, ExportError, Result, TrackError};
use crate::export::{ExporterHandle, WavFormat};
use crate::network::{PeerEvent, PeerEventSink, PeerId, PeerInfo};
use crate::protocol::{MixerAction, PeerMessage, TrackId, Transport};
use crate::tracks::PlaybackStatus;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Settings for a new session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub peer_id: PeerId,
    pub codec: EncoderConfig,
}

impl SessionOptions {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            codec: EncoderConfig::default(),
        }
    }
}

/// Overview returned by `status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub peer_id: PeerId,
    pub tracks: usize,
    pub peers: usize,
    pub history_len: usize,
    pub recording: Vec<TrackId>,
    pub meter_level: f32,
}

/// A track with its playback and decoded-audio state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackView {
    #[serde(flatten)]
    pub track: Track,
    pub playback: Option<PlaybackStatus>,
    pub decoded_seconds: f64,
}

/// Snapshot of a decoder buffer on its way to the exporter
struct ExportJob {
    snapshot: oneshot::Receiver<Vec<DecodedBlock>>,
}

enum SessionCommand {
    AddTrack(Reply<TrackId>),
    RemoveTrack(TrackId, Reply<()>),
    Transport(TrackId, Transport, Reply<PlaybackStatus>),
    Tracks(Reply<Vec<TrackView>>),
    History(Reply<Vec<MixerAction>>),
    Peers(Reply<Vec<PeerInfo>>),
    Status(Reply<SessionStatus>),
    StartRecording(TrackId, Box<dyn CaptureSource>, Reply<CodecSessionId>),
    StopRecording(TrackId, Reply<()>),
    Export(TrackId, Reply<ExportJob>),
    Meter(f32),
    CaptureStopped(TrackId, std::result::Result<(), CodecError>),
    Shutdown(oneshot::Sender<()>),
}

/// A local recording in progress
struct Recording {
    encoder: EncoderHandle,
    /// Held until the encoder is ready
    source: Option<Box<dyn CaptureSource>>,
    capture: Option<CaptureHandle>,
    stopping: bool,
    waiters: Vec<Reply<()>>,
}

/// One decode session fed by local or remote chunks
struct DecoderLink {
    handle: DecoderHandle,
    ready: bool,
    pending: Vec<Bytes>,
    ended: bool,
    decoded_seconds: f64,
    exports: Vec<Reply<ExportJob>>,
}

impl DecoderLink {
    fn snapshot_job(&self) -> Result<ExportJob> {
        Ok(ExportJob {
            snapshot: self.handle.request_snapshot()?,
        })
    }
}

/// Owner of all session state
pub struct SessionActor {
    options: SessionOptions,
    bus: ReplicationBus,
    exporter: ExporterHandle,
    commands: mpsc::UnboundedSender<SessionCommand>,
    encoder_events: EncoderEventSink,
    decoder_events: DecoderEventSink,
    recordings: HashMap<TrackId, Recording>,
    decoders: HashMap<TrackId, DecoderLink>,
    codec_tracks: HashMap<CodecSessionId, TrackId>,
}

impl SessionActor {
    /// Start a session on the current tokio runtime
    pub fn spawn(options: SessionOptions) -> Result<SessionHandle> {
        Self::spawn_with_engines(options, None)
    }

    pub fn spawn_with_engines(options: SessionOptions, engines: Option<EngineFactory>) -> Result<SessionHandle> {
        options.codec.validate()?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (enc_tx, enc_rx) = mpsc::unbounded_channel();
        let (dec_tx, dec_rx) = mpsc::unbounded_channel();

        let mut bus = ReplicationBus::new(events_tx.clone());
        if let Some(factory) = engines {
            bus = bus.with_engine_factory(factory);
        }

        let actor = SessionActor {
            options: options.clone(),
            bus,
            exporter: ExporterHandle::spawn()?,
            commands: cmd_tx.clone(),
            encoder_events: enc_tx,
            decoder_events: dec_tx,
            recordings: HashMap::new(),
            decoders: HashMap::new(),
            codec_tracks: HashMap::new(),
        };

        let exporter = actor.exporter.clone();
        tokio::spawn(actor.run(cmd_rx, peer_rx, enc_rx, dec_rx));
        tracing::info!(peer = %options.peer_id, "Session started");

        Ok(SessionHandle {
            peer_id: options.peer_id,
            commands: cmd_tx,
            peers: peer_tx,
            events: events_tx,
            exporter,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut peers: mpsc::UnboundedReceiver<PeerEvent>,
        mut encoders: mpsc::UnboundedReceiver<(CodecSessionId, EncoderEvent)>,
        mut decoders: mpsc::UnboundedReceiver<(CodecSessionId, DecoderEvent)>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = peers.recv() => self.handle_peer_event(event),
                Some((id, event)) = encoders.recv() => self.handle_encoder_event(id, event),
                Some((id, event)) = decoders.recv() => self.handle_decoder_event(id, event),
            }
        }
        tracing::info!(peer = %self.options.peer_id, "Session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AddTrack(reply) => {
                let result = self
                    .bus
                    .apply(MixerAction::AddTrack, &Provenance::Local)
                    .map(|applied| match applied {
                        super::Applied::Added(id) => id,
                        super::Applied::Removed(id) => id,
                    })
                    .map_err(Error::from);
                let _ = reply.send(result);
            }
            SessionCommand::RemoveTrack(id, reply) => {
                let result = self
                    .bus
                    .apply(MixerAction::RemoveTrack { id }, &Provenance::Local)
                    .map(|_| ())
                    .map_err(Error::from);
                self.reconcile_audio();
                let _ = reply.send(result);
            }
            SessionCommand::Transport(id, transport, reply) => {
                let result = self.bus.transport(id, transport, &Provenance::Local).map_err(Error::from);
                let _ = reply.send(result);
            }
            SessionCommand::Tracks(reply) => {
                let _ = reply.send(Ok(self.track_views()));
            }
            SessionCommand::History(reply) => {
                let _ = reply.send(Ok(self.bus.history().snapshot()));
            }
            SessionCommand::Peers(reply) => {
                let _ = reply.send(Ok(self.bus.registry().peers()));
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            SessionCommand::StartRecording(id, source, reply) => {
                let _ = reply.send(self.start_recording(id, source));
            }
            SessionCommand::StopRecording(id, reply) => self.stop_recording(id, reply),
            SessionCommand::Export(id, reply) => self.export(id, reply),
            SessionCommand::Meter(db) => {
                self.bus.state_mut().master.meter_level = db;
                self.bus.emit(SessionEvent::MeterLevel { db });
            }
            SessionCommand::CaptureStopped(id, result) => self.capture_stopped(id, result),
            SessionCommand::Shutdown(_) => {}
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Opened { channel, direction } => self.bus.peer_opened(channel, direction),
            PeerEvent::Closed { peer_id, connection } => self.bus.peer_closed(&peer_id, connection),
            PeerEvent::Message {
                peer_id, message, ..
            } => {
                tracing::debug!(peer = %peer_id, command = message.command(), "Peer message");
                match self.bus.handle_peer_message(&peer_id, message) {
                    Some(AudioMessage::Chunk { track_id, buf }) => self.remote_chunk(&peer_id, track_id, buf),
                    Some(AudioMessage::End { track_id }) => self.end_stream(track_id),
                    None => self.reconcile_audio(),
                }
            }
        }
    }

    fn start_recording(&mut self, id: TrackId, source: Box<dyn CaptureSource>) -> Result<CodecSessionId> {
        let track = self.bus.state_mut().track_mut(id)?;
        if track.recording || self.recordings.contains_key(&id) {
            return Err(TrackError::AlreadyRecording(id).into());
        }

        let session_id = Uuid::new_v4();
        let mut config = self.options.codec;
        config.sample_rate = source.sample_rate();
        config.channels = source.channels();
        config.validate()?;

        let encoder = EncoderHandle::spawn(session_id, self.encoder_events.clone())?;
        encoder.init(Some(config.to_overrides()))?;

        track.recording = true;
        track.capture = Some(source.name().to_string());
        track.codec_session_id = Some(session_id);

        // A new local take replaces whatever was decoded for this track
        if let Some(old) = self.decoders.remove(&id) {
            let _ = old.handle.finish();
            self.codec_tracks.remove(&old.handle.id());
        }
        self.codec_tracks.insert(session_id, id);
        self.recordings.insert(
            id,
            Recording {
                encoder,
                source: Some(source),
                capture: None,
                stopping: false,
                waiters: Vec::new(),
            },
        );

        tracing::info!(track_id = id, session = %session_id, "Recording requested");
        self.bus.emit_tracks();
        self.bus.emit(SessionEvent::Recording {
            track_id: id,
            recording: true,
        });
        Ok(session_id)
    }

    fn stop_recording(&mut self, id: TrackId, reply: Reply<()>) {
        let Some(recording) = self.recordings.get_mut(&id) else {
            let _ = reply.send(Err(TrackError::NotRecording(id).into()));
            return;
        };
        recording.waiters.push(reply);
        if recording.stopping {
            return;
        }
        recording.stopping = true;
        // Never started capturing; nothing to drain
        recording.source = None;

        match recording.capture.take() {
            Some(mut capture) => {
                let commands = self.commands.clone();
                tokio::task::spawn_blocking(move || {
                    let result = capture.stop().map(|_| ());
                    let _ = commands.send(SessionCommand::CaptureStopped(id, result));
                });
            }
            None => self.capture_stopped(id, Ok(())),
        }
    }

    fn capture_stopped(&mut self, id: TrackId, result: std::result::Result<(), CodecError>) {
        if let Err(e) = result {
            tracing::warn!(track_id = id, "Capture ended with error: {}", e);
        }
        let Some(recording) = self.recordings.get_mut(&id) else {
            return;
        };
        if let Err(e) = recording.encoder.finish() {
            self.recording_failed(id, e);
        }
    }

    fn recording_failed(&mut self, id: TrackId, error: CodecError) {
        tracing::error!(track_id = id, "Recording failed: {}", error);
        if let Some(recording) = self.recordings.remove(&id) {
            self.codec_tracks.remove(&recording.encoder.id());
            for waiter in recording.waiters {
                let _ = waiter.send(Err(error.clone().into()));
            }
        }
        self.clear_recording_flag(id);
        self.bus.emit(SessionEvent::CodecFailed {
            track_id: id,
            error: error.to_string(),
        });
    }

    fn clear_recording_flag(&mut self, id: TrackId) {
        if let Ok(track) = self.bus.state_mut().track_mut(id) {
            track.recording = false;
            track.capture = None;
        }
        self.bus.emit_tracks();
        self.bus.emit(SessionEvent::Recording {
            track_id: id,
            recording: false,
        });
    }

    fn handle_encoder_event(&mut self, session: CodecSessionId, event: EncoderEvent) {
        let Some(&id) = self.codec_tracks.get(&session) else {
            return;
        };
        match event {
            EncoderEvent::Ready => self.encoder_ready(id),
            EncoderEvent::FlacChunk(buf) => {
                self.bus.broadcast(&PeerMessage::FlacChunk {
                    track_id: id,
                    buf: buf.clone(),
                });
                self.feed_decoder(id, buf);
            }
            EncoderEvent::End => {
                self.codec_tracks.remove(&session);
                self.bus.broadcast(&PeerMessage::RecEnd { track_id: id });
                self.end_stream(id);
                if let Some(recording) = self.recordings.remove(&id) {
                    for waiter in recording.waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
                self.clear_recording_flag(id);
                tracing::info!(track_id = id, "Recording finished");
            }
            EncoderEvent::Failed(e) => {
                self.codec_tracks.remove(&session);
                self.recording_failed(id, e);
            }
        }
    }

    fn encoder_ready(&mut self, id: TrackId) {
        let Some(recording) = self.recordings.get_mut(&id) else {
            return;
        };
        let Some(source) = recording.source.take() else {
            return;
        };

        let commands = self.commands.clone();
        let meter = Box::new(move |db: f32| {
            let _ = commands.send(SessionCommand::Meter(db));
        });
        match CaptureHandle::start(source, recording.encoder.input(), meter) {
            Ok(capture) => recording.capture = Some(capture),
            Err(e) => self.recording_failed(id, CodecError::EncoderInit(e.to_string())),
        }
    }

    fn remote_chunk(&mut self, peer_id: &str, id: TrackId, buf: Bytes) {
        if self.bus.state().track(id).is_none() {
            tracing::warn!(peer = %peer_id, track_id = id, "Chunk for unknown track dropped");
            return;
        }
        if self.recordings.contains_key(&id) {
            tracing::warn!(peer = %peer_id, track_id = id, "Chunk for a locally recording track dropped");
            return;
        }
        self.feed_decoder(id, buf);
    }

    /// Queue a chunk on the track's decoder, opening a new one per stream
    fn feed_decoder(&mut self, id: TrackId, buf: Bytes) {
        if self.decoders.get(&id).is_some_and(|link| link.ended) {
            if let Some(old) = self.decoders.remove(&id) {
                let _ = old.handle.finish();
                self.codec_tracks.remove(&old.handle.id());
            }
            if let Some(engine) = self.bus.engine_mut(id) {
                engine.stop();
            }
        }

        if !self.decoders.contains_key(&id) {
            match self.open_decoder(id) {
                Ok(link) => {
                    self.decoders.insert(id, link);
                }
                Err(e) => {
                    tracing::error!(track_id = id, "Decoder unavailable: {}", e);
                    self.bus.emit(SessionEvent::CodecFailed {
                        track_id: id,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }

        if let Some(link) = self.decoders.get_mut(&id) {
            if link.ready {
                if let Err(e) = link.handle.decode(buf) {
                    tracing::warn!(track_id = id, "Decode rejected: {}", e);
                }
            } else {
                link.pending.push(buf);
            }
        }
    }

    fn open_decoder(&mut self, id: TrackId) -> std::result::Result<DecoderLink, CodecError> {
        let session = Uuid::new_v4();
        let handle = DecoderHandle::spawn(session, self.decoder_events.clone())?;
        handle.init()?;
        self.codec_tracks.insert(session, id);
        tracing::debug!(track_id = id, %session, "Decoder opened");
        Ok(DecoderLink {
            handle,
            ready: false,
            pending: Vec::new(),
            ended: false,
            decoded_seconds: 0.0,
            exports: Vec::new(),
        })
    }

    /// End of a stream: decode whatever is left
    fn end_stream(&mut self, id: TrackId) {
        let Some(link) = self.decoders.get_mut(&id) else {
            return;
        };
        link.ended = true;
        if link.ready {
            if let Err(e) = link.handle.flush() {
                tracing::warn!(track_id = id, "Flush failed: {}", e);
            }
        }
    }

    fn handle_decoder_event(&mut self, session: CodecSessionId, event: DecoderEvent) {
        let Some(&id) = self.codec_tracks.get(&session) else {
            return;
        };
        let Some(link) = self.decoders.get_mut(&id).filter(|l| l.handle.id() == session) else {
            return;
        };

        match event {
            DecoderEvent::Ready => {
                link.ready = true;
                for buf in link.pending.drain(..) {
                    if let Err(e) = link.handle.decode(buf) {
                        tracing::warn!(track_id = id, "Decode rejected: {}", e);
                    }
                }
                if link.ended {
                    let _ = link.handle.flush();
                }
                for reply in std::mem::take(&mut link.exports) {
                    let _ = reply.send(link.snapshot_job());
                }
            }
            DecoderEvent::PcmChunk(block) => {
                let seconds = block.frames() as f64 / block.sample_rate.max(1) as f64;
                link.decoded_seconds += seconds;
                if let Some(engine) = self.bus.engine_mut(id) {
                    engine.extend(seconds);
                }
            }
            DecoderEvent::End => {}
            DecoderEvent::Failed(e) => {
                tracing::warn!(track_id = id, "Decoder reported: {}", e);
                self.bus.emit(SessionEvent::CodecFailed {
                    track_id: id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn export(&mut self, id: TrackId, reply: Reply<ExportJob>) {
        if self.bus.state().track(id).is_none() {
            let _ = reply.send(Err(TrackError::NotFound(id).into()));
            return;
        }
        match self.decoders.get_mut(&id) {
            Some(link) if link.ready => {
                let _ = reply.send(link.snapshot_job());
            }
            Some(link) => link.exports.push(reply),
            None => {
                let _ = reply.send(Err(TrackError::NoAudio(id).into()));
            }
        }
    }

    /// Drop codec state of tracks that no longer exist
    fn reconcile_audio(&mut self) {
        let state = self.bus.state();
        let gone: Vec<TrackId> = self
            .recordings
            .keys()
            .chain(self.decoders.keys())
            .copied()
            .filter(|id| state.track(*id).is_none())
            .collect();

        for id in gone {
            if let Some(mut recording) = self.recordings.remove(&id) {
                if let Some(mut capture) = recording.capture.take() {
                    tokio::task::spawn_blocking(move || capture.stop());
                }
                let _ = recording.encoder.finish();
                self.codec_tracks.remove(&recording.encoder.id());
                for waiter in recording.waiters {
                    let _ = waiter.send(Err(TrackError::NotFound(id).into()));
                }
            }
            if let Some(link) = self.decoders.remove(&id) {
                let _ = link.handle.finish();
                self.codec_tracks.remove(&link.handle.id());
                for reply in link.exports {
                    let _ = reply.send(Err(TrackError::NotFound(id).into()));
                }
            }
            tracing::debug!(track_id = id, "Released codec sessions of removed track");
        }
    }

    fn track_views(&self) -> Vec<TrackView> {
        self.bus
            .state()
            .tracks()
            .iter()
            .map(|track| TrackView {
                track: track.clone(),
                playback: self.bus.engine(track.id).map(|e| e.status()),
                decoded_seconds: self
                    .decoders
                    .get(&track.id)
                    .map(|l| l.decoded_seconds)
                    .unwrap_or(0.0),
            })
            .collect()
    }

    fn status(&self) -> SessionStatus {
        let state = self.bus.state();
        SessionStatus {
            peer_id: self.options.peer_id.clone(),
            tracks: state.tracks().len(),
            peers: self.bus.registry().len(),
            history_len: self.bus.history().len(),
            recording: state.tracks().iter().filter(|t| t.recording).map(|t| t.id).collect(),
            meter_level: state.master.meter_level,
        }
    }

    fn shutdown(&mut self) {
        for (_, mut recording) in self.recordings.drain() {
            if let Some(mut capture) = recording.capture.take() {
                tokio::task::spawn_blocking(move || capture.stop());
            }
            let _ = recording.encoder.finish();
            for waiter in recording.waiters {
                let _ = waiter.send(Err(Error::SessionClosed));
            }
        }
        for (_, link) in self.decoders.drain() {
            let _ = link.handle.finish();
        }
        self.bus.registry_mut().clear();
    }
}

/// Cloneable front door to a running session
#[derive(Clone)]
pub struct SessionHandle {
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    peers: PeerEventSink,
    events: broadcast::Sender<SessionEvent>,
    exporter: ExporterHandle,
}

impl SessionHandle {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Where transports report connections and messages
    pub fn peer_events(&self) -> PeerEventSink {
        self.peers.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn add_track(&self) -> Result<TrackId> {
        self.request(SessionCommand::AddTrack).await
    }

    pub async fn remove_track(&self, id: TrackId) -> Result<()> {
        self.request(|reply| SessionCommand::RemoveTrack(id, reply)).await
    }

    pub async fn transport(&self, id: TrackId, transport: Transport) -> Result<PlaybackStatus> {
        self.request(|reply| SessionCommand::Transport(id, transport, reply))
            .await
    }

    pub async fn play(&self, id: TrackId) -> Result<PlaybackStatus> {
        self.transport(id, Transport::Play).await
    }

    pub async fn pause(&self, id: TrackId) -> Result<PlaybackStatus> {
        self.transport(id, Transport::Pause).await
    }

    pub async fn stop(&self, id: TrackId) -> Result<PlaybackStatus> {
        self.transport(id, Transport::Stop).await
    }

    pub async fn seek_to(&self, id: TrackId, position_seconds: f64) -> Result<PlaybackStatus> {
        self.transport(id, Transport::SeekTo { position_seconds })
            .await
    }

    pub async fn tracks(&self) -> Result<Vec<TrackView>> {
        self.request(SessionCommand::Tracks).await
    }

    pub async fn history(&self) -> Result<Vec<MixerAction>> {
        self.request(SessionCommand::History).await
    }

    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.request(SessionCommand::Peers).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(SessionCommand::Status).await
    }

    /// Start streaming `source` into the track; capture begins once the
    /// encoder reports ready
    pub async fn start_recording(&self, id: TrackId, source: Box<dyn CaptureSource>) -> Result<CodecSessionId> {
        self.request(|reply| SessionCommand::StartRecording(id, source, reply))
            .await
    }

    /// Stop capture, flush the encoder and announce the end to peers
    pub async fn stop_recording(&self, id: TrackId) -> Result<()> {
        self.request(|reply| SessionCommand::StopRecording(id, reply))
            .await
    }

    /// Build a WAV file from everything decoded for the track
    pub async fn export_track(&self, id: TrackId) -> Result<Bytes> {
        let job = self.request(|reply| SessionCommand::Export(id, reply)).await?;
        let blocks = job
            .snapshot
            .await
            .map_err(|_| Error::Codec(CodecError::WorkerGone))?;
        let Some(first) = blocks.first() else {
            return Err(TrackError::NoAudio(id).into());
        };
        let format = WavFormat {
            sample_rate: first.sample_rate,
            channels: first.channels.len() as u16,
            bits_per_sample: first.bits_per_sample,
        };
        self.exporter
            .export_wav(blocks, format)
            .await
            .map_err(|e: ExportError| e.into())
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
