//! Streaming lossless encoder
//!
//! `StreamEncoder` turns float PCM into stream chunks; `EncoderHandle` runs
//! one on its own thread and speaks the init/encode/finish protocol.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::{mpsc, watch};

use super::format::{encode_frame, EncodeParams, StreamInfo};
use super::worker::{CodecSessionId, StateWatch, WorkerState};
use crate::config::{EncoderConfig, EncoderConfigOverrides};
use crate::constants::BLOCK_SIZE;
use crate::error::CodecError;

/// Lossless encoder producing one chunk per completed block
pub struct StreamEncoder {
    config: EncoderConfig,
    info: StreamInfo,
    params: EncodeParams,
    /// Samples waiting for a full block, per channel
    pending: Vec<Vec<i32>>,
    frame_number: u64,
    header_sent: bool,
    finished: bool,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl StreamEncoder {
    /// Create an encoder with the specified configuration
    pub fn new(config: EncoderConfig) -> Result<Self, CodecError> {
        config.validate()?;

        let info = StreamInfo {
            min_block_size: BLOCK_SIZE as u16,
            max_block_size: BLOCK_SIZE as u16,
            sample_rate: config.sample_rate,
            channels: config.channels,
            bits_per_sample: config.bits_per_sample,
            total_samples: 0,
        };

        Ok(Self {
            params: EncodeParams::for_level(config.compression_level),
            pending: vec![Vec::with_capacity(BLOCK_SIZE); config.channels as usize],
            config,
            info,
            frame_number: 0,
            header_sent: false,
            finished: false,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Scale a normalized float sample to signed integer PCM
    pub fn scale_sample(sample: f32, bits_per_sample: u16) -> i32 {
        let max = ((1i64 << (bits_per_sample - 1)) - 1) as f64;
        (sample.clamp(-1.0, 1.0) as f64 * max) as i32
    }

    /// Encode interleaved float samples in [-1, 1]
    ///
    /// Any length that is a multiple of the channel count is accepted; output
    /// is produced whenever a block fills up.
    pub fn encode(&mut self, frame: &[f32]) -> Result<Vec<Bytes>, CodecError> {
        let bps = self.config.bits_per_sample;
        let scaled: Vec<i32> = frame.iter().map(|&s| Self::scale_sample(s, bps)).collect();
        self.encode_pcm(&scaled)
    }

    /// Encode interleaved integer samples already at the configured depth
    pub fn encode_pcm(&mut self, interleaved: &[i32]) -> Result<Vec<Bytes>, CodecError> {
        if self.finished {
            return Err(CodecError::Finished);
        }
        let channels = self.config.channels as usize;
        if interleaved.len() % channels != 0 {
            return Err(CodecError::InvalidFrameSize(interleaved.len()));
        }

        let mut chunks = Vec::new();
        self.push_header(&mut chunks);

        for sample_frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in sample_frame.iter().enumerate() {
                self.pending[ch].push(sample);
            }
            if self.pending[0].len() == BLOCK_SIZE {
                chunks.push(self.flush_block());
            }
        }

        Ok(chunks)
    }

    /// Flush the trailing partial block; the encoder is spent afterwards
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        self.push_header(&mut chunks);
        if !self.pending[0].is_empty() {
            chunks.push(self.flush_block());
        }
        self.finished = true;
        chunks
    }

    fn push_header(&mut self, chunks: &mut Vec<Bytes>) {
        if !self.header_sent {
            let header = Bytes::from(self.info.write_stream_header());
            self.bytes_produced += header.len() as u64;
            chunks.push(header);
            self.header_sent = true;
        }
    }

    fn flush_block(&mut self) -> Bytes {
        let bytes = encode_frame(&self.info, self.frame_number, &self.pending, self.params);
        for channel in self.pending.iter_mut() {
            channel.clear();
        }
        self.frame_number += 1;
        self.frames_encoded += 1;
        self.bytes_produced += bytes.len() as u64;
        Bytes::from(bytes)
    }

    /// Get current configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

/// Requests accepted by an encoder worker
#[derive(Debug)]
pub enum EncoderRequest {
    Init(Option<EncoderConfigOverrides>),
    Encode(Vec<f32>),
    Finish,
}

/// Events produced by an encoder worker
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    Ready,
    FlacChunk(Bytes),
    End,
    Failed(CodecError),
}

/// Where encoder workers deliver their events
pub type EncoderEventSink = mpsc::UnboundedSender<(CodecSessionId, EncoderEvent)>;

/// Cloneable submit side of an encoder worker, usable from capture threads
#[derive(Clone)]
pub struct EncoderInput {
    tx: Sender<EncoderRequest>,
    state: StateWatch,
}

impl EncoderInput {
    /// Submit a frame; rejected until the worker reports ready
    pub fn encode(&self, frame: Vec<f32>) -> Result<(), CodecError> {
        let state = self.state.current();
        if !state.accepts_work() {
            return Err(match state {
                WorkerState::Finished => CodecError::Finished,
                WorkerState::Failed(e) => e,
                _ => CodecError::NotReady,
            });
        }
        self.tx
            .send(EncoderRequest::Encode(frame))
            .map_err(|_| CodecError::WorkerGone)
    }
}

/// Owner side of an encoder worker thread
pub struct EncoderHandle {
    id: CodecSessionId,
    tx: Sender<EncoderRequest>,
    state: StateWatch,
}

impl EncoderHandle {
    /// Start a worker thread; it stays uninitialized until `init`
    pub fn spawn(id: CodecSessionId, events: EncoderEventSink) -> Result<Self, CodecError> {
        let (tx, rx) = unbounded();
        let (state_tx, state) = StateWatch::channel();

        std::thread::Builder::new()
            .name(format!("encoder-{}", &id.to_string()[..8]))
            .spawn(move || run_encoder(id, rx, state_tx, events))
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Ok(Self { id, tx, state })
    }

    pub fn id(&self) -> CodecSessionId {
        self.id
    }

    /// Ask the worker to initialize; omitted fields take defaults
    pub fn init(&self, config: Option<EncoderConfigOverrides>) -> Result<(), CodecError> {
        self.tx
            .send(EncoderRequest::Init(config))
            .map_err(|_| CodecError::WorkerGone)
    }

    /// Resolve once the worker has reported ready
    pub async fn wait_ready(&self) -> Result<(), CodecError> {
        self.state.clone().wait_ready().await
    }

    pub fn state(&self) -> WorkerState {
        self.state.current()
    }

    pub fn input(&self) -> EncoderInput {
        EncoderInput {
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }

    pub fn encode(&self, frame: Vec<f32>) -> Result<(), CodecError> {
        self.input().encode(frame)
    }

    /// Flush and end the stream
    pub fn finish(&self) -> Result<(), CodecError> {
        self.tx
            .send(EncoderRequest::Finish)
            .map_err(|_| CodecError::WorkerGone)
    }
}

fn run_encoder(
    id: CodecSessionId,
    rx: Receiver<EncoderRequest>,
    state: watch::Sender<WorkerState>,
    events: EncoderEventSink,
) {
    let emit = |event: EncoderEvent| events.send((id, event)).is_ok();
    let mut encoder: Option<StreamEncoder> = None;

    for request in rx.iter() {
        match request {
            EncoderRequest::Init(overrides) => {
                let config = EncoderConfig::from_overrides(overrides.unwrap_or_default());
                match StreamEncoder::new(config) {
                    Ok(e) => {
                        tracing::info!(
                            session = %id,
                            sample_rate = config.sample_rate,
                            channels = config.channels,
                            bits = config.bits_per_sample,
                            level = config.compression_level,
                            "Encoder ready"
                        );
                        encoder = Some(e);
                        state.send_replace(WorkerState::Ready);
                        if !emit(EncoderEvent::Ready) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(session = %id, "Encoder init failed: {}", e);
                        encoder = None;
                        state.send_replace(WorkerState::Failed(e.clone()));
                        if !emit(EncoderEvent::Failed(e)) {
                            break;
                        }
                    }
                }
            }
            EncoderRequest::Encode(frame) => {
                let Some(enc) = encoder.as_mut() else {
                    tracing::warn!(session = %id, "Dropping audio submitted before init");
                    if !emit(EncoderEvent::Failed(CodecError::NotReady)) {
                        break;
                    }
                    continue;
                };
                state.send_if_modified(|s| {
                    if *s == WorkerState::Ready {
                        *s = WorkerState::Encoding;
                        true
                    } else {
                        false
                    }
                });
                match enc.encode(&frame) {
                    Ok(chunks) => {
                        if !chunks.into_iter().all(|c| emit(EncoderEvent::FlacChunk(c))) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %id, "Encoding failed: {}", e);
                        if !emit(EncoderEvent::Failed(e)) {
                            break;
                        }
                    }
                }
            }
            EncoderRequest::Finish => {
                if let Some(enc) = encoder.as_mut() {
                    for chunk in enc.finish() {
                        emit(EncoderEvent::FlacChunk(chunk));
                    }
                    let stats = enc.stats();
                    tracing::info!(
                        session = %id,
                        frames = stats.frames_encoded,
                        bytes = stats.bytes_produced,
                        "Encoder finished"
                    );
                }
                state.send_replace(WorkerState::Finished);
                emit(EncoderEvent::End);
                break;
            }
        }
    }
    tracing::debug!(session = %id, "Encoder worker exiting");
}
