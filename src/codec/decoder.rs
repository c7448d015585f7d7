//! Streaming lossless decoder
//!
//! Compressed chunks arrive in order and are queued in a `DecodeBuffer`.
//! The decode loop only runs once enough input is buffered, pulls at most
//! one block's worth of bytes per read, and pauses itself when the queue
//! runs dry instead of spinning on partial frames.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_FLAC};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tokio::sync::{mpsc, oneshot, watch};

use super::format::{
    find_frame_end, find_sync, parse_frame_header, parse_stream_header, Frame, FrameEnd, FrameHeader, FrameParse,
    HeaderParse, StreamInfo, STREAM_MARKER,
};
use super::worker::{CodecSessionId, StateWatch, WorkerState};
use crate::constants::{BLOCK_SIZE, MIN_DECODE_THRESHOLD};
use crate::error::CodecError;

/// Bytes handed to the codec per read
const READ_SIZE: usize = BLOCK_SIZE;

/// Ordered queue of compressed input with a read cursor into the head chunk
pub struct DecodeBuffer {
    queue: VecDeque<Bytes>,
    offset: usize,
    paused: bool,
    buffered: usize,
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeBuffer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            offset: 0,
            paused: true,
            buffered: 0,
        }
    }

    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.buffered += chunk.len();
        self.queue.push_back(chunk);
    }

    /// Unread bytes across all queued chunks
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    /// Read up to `max` bytes from the head chunk
    ///
    /// An empty result means no input is available right now, not end of
    /// stream; the buffer pauses itself when that happens.
    pub fn read(&mut self, max: usize) -> Bytes {
        let Some(head) = self.queue.front() else {
            self.paused = true;
            return Bytes::new();
        };

        let end = (self.offset + max).min(head.len());
        let out = head.slice(self.offset..end);
        self.offset = end;
        self.buffered -= out.len();

        if self.offset == head.len() {
            self.queue.pop_front();
            self.offset = 0;
            if self.queue.is_empty() {
                self.paused = true;
            }
        }
        out
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.queue.clear();
        self.offset = 0;
        self.buffered = 0;
        self.paused = true;
    }
}

/// One decoded block, each channel as little-endian sample bytes
///
/// 8-bit samples occupy two bytes and 24-bit samples four; the extra byte is
/// sign padding (0x00 or 0xFF).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: Vec<Bytes>,
}

impl DecodedBlock {
    /// Bytes used to store one sample in `channels`
    pub fn storage_width(bits_per_sample: u16) -> usize {
        match bits_per_sample {
            0..=16 => 2,
            17..=24 if bits_per_sample != 24 => 3,
            _ => 4,
        }
    }

    pub fn from_frame(frame: &Frame) -> Self {
        let width = Self::storage_width(frame.bits_per_sample);
        let channels = frame
            .channels
            .iter()
            .map(|samples| {
                let mut bytes = Vec::with_capacity(samples.len() * width);
                for &s in samples {
                    bytes.extend_from_slice(&s.to_le_bytes()[..width]);
                }
                Bytes::from(bytes)
            })
            .collect();
        Self {
            sample_rate: frame.sample_rate,
            bits_per_sample: frame.bits_per_sample,
            channels,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels
            .first()
            .map(|c| c.len() / Self::storage_width(self.bits_per_sample))
            .unwrap_or(0)
    }

    /// Integer samples of one channel
    pub fn samples(&self, channel: usize) -> Vec<i32> {
        let width = Self::storage_width(self.bits_per_sample);
        let shift = 32 - 8 * width as u32;
        self.channels[channel]
            .chunks_exact(width)
            .map(|b| {
                let mut raw = [0u8; 4];
                raw[..width].copy_from_slice(b);
                (i32::from_le_bytes(raw) << shift) >> shift
            })
            .collect()
    }

    /// Interleaved float samples in [-1, 1] for playback
    pub fn to_f32_interleaved(&self) -> Vec<f32> {
        let scale = ((1i64 << (self.bits_per_sample - 1)) - 1) as f32;
        let per_channel: Vec<Vec<i32>> = (0..self.channels.len()).map(|c| self.samples(c)).collect();
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * per_channel.len());
        for i in 0..frames {
            for channel in &per_channel {
                out.push(channel[i] as f32 / scale);
            }
        }
        out
    }
}

/// Result of one decode step
#[derive(Debug)]
pub enum DecodeStep {
    Metadata(StreamInfo),
    Block(DecodedBlock),
    /// Nothing decodable without more input
    NeedInput,
}

enum Stage {
    Header,
    Frames {
        info: StreamInfo,
        codec: Box<dyn Decoder>,
    },
}

/// Build a FLAC codec for a stream from its STREAMINFO
fn open_codec(info: &StreamInfo) -> Result<Box<dyn Decoder>, SymphoniaError> {
    // Widest legal block bounds so any frame fits the codec's sample buffer
    let bounds = StreamInfo {
        min_block_size: 16,
        max_block_size: u16::MAX,
        ..*info
    };
    let mut params = CodecParameters::new();
    params
        .for_codec(CODEC_TYPE_FLAC)
        .with_sample_rate(info.sample_rate)
        .with_bits_per_sample(info.bits_per_sample as u32)
        .with_extra_data(bounds.streaminfo_body().into_boxed_slice());
    symphonia::default::get_codecs().make(&params, &DecoderOptions::default())
}

/// Decode one delimited frame into per-channel samples at their native depth
fn decode_packet(codec: &mut dyn Decoder, packet: &Packet, header: &FrameHeader) -> Result<Frame, SymphoniaError> {
    let decoded = codec.decode(packet)?;
    let spec = *decoded.spec();
    let frames = decoded.frames();
    let mut planar = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
    planar.copy_planar_ref(decoded);

    // Output is scaled to the full 32-bit range
    let shift = 32 - header.bits_per_sample as u32;
    let channels = if frames == 0 {
        vec![Vec::new(); spec.channels.count()]
    } else {
        planar
            .samples()
            .chunks_exact(frames)
            .map(|plane| plane.iter().map(|&s| s >> shift).collect())
            .collect()
    };
    Ok(Frame {
        sample_rate: header.sample_rate,
        bits_per_sample: header.bits_per_sample,
        channels,
    })
}

/// Splits the byte stream into frames and hands each one to the codec
pub struct StreamDecoder {
    stage: Stage,
    acc: Vec<u8>,
    frames_decoded: u64,
    bytes_skipped: u64,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            stage: Stage::Header,
            acc: Vec::with_capacity(READ_SIZE * 2),
            frames_decoded: 0,
            bytes_skipped: 0,
        }
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        match &self.stage {
            Stage::Frames { info, .. } => Some(*info),
            Stage::Header => None,
        }
    }

    /// Decode one unit, pulling input through `read` as needed
    pub fn process_single<F>(&mut self, mut read: F) -> DecodeStep
    where
        F: FnMut(usize) -> Bytes,
    {
        loop {
            if let Some(step) = self.try_decode() {
                return step;
            }
            let input = read(READ_SIZE);
            if input.is_empty() {
                return DecodeStep::NeedInput;
            }
            self.acc.extend_from_slice(&input);
        }
    }

    fn try_decode(&mut self) -> Option<DecodeStep> {
        loop {
            if matches!(self.stage, Stage::Header) {
                return self.try_header();
            }
            let info = self.stream_info()?;

            if self.acc.len() < 2 {
                return None;
            }
            if !(self.acc[0] == 0xFF && self.acc[1] & 0xFE == 0xF8) {
                let skip = find_sync(&self.acc, 1).unwrap_or(self.acc.len() - 1);
                tracing::warn!("Lost sync, skipping {} bytes", skip);
                self.skip(skip);
                continue;
            }

            let header = match parse_frame_header(&self.acc, &info) {
                Err(_) => return None,
                Ok(FrameParse::Header(header)) => header,
                Ok(FrameParse::Corrupt(reason)) => {
                    tracing::warn!("Corrupt frame header: {}", reason);
                    self.skip(1);
                    continue;
                }
            };

            let (end, delimited) = match find_frame_end(&self.acc, &header) {
                FrameEnd::Delimited(end) => (end, true),
                FrameEnd::Tail(end) => (end, false),
                FrameEnd::Open if self.acc.len() >= header.max_frame_len() => {
                    tracing::warn!("Frame {} never closed", header.frame_number);
                    self.skip(1);
                    continue;
                }
                FrameEnd::Open => return None,
            };

            match self.decode_frame(&header, end) {
                Ok(frame) => {
                    self.acc.drain(..end);
                    self.frames_decoded += 1;
                    return Some(DecodeStep::Block(DecodedBlock::from_frame(&frame)));
                }
                // The CRC may have closed on a chunk boundary inside a longer frame
                Err(_) if !delimited => return None,
                Err(reason) => {
                    tracing::warn!("Corrupt frame {}: {}", header.frame_number, reason);
                    self.skip(1);
                }
            }
        }
    }

    /// Parse the stream header and open the codec for it
    fn try_header(&mut self) -> Option<DecodeStep> {
        loop {
            match parse_stream_header(&self.acc) {
                Err(_) => return None,
                Ok(HeaderParse::Done { info, consumed }) => {
                    self.acc.drain(..consumed);
                    let codec = match open_codec(&info) {
                        Ok(codec) => codec,
                        Err(e) => {
                            tracing::warn!("Unsupported stream parameters: {}", e);
                            self.bytes_skipped += consumed as u64;
                            if self.acc.is_empty() {
                                return None;
                            }
                            continue;
                        }
                    };
                    self.stage = Stage::Frames { info, codec };
                    tracing::debug!(
                        sample_rate = info.sample_rate,
                        channels = info.channels,
                        bits = info.bits_per_sample,
                        "Stream header decoded"
                    );
                    return Some(DecodeStep::Metadata(info));
                }
                Ok(HeaderParse::Invalid(reason)) => {
                    let skip = self
                        .acc
                        .windows(STREAM_MARKER.len())
                        .skip(1)
                        .position(|w| w == STREAM_MARKER)
                        .map(|p| p + 1)
                        .unwrap_or(self.acc.len().saturating_sub(STREAM_MARKER.len() - 1));
                    tracing::warn!("Skipping {} bytes before stream header: {}", skip, reason);
                    self.skip(skip.max(1));
                    if self.acc.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    fn decode_frame(&mut self, header: &FrameHeader, end: usize) -> Result<Frame, String> {
        let Stage::Frames { info, codec } = &mut self.stage else {
            return Err("no stream header".into());
        };
        let packet = Packet::new_from_slice(0, header.frame_number, header.block_size as u64, &self.acc[..end]);

        match catch_unwind(AssertUnwindSafe(|| decode_packet(codec.as_mut(), &packet, header))) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => {
                // Codec state is unknown after a panic
                *codec = open_codec(info).map_err(|e| e.to_string())?;
                Err("codec panicked".into())
            }
        }
    }

    fn skip(&mut self, n: usize) {
        let n = n.min(self.acc.len());
        self.acc.drain(..n);
        self.bytes_skipped += n as u64;
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }
}

/// Decode state for one incoming stream: input queue, codec, decoded output
pub struct DecodeSession {
    buffer: DecodeBuffer,
    codec: StreamDecoder,
    decoded: Vec<DecodedBlock>,
}

impl Default for DecodeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeSession {
    pub fn new() -> Self {
        Self {
            buffer: DecodeBuffer::new(),
            codec: StreamDecoder::new(),
            decoded: Vec::new(),
        }
    }

    /// Queue a chunk and run the decode loop if enough input is buffered
    pub fn push(&mut self, chunk: Bytes) -> Vec<DecodedBlock> {
        self.buffer.push(chunk);
        self.run(false)
    }

    /// Decode whatever is buffered regardless of the threshold
    pub fn flush(&mut self) -> Vec<DecodedBlock> {
        self.run(true)
    }

    fn run(&mut self, force: bool) -> Vec<DecodedBlock> {
        let mut out = Vec::new();
        if !self.buffer.is_paused() {
            return out;
        }
        if !force && self.buffer.buffered_bytes() < MIN_DECODE_THRESHOLD {
            return out;
        }

        self.buffer.resume();
        while !self.buffer.is_paused() {
            if let DecodeStep::Block(block) = self.codec.process_single(|n| self.buffer.read(n)) {
                out.push(block);
            }
        }

        // Input ran dry, but the codec may still hold whole frames
        loop {
            match self.codec.process_single(|_| Bytes::new()) {
                DecodeStep::Block(block) => out.push(block),
                DecodeStep::Metadata(_) => {}
                DecodeStep::NeedInput => break,
            }
        }

        self.decoded.extend(out.iter().cloned());
        out
    }

    pub fn is_paused(&self) -> bool {
        self.buffer.is_paused()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.buffered_bytes()
    }

    /// Everything decoded so far
    pub fn decoded(&self) -> &[DecodedBlock] {
        &self.decoded
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.codec.stream_info()
    }

    /// Discard undelivered input
    pub fn discard_input(&mut self) {
        self.buffer.clear();
    }
}

/// Requests accepted by a decoder worker
#[derive(Debug)]
pub enum DecoderRequest {
    Init,
    Decode(Bytes),
    Flush,
    Snapshot(oneshot::Sender<Vec<DecodedBlock>>),
    Finish,
}

/// Events produced by a decoder worker
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Ready,
    PcmChunk(DecodedBlock),
    End,
    Failed(CodecError),
}

/// Where decoder workers deliver their events
pub type DecoderEventSink = mpsc::UnboundedSender<(CodecSessionId, DecoderEvent)>;

/// Owner side of a decoder worker thread
pub struct DecoderHandle {
    id: CodecSessionId,
    tx: Sender<DecoderRequest>,
    state: StateWatch,
}

impl DecoderHandle {
    /// Start a worker thread; it stays uninitialized until `init`
    pub fn spawn(id: CodecSessionId, events: DecoderEventSink) -> Result<Self, CodecError> {
        let (tx, rx) = unbounded();
        let (state_tx, state) = StateWatch::channel();

        std::thread::Builder::new()
            .name(format!("decoder-{}", &id.to_string()[..8]))
            .spawn(move || run_decoder(id, rx, state_tx, events))
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self { id, tx, state })
    }

    pub fn id(&self) -> CodecSessionId {
        self.id
    }

    pub fn init(&self) -> Result<(), CodecError> {
        self.send(DecoderRequest::Init)
    }

    pub async fn wait_ready(&self) -> Result<(), CodecError> {
        self.state.clone().wait_ready().await
    }

    pub fn state(&self) -> WorkerState {
        self.state.current()
    }

    pub fn is_ready(&self) -> bool {
        self.state.current().accepts_work()
    }

    /// Queue a compressed chunk; rejected until the worker reports ready
    pub fn decode(&self, chunk: Bytes) -> Result<(), CodecError> {
        if !self.is_ready() {
            return Err(CodecError::NotReady);
        }
        self.send(DecoderRequest::Decode(chunk))
    }

    pub fn flush(&self) -> Result<(), CodecError> {
        self.send(DecoderRequest::Flush)
    }

    /// Read-only copy of the decoded-sample buffer
    pub async fn snapshot(&self) -> Result<Vec<DecodedBlock>, CodecError> {
        self.request_snapshot()?
            .await
            .map_err(|_| CodecError::WorkerGone)
    }

    /// Queue a snapshot behind every request sent so far
    pub fn request_snapshot(&self) -> Result<oneshot::Receiver<Vec<DecodedBlock>>, CodecError> {
        let (tx, rx) = oneshot::channel();
        self.send(DecoderRequest::Snapshot(tx))?;
        Ok(rx)
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        self.send(DecoderRequest::Finish)
    }

    fn send(&self, request: DecoderRequest) -> Result<(), CodecError> {
        self.tx.send(request).map_err(|_| CodecError::WorkerGone)
    }
}

/// Run one decode pass, reporting `Decoding` until the input runs dry
fn decode_pass<F>(state: &watch::Sender<WorkerState>, session: &mut DecodeSession, pass: F) -> Vec<DecodedBlock>
where
    F: FnOnce(&mut DecodeSession) -> Vec<DecodedBlock>,
{
    state.send_replace(WorkerState::Decoding);
    let blocks = pass(session);
    state.send_replace(WorkerState::Ready);
    blocks
}

fn run_decoder(
    id: CodecSessionId,
    rx: Receiver<DecoderRequest>,
    state: watch::Sender<WorkerState>,
    events: DecoderEventSink,
) {
    let emit = |event: DecoderEvent| events.send((id, event)).is_ok();
    let mut session: Option<DecodeSession> = None;
    let mut finished = false;

    let publish = |blocks: Vec<DecodedBlock>| -> bool { blocks.into_iter().all(|b| emit(DecoderEvent::PcmChunk(b))) };

    for request in rx.iter() {
        match request {
            DecoderRequest::Init => {
                session = Some(DecodeSession::new());
                finished = false;
                state.send_replace(WorkerState::Ready);
                tracing::info!(session = %id, "Decoder ready");
                if !emit(DecoderEvent::Ready) {
                    break;
                }
            }
            DecoderRequest::Decode(chunk) => {
                let Some(s) = session.as_mut().filter(|_| !finished) else {
                    tracing::warn!(session = %id, "Dropping chunk for decoder that is not ready");
                    if !emit(DecoderEvent::Failed(CodecError::NotReady)) {
                        break;
                    }
                    continue;
                };
                let blocks = decode_pass(&state, s, |s| s.push(chunk));
                if !publish(blocks) {
                    break;
                }
            }
            DecoderRequest::Flush => {
                if let Some(s) = session.as_mut().filter(|_| !finished) {
                    let blocks = decode_pass(&state, s, DecodeSession::flush);
                    if !publish(blocks) {
                        break;
                    }
                }
            }
            DecoderRequest::Snapshot(reply) => {
                let blocks = session
                    .as_ref()
                    .map(|s| s.decoded().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(blocks);
            }
            DecoderRequest::Finish => {
                if let Some(s) = session.as_mut() {
                    if s.buffered_bytes() > 0 {
                        tracing::debug!(
                            session = %id,
                            bytes = s.buffered_bytes(),
                            "Discarding undecoded input"
                        );
                    }
                    s.discard_input();
                }
                finished = true;
                state.send_replace(WorkerState::Finished);
                if !emit(DecoderEvent::End) {
                    break;
                }
                // Stay alive so the decoded buffer can still be exported
            }
        }
    }
    tracing::debug!(session = %id, "Decoder worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::StreamEncoder;
    use crate::config::EncoderConfig;
    use uuid::Uuid;

    fn sine(samples: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.8)
            .collect()
    }

    fn encode_all(config: EncoderConfig, input: &[f32], frame: usize) -> Vec<Bytes> {
        let mut encoder = StreamEncoder::new(config).unwrap();
        let mut chunks = Vec::new();
        for part in input.chunks(frame) {
            chunks.extend(encoder.encode(part).unwrap());
        }
        chunks.extend(encoder.finish());
        chunks
    }

    #[test]
    fn test_buffer_reads_across_chunks() {
        let mut buffer = DecodeBuffer::new();
        buffer.push(Bytes::from_static(b"abcdef"));
        buffer.push(Bytes::from_static(b"gh"));
        assert_eq!(buffer.buffered_bytes(), 8);
        assert!(buffer.is_paused());

        buffer.resume();
        assert_eq!(&buffer.read(4)[..], b"abcd");
        assert_eq!(&buffer.read(4)[..], b"ef");
        assert!(!buffer.is_paused());
        assert_eq!(&buffer.read(4)[..], b"gh");
        assert!(buffer.is_paused());
        assert!(buffer.read(4).is_empty());
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[test]
    fn test_sine_roundtrip_bit_exact() {
        let input = sine(44100, 440.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, 128);

        let mut session = DecodeSession::new();
        let mut blocks = Vec::new();
        for chunk in chunks {
            blocks.extend(session.push(chunk));
        }
        blocks.extend(session.flush());

        let decoded: Vec<i32> = blocks.iter().flat_map(|b| b.samples(0)).collect();
        let expected: Vec<i32> = input.iter().map(|&s| StreamEncoder::scale_sample(s, 16)).collect();
        assert_eq!(decoded.len(), 44100);
        assert_eq!(decoded, expected);
        assert_eq!(session.decoded().len(), blocks.len());
    }

    #[test]
    fn test_below_threshold_stays_paused() {
        let input = sine(1000, 220.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, 1000);
        // header chunk alone is far below the threshold
        let header = chunks[0].clone();
        assert!(header.len() < MIN_DECODE_THRESHOLD);

        let mut session = DecodeSession::new();
        assert!(session.push(header).is_empty());
        assert!(session.is_paused());
        assert!(session.stream_info().is_none());
        assert_eq!(session.buffered_bytes(), 42);

        // One more large chunk crosses the threshold and decoding happens
        let noise: Vec<f32> = (0..BLOCK_SIZE)
            .map(|i| (((i * 7919) % 2000) as f32 / 1000.0) - 1.0)
            .collect();
        let mut encoder = StreamEncoder::new(EncoderConfig::default()).unwrap();
        let big = encoder.encode(&noise).unwrap();
        assert_eq!(big.len(), 2);
        assert!(big[1].len() + 42 >= MIN_DECODE_THRESHOLD);

        let blocks = session.push(big[1].clone());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].frames(), BLOCK_SIZE);
        assert!(session.is_paused());
        assert!(session.stream_info().is_some());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let input = sine(BLOCK_SIZE * 3, 1000.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, BLOCK_SIZE * 3);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();

        let mut session = DecodeSession::new();
        let mut blocks = Vec::new();
        for piece in joined.chunks(700) {
            blocks.extend(session.push(Bytes::copy_from_slice(piece)));
        }
        blocks.extend(session.flush());
        assert_eq!(blocks.iter().map(|b| b.frames()).sum::<usize>(), BLOCK_SIZE * 3);
    }

    #[test]
    fn test_garbage_is_skipped() {
        let input = sine(BLOCK_SIZE, 300.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, BLOCK_SIZE);

        let mut session = DecodeSession::new();
        session.push(chunks[0].clone());
        session.push(Bytes::from_static(&[0x13, 0x37, 0x00, 0x42]));
        let mut blocks = session.push(chunks[1].clone());
        blocks.extend(session.flush());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].frames(), BLOCK_SIZE);
    }

    #[test]
    fn test_padded_storage_widths() {
        let frame = Frame {
            sample_rate: 8000,
            bits_per_sample: 24,
            channels: vec![vec![-1, 1, -8_388_607]],
        };
        let block = DecodedBlock::from_frame(&frame);
        assert_eq!(&block.channels[0][..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&block.channels[0][4..8], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(block.samples(0), vec![-1, 1, -8_388_607]);

        let frame = Frame {
            sample_rate: 8000,
            bits_per_sample: 8,
            channels: vec![vec![-128, 127]],
        };
        let block = DecodedBlock::from_frame(&frame);
        assert_eq!(&block.channels[0][..], &[0x80, 0xFF, 0x7F, 0x00]);
        assert_eq!(block.samples(0), vec![-128, 127]);
    }

    #[tokio::test]
    async fn test_worker_decodes_and_snapshots() {
        let input = sine(BLOCK_SIZE * 2 + 10, 440.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, 512);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DecoderHandle::spawn(Uuid::new_v4(), tx).unwrap();
        assert_eq!(handle.decode(chunks[0].clone()), Err(CodecError::NotReady));

        handle.init().unwrap();
        handle.wait_ready().await.unwrap();
        for chunk in chunks {
            handle.decode(chunk).unwrap();
        }
        handle.flush().unwrap();

        let mut frames = 0;
        while frames < BLOCK_SIZE * 2 + 10 {
            match rx.recv().await.unwrap().1 {
                DecoderEvent::PcmChunk(block) => frames += block.frames(),
                DecoderEvent::Ready => {}
                other => panic!("unexpected event {other:?}"),
            }
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 3);

        handle.finish().unwrap();
        assert_eq!(rx.recv().await.unwrap().1, DecoderEvent::End);
        assert_eq!(handle.decode(Bytes::from_static(b"x")), Err(CodecError::NotReady));
        // decoded audio survives finish
        assert_eq!(handle.snapshot().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_finish_discards_undecoded_input() {
        let input = sine(64, 440.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, 64);
        assert!(chunks.iter().map(|c| c.len()).sum::<usize>() < MIN_DECODE_THRESHOLD);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DecoderHandle::spawn(Uuid::new_v4(), tx).unwrap();
        handle.init().unwrap();
        handle.wait_ready().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().1, DecoderEvent::Ready);

        for chunk in &chunks {
            handle.decode(chunk.clone()).unwrap();
        }
        handle.finish().unwrap();
        assert_eq!(rx.recv().await.unwrap().1, DecoderEvent::End);

        assert!(handle.snapshot().await.unwrap().is_empty());
        assert_eq!(handle.decode(chunks[0].clone()), Err(CodecError::NotReady));
        // flushing after finish has nothing left to decode
        handle.flush().unwrap();
        assert!(handle.snapshot().await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_decoding_state_published_during_pass() {
        let (tx, rx) = watch::channel(WorkerState::Ready);
        let mut session = DecodeSession::new();
        let mut during = None;

        decode_pass(&tx, &mut session, |s| {
            during = Some(rx.borrow().clone());
            s.flush()
        });
        assert_eq!(during, Some(WorkerState::Decoding));
        assert_eq!(*rx.borrow(), WorkerState::Ready);
    }

    /// CRC-valid mono frame whose LPC predictor grows past any sample range
    fn runaway_lpc_frame() -> Vec<u8> {
        use crate::codec::bitstream::{crc16, crc8, BitWriter};
        use crate::codec::format::FRAME_SYNC;

        let mut w = BitWriter::new();
        w.write(FRAME_SYNC as u32, 16);
        w.write(6, 4); // block size in one extra byte
        w.write(0, 4); // stream sample rate
        w.write(0, 4); // mono
        w.write(0, 3); // stream sample size
        w.write(0, 1);
        w.write(0, 8); // frame number
        w.write(63, 8);
        let crc = crc8(w.bytes());
        w.write(crc as u32, 8);

        // order 1, 15-bit precision, coefficient 16383, no shift
        w.write(0, 1);
        w.write(0b100000, 6);
        w.write(0, 1);
        w.write_signed(1000, 16);
        w.write(14, 4);
        w.write_signed(0, 5);
        w.write_signed(16383, 15);
        // rice partition order 0, parameter 0, all residuals zero
        w.write(0, 2);
        w.write(0, 4);
        w.write(0, 4);
        for _ in 0..63 {
            w.write_unary(0);
        }
        w.align();
        let crc = crc16(w.bytes());
        w.write(crc as u32, 16);
        w.into_bytes()
    }

    #[tokio::test]
    async fn test_runaway_predictor_does_not_kill_worker() {
        let input = sine(BLOCK_SIZE, 330.0, 44100.0);
        let chunks = encode_all(EncoderConfig::default(), &input, BLOCK_SIZE);
        let expected: Vec<i32> = input.iter().map(|&s| StreamEncoder::scale_sample(s, 16)).collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = DecoderHandle::spawn(Uuid::new_v4(), tx).unwrap();
        handle.init().unwrap();
        handle.wait_ready().await.unwrap();

        handle.decode(chunks[0].clone()).unwrap();
        handle.decode(Bytes::from(runaway_lpc_frame())).unwrap();
        handle.decode(chunks[1].clone()).unwrap();
        handle.flush().unwrap();

        // the hostile frame may decode to noise or be dropped, the next one must survive
        loop {
            match rx.recv().await.unwrap().1 {
                DecoderEvent::PcmChunk(block) if block.frames() == BLOCK_SIZE => {
                    assert_eq!(block.samples(0), expected);
                    break;
                }
                DecoderEvent::PcmChunk(_) | DecoderEvent::Ready => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(handle.is_ready());
    }

    mod roundtrip {
        use super::*;
        use proptest::prelude::*;

        fn stream(bits: u16, max_len: usize) -> impl Strategy<Value = (u16, u8, Vec<i32>)> {
            let limit = (1i32 << (bits - 1)) - 1;
            (1u16..=2, 0u8..=8, prop::collection::vec(-limit..=limit, 0..max_len)).prop_map(
                |(channels, level, mut samples)| {
                    samples.truncate(samples.len() - samples.len() % channels as usize);
                    (channels, level, samples)
                },
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn test_arbitrary_pcm_is_lossless((channels, level, samples) in stream(16, 12_000)) {
                let config = EncoderConfig {
                    channels,
                    compression_level: level,
                    ..EncoderConfig::default()
                };
                let mut encoder = StreamEncoder::new(config).unwrap();
                let mut chunks = Vec::new();
                for part in samples.chunks(channels as usize * 300) {
                    chunks.extend(encoder.encode_pcm(part).unwrap());
                }
                chunks.extend(encoder.finish());

                let mut session = DecodeSession::new();
                for chunk in chunks {
                    session.push(chunk);
                }
                session.flush();

                let mut decoded = Vec::with_capacity(samples.len());
                for block in session.decoded() {
                    let per_channel: Vec<Vec<i32>> =
                        (0..channels as usize).map(|ch| block.samples(ch)).collect();
                    for i in 0..block.frames() {
                        for channel in &per_channel {
                            decoded.push(channel[i]);
                        }
                    }
                }
                prop_assert_eq!(decoded, samples);
            }
        }
    }
}
