//! Capture pipeline feeding a track's encoder
//!
//! A capture thread pulls buffers from the source and pushes them into a
//! lock-free ring buffer without ever blocking. A pump thread drains the
//! ring into the encoder and reports the level to the master meter.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::meter::LevelMeter;
use crate::codec::EncoderInput;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::CodecError;

/// Idle wait of the pump when the ring is empty
const PUMP_IDLE: Duration = Duration::from_millis(2);

/// Producer of raw PCM buffers (a device callback or a synthetic source)
pub trait CaptureSource: Send {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Next interleaved buffer, `None` once the source is exhausted
    fn next_buffer(&mut self) -> Option<Vec<f32>>;
}

/// Receives meter readings in dBFS
pub type MeterSink = Box<dyn Fn(f32) + Send>;

/// Capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u32,
    pub frames_dropped: usize,
    pub samples_encoded: u64,
}

/// Running capture for one track; stopping drains what was captured
pub struct CaptureHandle {
    name: String,
    running: Arc<AtomicBool>,
    source_done: Arc<AtomicBool>,
    ring: SharedRingBuffer,
    sequence: Arc<AtomicU32>,
    samples_encoded: Arc<AtomicU64>,
    capture_thread: Option<JoinHandle<()>>,
    pump_thread: Option<JoinHandle<Result<(), CodecError>>>,
}

impl CaptureHandle {
    /// Start capturing from `source` into `encoder`
    pub fn start(
        mut source: Box<dyn CaptureSource>,
        encoder: EncoderInput,
        meter: MeterSink,
    ) -> std::io::Result<Self> {
        let name = source.name().to_string();
        let channels = source.channels();
        let running = Arc::new(AtomicBool::new(true));
        let source_done = Arc::new(AtomicBool::new(false));
        let ring = create_shared_buffer(RING_BUFFER_CAPACITY);
        let sequence = Arc::new(AtomicU32::new(0));
        let samples_encoded = Arc::new(AtomicU64::new(0));

        let capture_thread = {
            let running = running.clone();
            let source_done = source_done.clone();
            let ring = ring.clone();
            let sequence = sequence.clone();
            thread::Builder::new()
                .name(format!("capture-{name}"))
                .spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        let Some(samples) = source.next_buffer() else {
                            break;
                        };
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        if !ring.push(AudioFrame::new(samples, channels, seq)) {
                            tracing::trace!(seq, "Capture ring full, frame dropped");
                        }
                    }
                    source_done.store(true, Ordering::Release);
                })?
        };

        let pump_thread = {
            let source_done = source_done.clone();
            let ring = ring.clone();
            let samples_encoded = samples_encoded.clone();
            thread::Builder::new()
                .name(format!("pump-{name}"))
                .spawn(move || pump(ring, source_done, encoder, meter, samples_encoded))?
        };

        tracing::info!(source = %name, "Capture started");
        Ok(Self {
            name,
            running,
            source_done,
            ring,
            sequence,
            samples_encoded,
            capture_thread: Some(capture_thread),
            pump_thread: Some(pump_thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the source ran out on its own
    pub fn is_exhausted(&self) -> bool {
        self.source_done.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.sequence.load(Ordering::Relaxed),
            frames_dropped: self.ring.overflow_count(),
            samples_encoded: self.samples_encoded.load(Ordering::Relaxed),
        }
    }

    /// Stop capturing; returns once every captured frame reached the encoder
    pub fn stop(&mut self) -> Result<CaptureStats, CodecError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        let result = match self.pump_thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(CodecError::EncodingFailed("pump panicked".into()))),
            None => Ok(()),
        };
        let stats = self.stats();
        tracing::info!(
            source = %self.name,
            frames = stats.frames_captured,
            dropped = stats.frames_dropped,
            "Capture stopped"
        );
        result.map(|_| stats)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.pump_thread.is_some() {
            let _ = self.stop();
        }
    }
}

fn pump(
    ring: SharedRingBuffer,
    source_done: Arc<AtomicBool>,
    encoder: EncoderInput,
    meter: MeterSink,
    samples_encoded: Arc<AtomicU64>,
) -> Result<(), CodecError> {
    let mut level = LevelMeter::new();
    loop {
        let done = source_done.load(Ordering::Acquire);
        let mut drained = false;
        while let Some(frame) = ring.pop() {
            drained = true;
            meter(level.process(&frame.samples));
            let count = frame.samples.len() as u64;
            if let Err(e) = encoder.encode(frame.samples) {
                tracing::error!("Encoder rejected captured audio: {}", e);
                return Err(e);
            }
            samples_encoded.fetch_add(count, Ordering::Relaxed);
        }
        if done && ring.is_empty() {
            return Ok(());
        }
        if !drained {
            thread::sleep(PUMP_IDLE);
        }
    }
}
