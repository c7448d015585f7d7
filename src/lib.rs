//! # Peer Mixer
//!
//! Serverless multi-track mixing sessions: every peer holds its own copy of
//! the session, kept in step by replicating mixer actions over direct peer
//! connections, while recorded audio is streamed losslessly between peers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               PEER A                                  │
//! │                                                                       │
//! │  user action ──► SessionActor (single writer)                         │
//! │                   ├─ MixerState   (tracks, master bus)                │
//! │                   ├─ ActionHistory (append-only replay log)           │
//! │                   ├─ PeerRegistry  (broadcast / send_to)              │
//! │                   └─ playback engines, codec sessions                 │
//! │                                                                       │
//! │  capture ─► RingBuffer ─► CapturePump ─► Encoder worker ─► flac-chunk │
//! └──────────────────────────────────┬────────────────────────────────────┘
//!                                    │ {command, payload} / audio packets
//!                                    ▼
//! ┌──────────────────────────────────┴────────────────────────────────────┐
//! │                               PEER B                                  │
//! │  PeerRegistry ─► SessionActor: apply FromPeer(A), never rebroadcast   │
//! │  flac-chunk ─► Decoder worker ─► pcm-chunk ─► playback / meter        │
//! │                      └─► decoded buffer ─► Exporter worker ─► WAV     │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod network;
pub mod protocol;
pub mod session;
pub mod tracks;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for recording
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default PCM bit depth
    pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

    /// Default encoder compression level
    pub const DEFAULT_COMPRESSION_LEVEL: u8 = 5;

    /// Nominal codec block size in samples per channel
    pub const BLOCK_SIZE: usize = 4096;

    /// Buffered input required before a paused decoder resumes
    pub const MIN_DECODE_THRESHOLD: usize = if BLOCK_SIZE / 2 > 1024 {
        BLOCK_SIZE / 2
    } else {
        1024
    };

    /// Default TCP port for peer connections
    pub const DEFAULT_PEER_PORT: u16 = 7000;

    /// Default HTTP port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Largest frame accepted on a peer connection
    pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

    /// Lock-free ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Capacity of the session event broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
