//! Lossless audio codec
//!
//! A FLAC-compatible stream encoder and decoder, each runnable on its own
//! worker thread. Encoders turn float PCM into compressed chunks; decoders
//! turn those chunks back into per-channel sample bytes.

pub mod bitstream;
pub mod decoder;
pub mod encoder;
pub mod format;
pub mod worker;

pub use decoder::{DecodeSession, DecodedBlock, DecoderEvent, DecoderHandle, StreamDecoder};
pub use encoder::{EncoderEvent, EncoderHandle, EncoderInput, StreamEncoder};
pub use format::StreamInfo;
pub use worker::{CodecSessionId, WorkerState};
