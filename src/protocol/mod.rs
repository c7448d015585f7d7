//! Peer wire protocol

pub mod message;
pub mod wire;

pub use message::{MixerAction, PeerMessage, RawMessage, TrackId, Transport};
pub use wire::{read_frame, write_frame, Hello, WireFrame};
