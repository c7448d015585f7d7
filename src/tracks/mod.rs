//! Track playback

pub mod playback;

pub use playback::{seek_fraction, PlaybackEngine, PlaybackState, PlaybackStatus, TransportClock};
