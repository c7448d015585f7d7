//! Per-track playback engines
//!
//! Transport commands never touch the mixer state; they are routed to the
//! engine owned by the track. Engines take seek positions as a fraction of
//! their own media duration.

use serde::Serialize;
use std::time::Instant;

/// Transport state of one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Snapshot of an engine for observers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub position_seconds: f64,
    pub duration_seconds: f64,
}

/// Render side of a track
pub trait PlaybackEngine: Send {
    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    fn play_pause(&mut self) {
        if self.state() == PlaybackState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Seek to `fraction` of the media, clamped to [0, 1]
    fn seek(&mut self, fraction: f64);

    fn state(&self) -> PlaybackState;

    fn position(&self) -> f64;

    /// Length of the locally available media in seconds
    fn duration(&self) -> f64;

    /// More decoded audio is available
    fn extend(&mut self, seconds: f64);

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state(),
            position_seconds: self.position(),
            duration_seconds: self.duration(),
        }
    }
}

/// Wall-clock transport over a growing media length
///
/// Stands in for a render device: it tracks where playback would be
/// without producing output.
pub struct TransportClock {
    state: PlaybackState,
    duration: f64,
    /// Position when playback last started or was paused
    anchor: f64,
    started: Option<Instant>,
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClock {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            duration: 0.0,
            anchor: 0.0,
            started: None,
        }
    }

    fn elapsed(&self) -> f64 {
        self.started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PlaybackEngine for TransportClock {
    fn play(&mut self) {
        if self.state == PlaybackState::Playing {
            return;
        }
        if self.anchor >= self.duration {
            self.anchor = 0.0;
        }
        self.state = PlaybackState::Playing;
        self.started = Some(Instant::now());
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.anchor = self.position();
        self.started = None;
        self.state = PlaybackState::Paused;
    }

    fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.anchor = 0.0;
        self.started = None;
    }

    fn seek(&mut self, fraction: f64) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.anchor = fraction * self.duration;
        if self.state == PlaybackState::Playing {
            self.started = Some(Instant::now());
        }
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn position(&self) -> f64 {
        (self.anchor + self.elapsed()).min(self.duration)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn extend(&mut self, seconds: f64) {
        if seconds > 0.0 {
            self.duration += seconds;
        }
    }
}

/// Convert a remote position in seconds to this engine's fraction
///
/// Peers may hold slightly different media lengths, so this is a best
/// effort. Returns `None` when there is no local media to seek in.
pub fn seek_fraction(position_seconds: f64, duration_seconds: f64) -> Option<f64> {
    if duration_seconds <= 0.0 || !position_seconds.is_finite() {
        return None;
    }
    Some((position_seconds / duration_seconds).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_states() {
        let mut clock = TransportClock::new();
        clock.extend(10.0);
        assert_eq!(clock.state(), PlaybackState::Stopped);

        clock.play();
        assert_eq!(clock.state(), PlaybackState::Playing);
        clock.pause();
        assert_eq!(clock.state(), PlaybackState::Paused);
        clock.play_pause();
        assert_eq!(clock.state(), PlaybackState::Playing);
        clock.play_pause();
        assert_eq!(clock.state(), PlaybackState::Paused);

        clock.stop();
        assert_eq!(clock.state(), PlaybackState::Stopped);
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_seek_uses_local_duration() {
        let mut clock = TransportClock::new();
        clock.extend(4.0);
        clock.seek(0.5);
        assert_eq!(clock.position(), 2.0);
        clock.seek(3.0);
        assert_eq!(clock.position(), 4.0);
        clock.seek(f64::NAN);
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_seek_fraction_conversion() {
        assert_eq!(seek_fraction(1.0, 4.0), Some(0.25));
        // remote media slightly longer than ours
        assert_eq!(seek_fraction(4.1, 4.0), Some(1.0));
        assert_eq!(seek_fraction(1.0, 0.0), None);
    }

    #[test]
    fn test_status_snapshot() {
        let mut clock = TransportClock::new();
        clock.extend(2.0);
        clock.extend(-1.0);
        let status = clock.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.duration_seconds, 2.0);
    }
}
