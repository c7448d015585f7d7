//! In-memory mixer model

use serde::Serialize;

use crate::codec::CodecSessionId;
use crate::error::TrackError;
use crate::protocol::{MixerAction, TrackId};

/// One track in the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    /// Name of the local capture source while one is attached
    pub capture: Option<String>,
    pub codec_session_id: Option<CodecSessionId>,
    pub recording: bool,
}

impl Track {
    fn new(id: TrackId) -> Self {
        Self {
            id,
            capture: None,
            codec_session_id: None,
            recording: false,
        }
    }
}

/// Master output bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterBus {
    /// Most recent level in dBFS
    pub meter_level: f32,
}

impl Default for MasterBus {
    fn default() -> Self {
        Self {
            meter_level: f32::NEG_INFINITY,
        }
    }
}

/// What applying an action changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Added(TrackId),
    Removed(TrackId),
}

/// Tracks in creation order plus the master bus
///
/// Ids come from a counter that only advances on `AddTrack`, so replaying
/// the same actions from empty always yields the same ids.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerState {
    tracks: Vec<Track>,
    pub master: MasterBus,
    next_id: TrackId,
}

impl Default for MixerState {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerState {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            master: MasterBus::default(),
            next_id: 1,
        }
    }

    /// Apply one topology action
    pub fn apply(&mut self, action: MixerAction) -> Result<Applied, TrackError> {
        match action {
            MixerAction::AddTrack => {
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(Track::new(id));
                Ok(Applied::Added(id))
            }
            MixerAction::RemoveTrack { id } => {
                let index = self
                    .tracks
                    .iter()
                    .position(|t| t.id == id)
                    .ok_or(TrackError::NotFound(id))?;
                self.tracks.remove(index);
                Ok(Applied::Removed(id))
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, TrackError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TrackError::NotFound(id))
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    /// Id the next `AddTrack` will assign
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_never_reused() {
        let mut state = MixerState::new();
        assert_eq!(state.apply(MixerAction::AddTrack), Ok(Applied::Added(1)));
        assert_eq!(state.apply(MixerAction::AddTrack), Ok(Applied::Added(2)));
        assert_eq!(
            state.apply(MixerAction::RemoveTrack { id: 2 }),
            Ok(Applied::Removed(2))
        );
        assert_eq!(state.apply(MixerAction::AddTrack), Ok(Applied::Added(3)));
        assert_eq!(state.track_ids(), vec![1, 3]);
    }

    #[test]
    fn test_remove_unknown_track() {
        let mut state = MixerState::new();
        state.apply(MixerAction::AddTrack).unwrap();
        assert_eq!(
            state.apply(MixerAction::RemoveTrack { id: 9 }),
            Err(TrackError::NotFound(9))
        );
        assert_eq!(state.track_ids(), vec![1]);
    }

    #[test]
    fn test_track_mut_updates_flags() {
        let mut state = MixerState::new();
        state.apply(MixerAction::AddTrack).unwrap();
        state.track_mut(1).unwrap().recording = true;
        assert!(state.track(1).unwrap().recording);
        assert!(state.track_mut(5).is_err());
        assert_eq!(state.master.meter_level, f32::NEG_INFINITY);
    }
}
