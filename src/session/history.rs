//! Append-only log of replicated actions

use super::state::MixerState;
use crate::protocol::MixerAction;

/// Ordered record of every applied topology action
///
/// Never compacted; a newly joined peer receives the whole log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionHistory {
    entries: Vec<MixerAction>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: MixerAction) {
        self.entries.push(entry);
    }

    /// Full ordered copy for a sync message
    pub fn snapshot(&self) -> Vec<MixerAction> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[MixerAction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild a mixer state from an empty one
    ///
    /// Entries that no longer apply (removing an absent track) are skipped.
    pub fn replay(entries: &[MixerAction]) -> MixerState {
        let mut state = MixerState::new();
        for &entry in entries {
            let _ = state.apply(entry);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TrackId;
    use proptest::prelude::*;

    fn action() -> impl Strategy<Value = MixerAction> {
        prop_oneof![
            3 => Just(MixerAction::AddTrack),
            1 => (1u32..12).prop_map(|id: TrackId| MixerAction::RemoveTrack { id }),
        ]
    }

    #[test]
    fn test_snapshot_keeps_order() {
        let mut history = ActionHistory::new();
        history.append(MixerAction::AddTrack);
        history.append(MixerAction::RemoveTrack { id: 1 });
        history.append(MixerAction::AddTrack);
        assert_eq!(
            history.snapshot(),
            vec![
                MixerAction::AddTrack,
                MixerAction::RemoveTrack { id: 1 },
                MixerAction::AddTrack
            ]
        );
        assert_eq!(ActionHistory::replay(history.entries()).track_ids(), vec![2]);
    }

    proptest! {
        #[test]
        fn test_replay_reconstructs_state(actions in prop::collection::vec(action(), 0..60)) {
            let mut live = MixerState::new();
            let mut history = ActionHistory::new();
            for action in actions {
                if live.apply(action).is_ok() {
                    history.append(action);
                }
            }

            let replayed = ActionHistory::replay(&history.snapshot());
            prop_assert_eq!(replayed.track_ids(), live.track_ids());
            prop_assert_eq!(replayed.next_id(), live.next_id());

            // a second peer replaying the same log agrees too
            let other = ActionHistory::replay(history.entries());
            prop_assert_eq!(other, replayed);
        }
    }
}
