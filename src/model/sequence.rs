use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;
use crate::model::{ActionId, ActionKind, GameAction};

/// Ordered, immutable list of actions.
///
/// Cloning is cheap (shared storage). Every edit returns a new sequence and the
/// receiver is left untouched. Equality compares the ordered actions, ids included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionSequence {
    actions: Arc<[GameAction]>,
}

impl ActionSequence {
    pub fn new(actions: Vec<GameAction>) -> Self {
        Self {
            actions: actions.into(),
        }
    }

    /// Build a sequence from a timeline of `(elapsed_ms_since_start, kind)` pairs,
    /// converting the absolute offsets to per-action delays. Out-of-order offsets
    /// produce a zero delay rather than a negative one.
    pub fn from_timeline<I>(timeline: I) -> Self
    where
        I: IntoIterator<Item = (u64, ActionKind)>,
    {
        let mut previous = 0u64;
        let actions = timeline
            .into_iter()
            .map(|(elapsed, kind)| {
                let delay = elapsed.saturating_sub(previous);
                previous = previous.max(elapsed);
                GameAction::new(kind, delay)
            })
            .collect();
        Self::new(actions)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GameAction> {
        self.actions.iter()
    }

    pub fn as_slice(&self) -> &[GameAction] {
        &self.actions
    }

    pub fn get(&self, index: usize) -> Option<&GameAction> {
        self.actions.get(index)
    }

    pub fn position(&self, id: ActionId) -> Option<usize> {
        self.actions.iter().position(|a| a.id() == id)
    }

    /// Sum of the per-action delays of the top-level actions.
    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.actions.iter().map(GameAction::delay_ms).sum())
    }

    /// Scheduled start of every action, measured from the sequence start.
    pub fn elapsed_offsets(&self) -> Vec<u64> {
        self.actions
            .iter()
            .scan(0u64, |elapsed, action| {
                *elapsed += action.delay_ms();
                Some(*elapsed)
            })
            .collect()
    }

    /// New sequence with `action` appended.
    #[must_use]
    pub fn with_action(&self, action: GameAction) -> Self {
        let mut actions = self.actions.to_vec();
        actions.push(action);
        Self::new(actions)
    }

    /// New sequence with `action` inserted before `index` (`index == len` appends).
    pub fn inserted(&self, index: usize, action: GameAction) -> Result<Self, ValidationError> {
        if index > self.len() {
            return Err(ValidationError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let mut actions = self.actions.to_vec();
        actions.insert(index, action);
        Ok(Self::new(actions))
    }

    /// New sequence without the action carrying `id`.
    pub fn without(&self, id: ActionId) -> Result<Self, ValidationError> {
        let index = self
            .position(id)
            .ok_or(ValidationError::UnknownAction(id))?;
        let mut actions = self.actions.to_vec();
        actions.remove(index);
        Ok(Self::new(actions))
    }

    /// New sequence with the action carrying `action.id()` replaced by `action`.
    pub fn replaced(&self, action: GameAction) -> Result<Self, ValidationError> {
        let index = self
            .position(action.id())
            .ok_or(ValidationError::UnknownAction(action.id()))?;
        let mut actions = self.actions.to_vec();
        actions[index] = action;
        Ok(Self::new(actions))
    }

    /// New sequence holding exactly the actions named by `ids`, in that order.
    ///
    /// A full permutation reorders everything; a partial list keeps only the named
    /// actions. Unknown or repeated ids are rejected.
    pub fn reordered(&self, ids: &[ActionId]) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut actions = Vec::with_capacity(ids.len());
        for &id in ids {
            if !seen.insert(id) {
                return Err(ValidationError::DuplicateAction(id));
            }
            let action = self
                .actions
                .iter()
                .find(|a| a.id() == id)
                .ok_or(ValidationError::UnknownAction(id))?;
            actions.push(action.clone());
        }
        Ok(Self::new(actions))
    }

    /// Validate every action (and nested sub-sequences) of a top-level sequence.
    pub fn validate(&self, max_depth: usize) -> Result<(), ValidationError> {
        self.validate_nested(0, max_depth)
    }

    pub(crate) fn validate_nested(&self, depth: usize, max_depth: usize) -> Result<(), ValidationError> {
        let mut seen = HashSet::with_capacity(self.len());
        for action in self.iter() {
            if !seen.insert(action.id()) {
                return Err(ValidationError::DuplicateAction(action.id()));
            }
            action.validate(depth, max_depth)?;
        }
        Ok(())
    }
}

impl From<Vec<GameAction>> for ActionSequence {
    fn from(actions: Vec<GameAction>) -> Self {
        Self::new(actions)
    }
}

impl FromIterator<GameAction> for ActionSequence {
    fn from_iter<T: IntoIterator<Item = GameAction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionSequence {
    type Item = &'a GameAction;
    type IntoIter = std::slice::Iter<'a, GameAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for ActionSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.actions.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<GameAction>::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Key, MouseButton};

    fn sample() -> ActionSequence {
        ActionSequence::new(vec![
            GameAction::key_down(Key::Char('a'), 0),
            GameAction::key_up(Key::Char('a'), 50),
            GameAction::mouse_move(10, 20, 25),
            GameAction::mouse_down(MouseButton::Left, 10, 20, 5),
        ])
    }

    #[test]
    fn total_duration_is_sum_of_deltas() {
        let seq = sample();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.total_duration(), Duration::from_millis(80));
        assert_eq!(seq.elapsed_offsets(), vec![0, 50, 75, 80]);
        assert_eq!(ActionSequence::default().total_duration(), Duration::ZERO);
    }

    #[test]
    fn add_then_remove_restores_content() {
        let seq = sample();
        let extra = GameAction::delay(300);
        let grown = seq.with_action(extra.clone());
        assert_eq!(grown.len(), 5);
        assert_eq!(seq.len(), 4, "original must be untouched");

        let restored = grown.without(extra.id()).unwrap();
        assert_eq!(restored, seq);
        assert_eq!(restored.total_duration(), seq.total_duration());
    }

    #[test]
    fn full_permutation_preserves_count_and_duration() {
        let seq = sample();
        let mut ids: Vec<_> = seq.iter().map(GameAction::id).collect();
        ids.reverse();
        let reversed = seq.reordered(&ids).unwrap();
        assert_eq!(reversed.len(), seq.len());
        assert_eq!(reversed.total_duration(), seq.total_duration());
        assert_eq!(reversed.get(0).unwrap().id(), ids[0]);
    }

    #[test]
    fn partial_reorder_keeps_only_named_actions() {
        let seq = sample();
        let ids = [seq.get(2).unwrap().id(), seq.get(0).unwrap().id()];
        let partial = seq.reordered(&ids).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.get(0).unwrap().id(), ids[0]);
        assert_eq!(partial.get(1).unwrap().id(), ids[1]);
    }

    #[test]
    fn reorder_rejects_unknown_and_duplicate_ids() {
        let seq = sample();
        let first = seq.get(0).unwrap().id();
        assert_eq!(
            seq.reordered(&[first, first]),
            Err(ValidationError::DuplicateAction(first))
        );
        let stranger = ActionId::new();
        assert_eq!(
            seq.reordered(&[stranger]),
            Err(ValidationError::UnknownAction(stranger))
        );
    }

    #[test]
    fn insert_checks_bounds() {
        let seq = sample();
        let a = GameAction::delay(1);
        let inserted = seq.inserted(1, a.clone()).unwrap();
        assert_eq!(inserted.position(a.id()), Some(1));
        assert!(matches!(
            seq.inserted(9, a),
            Err(ValidationError::IndexOutOfRange { index: 9, len: 4 })
        ));
    }

    #[test]
    fn timeline_becomes_deltas() {
        let seq = ActionSequence::from_timeline([
            (0, ActionKind::KeyDown { key: Key::Char('a') }),
            (50, ActionKind::KeyUp { key: Key::Char('a') }),
            (40, ActionKind::Delay),
        ]);
        let delays: Vec<_> = seq.iter().map(GameAction::delay_ms).collect();
        assert_eq!(delays, vec![0, 50, 0]);
    }

    #[test]
    fn serializes_as_plain_array() {
        let seq = sample();
        let json = serde_json::to_string(&seq).unwrap();
        assert!(json.starts_with('['));
        let back: ActionSequence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seq);
    }
}
