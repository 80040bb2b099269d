//! # Recorder
//!
//! Linear undo history of a single animation frame. Recording after an undo discards the undone
//! actions: there is no branching history.

use crate::action::Action;

#[derive(Default, Debug, Clone)]
pub struct ActionRecorder {
    history: Vec<Action>,
    /// Number of actions currently applied, in `0..=history.len()`.
    cursor: usize,
}
impl ActionRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Append an action, first dropping every undone action after the cursor.
    /// Returns how many actions were dropped.
    pub fn record(&mut self, action: impl Into<Action>) -> usize {
        let dropped = self.history.len() - self.cursor;
        self.history.truncate(self.cursor);
        self.history.push(action.into());
        self.cursor = self.history.len();
        dropped
    }
    /// Step the cursor back by one. Returns false if there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        if self.can_undo() {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }
    /// Step the cursor forward by one. Returns false if there was nothing to redo.
    pub fn redo(&mut self) -> bool {
        if self.can_redo() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }
    /// Undo up to `num` actions, returning how many were undone.
    pub fn undo_n(&mut self, num: usize) -> usize {
        let steps = num.min(self.cursor);
        self.cursor -= steps;
        steps
    }
    /// Redo up to `num` actions, returning how many were redone.
    pub fn redo_n(&mut self, num: usize) -> usize {
        let steps = num.min(self.history.len() - self.cursor);
        self.cursor += steps;
        steps
    }
    /// The actions that should currently be visible, oldest first.
    #[must_use]
    pub fn active_history(&self) -> &[Action] {
        &self.history[..self.cursor]
    }
    /// Every recorded action, including undone ones.
    #[must_use]
    pub fn history(&self) -> &[Action] {
        &self.history
    }
    #[must_use]
    pub fn action_at(&self, index: usize) -> Option<&Action> {
        self.history.get(index)
    }
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor < self.history.len()
    }
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::ActionRecorder;
    use crate::{
        action::Action,
        color::Color,
        stroke::{PenState, Stroke},
    };

    /// A distinguishable stroke, tagged by its x position.
    fn stroke(tag: f32) -> Action {
        Stroke::new(&[PenState::new(tag, 0.0, 1.0)], Color::BLACK, 1.0)
            .unwrap()
            .into()
    }
    fn tags(actions: &[Action]) -> Vec<f32> {
        actions
            .iter()
            .map(|action| action.stroke().unwrap().states()[0].x)
            .collect()
    }
    #[test]
    fn empty_is_total() {
        let mut recorder = ActionRecorder::new();
        assert!(!recorder.can_undo());
        assert!(!recorder.can_redo());
        assert!(!recorder.undo());
        assert!(!recorder.redo());
        assert_eq!(recorder.cursor(), 0);
        assert!(recorder.active_history().is_empty());
    }
    #[test]
    fn undo_redo_branch() {
        let mut recorder = ActionRecorder::new();
        for tag in [1.0, 2.0, 3.0] {
            assert_eq!(recorder.record(stroke(tag)), 0);
        }
        assert_eq!(recorder.cursor(), 3);
        assert!(recorder.undo());
        assert_eq!(recorder.cursor(), 2);
        assert_eq!(tags(recorder.active_history()), [1.0, 2.0]);
        assert!(recorder.undo());
        assert_eq!(recorder.cursor(), 1);
        assert!(recorder.redo());
        assert_eq!(recorder.cursor(), 2);
        // Third stroke is discarded.
        assert_eq!(recorder.record(stroke(4.0)), 1);
        assert_eq!(tags(recorder.history()), [1.0, 2.0, 4.0]);
        assert_eq!(recorder.cursor(), 3);
        assert!(!recorder.can_redo());
    }
    #[test]
    fn truncation_length() {
        let mut recorder = ActionRecorder::new();
        for tag in 0..5 {
            recorder.record(stroke(tag as f32));
        }
        assert_eq!(recorder.undo_n(2), 2);
        assert_eq!(recorder.cursor(), 3);
        assert_eq!(recorder.record(stroke(10.0)), 2);
        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.cursor(), 4);
        assert_eq!(tags(recorder.history()), [0.0, 1.0, 2.0, 10.0]);
    }
    #[test]
    fn undo_redo_n_clamp() {
        let mut recorder = ActionRecorder::new();
        for tag in 0..3 {
            recorder.record(stroke(tag as f32));
        }
        assert_eq!(recorder.undo_n(10), 3);
        assert!(!recorder.can_undo());
        assert_eq!(recorder.redo_n(10), 3);
        assert_eq!(recorder.cursor(), recorder.len());
        // Invariants hold at every step.
        for _ in 0..3 {
            recorder.undo();
            assert_eq!(recorder.can_undo(), recorder.cursor() > 0);
            assert_eq!(recorder.can_redo(), recorder.cursor() < recorder.len());
        }
    }
}
