use super::op::Op;
use log::debug;

/// Linear undo/redo history with a position pointer.
///
/// `position` counts the ops currently applied; everything past it is
/// redoable. The log is "replaceable" right after a push, which lets the
/// next `push(op, true)` fold into the most recent step. A step may span
/// several ops when later ones were pushed with `push_linked`.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    ops: Vec<Op>,
    /// `linked[i]`: op `i` is undone and redone together with op `i - 1`
    linked: Vec<bool>,
    position: usize,
    replaceable: bool,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Op, replace: bool) {
        if replace && self.replaceable && self.position == self.ops.len() {
            if let Some(last) = self.ops.last_mut()
                && last.merge(&op)
            {
                debug!("merged op on '{}' into step {}", op.schema(), self.position);
                return;
            }
        }

        self.append(op, false);
        self.replaceable = true;
    }

    /// Records `op` as part of the current step.
    pub fn push_linked(&mut self, op: Op) {
        let linked = self.position > 0;
        self.append(op, linked);
        self.replaceable = false;
    }

    fn append(&mut self, op: Op, linked: bool) {
        self.ops.truncate(self.position);
        self.linked.truncate(self.position);
        self.ops.push(op);
        self.linked.push(linked);
        self.position = self.ops.len();
    }

    /// Steps back one step and returns its ops in the order to reverse them.
    pub fn undo(&mut self) -> Option<Vec<Op>> {
        self.replaceable = false;
        if self.position == 0 {
            return None;
        }
        let mut ops = Vec::new();
        loop {
            self.position -= 1;
            ops.push(self.ops[self.position].clone());
            if !self.linked[self.position] {
                return Some(ops);
            }
        }
    }

    /// Steps forward one step and returns its ops in the order to apply them.
    pub fn redo(&mut self) -> Option<Vec<Op>> {
        self.replaceable = false;
        let mut ops = vec![self.ops.get(self.position).cloned()?];
        self.position += 1;
        while self.position < self.ops.len() && self.linked[self.position] {
            ops.push(self.ops[self.position].clone());
            self.position += 1;
        }
        Some(ops)
    }

    /// Closes the current step without recording anything.
    pub fn create_state(&mut self) {
        self.replaceable = false;
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.linked.clear();
        self.position = 0;
        self.replaceable = false;
    }

    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        self.position < self.ops.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RowKey, Value};
    use std::collections::BTreeMap;

    fn edit(id: i64, from: i64, to: i64) -> Op {
        let cols = vec!["v".to_string()];
        let before = BTreeMap::from([(RowKey::Single(id), vec![Value::Integer(from)])]);
        let after = BTreeMap::from([(RowKey::Single(id), vec![Value::Integer(to)])]);
        Op::between("T", &cols, &before, &after)
    }

    #[test]
    fn test_undo_redo_walks_history() {
        let mut log = RecordLog::new();
        log.push(edit(0, 0, 1), false);
        log.push(edit(0, 1, 2), false);

        assert_eq!(log.undo(), Some(vec![edit(0, 1, 2)]));
        assert_eq!(log.undo(), Some(vec![edit(0, 0, 1)]));
        assert_eq!(log.undo(), None);
        assert_eq!(log.redo(), Some(vec![edit(0, 0, 1)]));
        assert_eq!(log.redo(), Some(vec![edit(0, 1, 2)]));
        assert_eq!(log.redo(), None);
    }

    #[test]
    fn test_replace_collapses_steps() {
        let mut log = RecordLog::new();
        log.push(edit(0, 0, 1), false);
        log.push(edit(0, 1, 2), true);
        log.push(edit(0, 2, 3), true);

        assert_eq!(log.len(), 1);
        assert_eq!(log.undo(), Some(vec![edit(0, 0, 3)]));
    }

    #[test]
    fn test_undo_ends_replaceability() {
        let mut log = RecordLog::new();
        log.push(edit(0, 0, 1), false);
        log.push(edit(0, 1, 2), false);
        log.undo();
        log.push(edit(0, 1, 5), true);

        assert_eq!(log.len(), 2);
        assert!(!log.can_redo());
        assert_eq!(log.undo(), Some(vec![edit(0, 1, 5)]));
    }

    #[test]
    fn test_linked_ops_form_one_step() {
        let mut log = RecordLog::new();
        log.push(edit(0, 0, 1), false);
        log.push(edit(1, 0, 7), false);
        log.push_linked(edit(0, 1, 2));

        assert_eq!(log.len(), 3);
        assert_eq!(log.undo(), Some(vec![edit(0, 1, 2), edit(1, 0, 7)]));
        assert_eq!(log.position(), 1);
        assert_eq!(log.redo(), Some(vec![edit(1, 0, 7), edit(0, 1, 2)]));
        assert!(!log.can_redo());

        log.push(edit(0, 2, 3), true);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_create_state_starts_new_step() {
        let mut log = RecordLog::new();
        log.push(edit(0, 0, 1), false);
        log.create_state();
        log.push(edit(0, 1, 2), true);
        assert_eq!(log.len(), 2);
    }
}
