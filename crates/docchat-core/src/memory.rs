//! Bounded conversation memory.
//!
//! A fixed-capacity ring buffer of [`ConversationTurn`]s. Appending to a full
//! buffer overwrites the oldest turn, so the buffer always holds the most
//! recent `capacity` turns in insertion order.

use crate::error::{RagError, Result};
use crate::models::ConversationTurn;

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    slots: Vec<Option<ConversationTurn>>,
    /// Slot holding the oldest retained turn.
    head: usize,
    len: usize,
}

impl ConversationMemory {
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RagError::InvalidConfiguration(
                "memory capacity must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a turn, evicting the oldest one when full.
    pub fn append(&mut self, turn: ConversationTurn) {
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        self.slots[tail] = Some(turn);
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let take = n.min(self.len);
        let skip = self.len - take;
        (skip..self.len)
            .filter_map(|i| self.slots[(self.head + i) % self.capacity()].clone())
            .collect()
    }

    /// Every retained turn, oldest first.
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.recent(self.len)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.slots[idx].as_ref()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn turn(i: usize) -> ConversationTurn {
        ConversationTurn::new(format!("q{i}"), format!("a{i}"), vec![])
    }

    fn questions(turns: &[ConversationTurn]) -> Vec<String> {
        turns.iter().map(|t| t.question.clone()).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ConversationMemory::new(0),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_recent_oldest_first() {
        let mut m = ConversationMemory::new(5).unwrap();
        for i in 0..3 {
            m.append(turn(i));
        }
        assert_eq!(questions(&m.recent(2)), vec!["q1", "q2"]);
        assert_eq!(questions(&m.recent(10)), vec!["q0", "q1", "q2"]);
        assert!(m.recent(0).is_empty());
    }

    #[test]
    fn test_fifo_eviction_by_content() {
        let mut m = ConversationMemory::new(3).unwrap();
        for i in 0..7 {
            m.append(turn(i));
        }
        assert_eq!(m.len(), 3);
        assert_eq!(questions(&m.turns()), vec!["q4", "q5", "q6"]);
        assert_eq!(m.last().map(|t| t.answer.as_str()), Some("a6"));
    }

    #[test]
    fn test_clear() {
        let mut m = ConversationMemory::new(2).unwrap();
        m.append(turn(0));
        m.append(turn(1));
        m.append(turn(2));
        m.clear();
        assert!(m.is_empty());
        assert!(m.last().is_none());
        m.append(turn(9));
        assert_eq!(questions(&m.turns()), vec!["q9"]);
    }

    proptest! {
        #[test]
        fn prop_retains_exactly_most_recent(capacity in 1usize..10, appended in 0usize..40) {
            let mut m = ConversationMemory::new(capacity).unwrap();
            for i in 0..appended {
                m.append(turn(i));
            }
            let expected: Vec<String> = (appended.saturating_sub(capacity)..appended)
                .map(|i| format!("q{i}"))
                .collect();
            prop_assert_eq!(questions(&m.turns()), expected);
        }
    }
}
