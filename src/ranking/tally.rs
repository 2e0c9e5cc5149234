//! Mention frequency table.

use std::collections::{HashMap, HashSet};

use crate::source::MentionedUser;

/// Member id -> number of in-range messages mentioning that member.
///
/// Purely additive. A message contributes at most one to each member, no
/// matter how many times it mentions them, and never counts automated accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionTally {
    counts: HashMap<String, u64>,
}

impl MentionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message's mentions. Returns how many members were credited.
    pub fn record_message(&mut self, mentions: &[MentionedUser]) -> u64 {
        let distinct: HashSet<&str> = mentions
            .iter()
            .filter(|m| !m.bot)
            .map(|m| m.id.as_str())
            .collect();

        for member_id in &distinct {
            *self.counts.entry((*member_id).to_string()).or_insert(0) += 1;
        }
        distinct.len() as u64
    }

    pub fn count(&self, member_id: &str) -> u64 {
        self.counts.get(member_id).copied().unwrap_or(0)
    }

    /// Number of distinct members mentioned.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Consume the tally as (member id, count) pairs ordered by member id.
    pub fn into_sorted_entries(self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self.counts.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human(id: &str) -> MentionedUser {
        MentionedUser {
            id: id.to_string(),
            bot: false,
        }
    }

    #[test]
    fn test_repeated_mention_in_one_message_counts_once() {
        let mut tally = MentionTally::new();
        let credited = tally.record_message(&[human("u1"), human("u1"), human("u1")]);
        assert_eq!(credited, 1);
        assert_eq!(tally.count("u1"), 1);
    }

    #[test]
    fn test_same_mention_set_n_times_adds_n() {
        let mut tally = MentionTally::new();
        for _ in 0..7 {
            tally.record_message(&[human("u1"), human("u2"), human("u1")]);
        }
        assert_eq!(tally.count("u1"), 7);
        assert_eq!(tally.count("u2"), 7);
        assert_eq!(tally.total(), 14);
    }

    #[test]
    fn test_bots_are_not_counted() {
        let mut tally = MentionTally::new();
        let credited = tally.record_message(&[
            human("u1"),
            MentionedUser {
                id: "bot".to_string(),
                bot: true,
            },
        ]);
        assert_eq!(credited, 1);
        assert_eq!(tally.count("bot"), 0);
        assert_eq!(tally.len(), 1);
    }

    #[test]
    fn test_message_without_mentions_changes_nothing() {
        let mut tally = MentionTally::new();
        assert_eq!(tally.record_message(&[]), 0);
        assert!(tally.is_empty());
    }

    #[test]
    fn test_sorted_entries_are_ordered_by_member_id() {
        let mut tally = MentionTally::new();
        tally.record_message(&[human("c"), human("a")]);
        tally.record_message(&[human("b")]);
        let ids: Vec<String> = tally.into_sorted_entries().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
