//! Append-only conversation memory keyed by (round, topic, subtopic).
//!
//! Turns carry a monotonic sequence number. Appends are idempotent under
//! at-least-once delivery: a turn whose sequence number already exists in its
//! node is rejected, and out-of-order delivery is repaired by inserting in
//! sequence order.

use crate::curriculum::RoundId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single utterance, immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub content: String,
    /// Monotonic logical timestamp, unique within a memory node.
    pub seq: u64,
}

/// Identifies one conversation log within an interview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub round: RoundId,
    pub topic: String,
    pub subtopic: String,
}

impl NodeKey {
    pub fn new(round: RoundId, topic: impl Into<String>, subtopic: impl Into<String>) -> Self {
        Self {
            round,
            topic: topic.into(),
            subtopic: subtopic.into(),
        }
    }
}

/// Per-session conversation history and summary rollups.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    nodes: BTreeMap<NodeKey, Vec<ConversationTurn>>,
    subtopic_summaries: BTreeMap<NodeKey, Vec<String>>,
    topic_rollups: BTreeMap<(RoundId, String), Vec<String>>,
    topic_digests: BTreeMap<(RoundId, String), String>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn to its node, creating the node if absent.
    ///
    /// Returns false when a turn with the same sequence number is already
    /// present (duplicate delivery). Insertion keeps the node sorted by
    /// sequence number regardless of arrival order.
    pub fn append(&mut self, key: NodeKey, turn: ConversationTurn) -> bool {
        let turns = self.nodes.entry(key).or_default();
        match turns.binary_search_by_key(&turn.seq, |t| t.seq) {
            Ok(_) => false,
            Err(pos) => {
                turns.insert(pos, turn);
                true
            }
        }
    }

    /// Ordered turns for a node; empty slice when the node does not exist.
    pub fn turns(&self, key: &NodeKey) -> &[ConversationTurn] {
        self.nodes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest sequence number seen across all nodes.
    pub fn max_seq(&self) -> u64 {
        self.nodes
            .values()
            .filter_map(|turns| turns.last())
            .map(|turn| turn.seq)
            .max()
            .unwrap_or(0)
    }

    /// Records summaries for a closed subtopic, extending both the
    /// per-subtopic list and the owning topic's rollup.
    pub fn push_subtopic_summaries(&mut self, key: NodeKey, summaries: Vec<String>) {
        let rollup_key = (key.round, key.topic.clone());
        self.topic_rollups
            .entry(rollup_key)
            .or_default()
            .extend(summaries.iter().cloned());
        self.subtopic_summaries
            .entry(key)
            .or_default()
            .extend(summaries);
    }

    pub fn subtopic_summaries(&self, key: &NodeKey) -> &[String] {
        self.subtopic_summaries
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Accumulated subtopic summaries for a topic, in the order they closed.
    pub fn topic_rollup(&self, round: RoundId, topic: &str) -> &[String] {
        self.topic_rollups
            .get(&(round, topic.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Stores the condensed one-string digest of a finished topic.
    pub fn set_topic_digest(&mut self, round: RoundId, topic: &str, digest: String) {
        self.topic_digests.insert((round, topic.to_string()), digest);
    }

    pub fn topic_digest(&self, round: RoundId, topic: &str) -> Option<&str> {
        self.topic_digests
            .get(&(round, topic.to_string()))
            .map(String::as_str)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            nodes: self
                .nodes
                .iter()
                .map(|(key, turns)| NodeRecord {
                    key: key.clone(),
                    turns: turns.clone(),
                })
                .collect(),
            subtopic_summaries: self
                .subtopic_summaries
                .iter()
                .map(|(key, summaries)| SummaryRecord {
                    key: key.clone(),
                    summaries: summaries.clone(),
                })
                .collect(),
            topic_rollups: self
                .topic_rollups
                .iter()
                .map(|((round, topic), summaries)| TopicRollupRecord {
                    round: *round,
                    topic: topic.clone(),
                    summaries: summaries.clone(),
                })
                .collect(),
            topic_digests: self
                .topic_digests
                .iter()
                .map(|((round, topic), digest)| TopicDigestRecord {
                    round: *round,
                    topic: topic.clone(),
                    digest: digest.clone(),
                })
                .collect(),
        }
    }

    pub fn restore(snapshot: MemorySnapshot) -> Self {
        let mut memory = Self::new();
        for record in snapshot.nodes {
            for turn in record.turns {
                memory.append(record.key.clone(), turn);
            }
        }
        for record in snapshot.subtopic_summaries {
            memory.subtopic_summaries.insert(record.key, record.summaries);
        }
        for record in snapshot.topic_rollups {
            memory
                .topic_rollups
                .insert((record.round, record.topic), record.summaries);
        }
        for record in snapshot.topic_digests {
            memory
                .topic_digests
                .insert((record.round, record.topic), record.digest);
        }
        memory
    }
}

// Snapshot records use explicit vectors because struct-valued map keys have
// no JSON representation.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub key: NodeKey,
    pub summaries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRollupRecord {
    pub round: RoundId,
    pub topic: String,
    pub summaries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDigestRecord {
    pub round: RoundId,
    pub topic: String,
    pub digest: String,
}

/// Serializable snapshot of one session's conversation memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub nodes: Vec<NodeRecord>,
    pub subtopic_summaries: Vec<SummaryRecord>,
    pub topic_rollups: Vec<TopicRollupRecord>,
    pub topic_digests: Vec<TopicDigestRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NodeKey {
        NodeKey::new(RoundId::RoundOne, "Background", "Education")
    }

    fn turn(speaker: &str, content: &str, seq: u64) -> ConversationTurn {
        ConversationTurn {
            speaker: speaker.to_string(),
            content: content.to_string(),
            seq,
        }
    }

    #[test]
    fn out_of_order_delivery_is_sorted_by_sequence() {
        let mut memory = ConversationMemory::new();
        assert!(memory.append(key(), turn("B", "hello", 2)));
        assert!(memory.append(key(), turn("A", "hi", 1)));
        let turns = memory.turns(&key());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].seq, 1);
        assert_eq!(turns[1].seq, 2);
    }

    #[test]
    fn duplicate_sequence_numbers_are_rejected() {
        let mut memory = ConversationMemory::new();
        assert!(memory.append(key(), turn("A", "hi", 1)));
        assert!(!memory.append(key(), turn("A", "hi again", 1)));
        assert_eq!(memory.turns(&key()).len(), 1);
        assert_eq!(memory.turns(&key())[0].content, "hi");
    }

    #[test]
    fn turns_for_missing_node_is_empty_not_panicking() {
        let memory = ConversationMemory::new();
        assert!(memory.turns(&key()).is_empty());
        assert!(memory.subtopic_summaries(&key()).is_empty());
        assert!(memory.topic_rollup(RoundId::RoundOne, "Background").is_empty());
    }

    #[test]
    fn subtopic_summaries_feed_the_topic_rollup() {
        let mut memory = ConversationMemory::new();
        memory.push_subtopic_summaries(key(), vec!["covered degrees".to_string()]);
        let other = NodeKey::new(RoundId::RoundOne, "Background", "Experience");
        memory.push_subtopic_summaries(other.clone(), vec!["covered jobs".to_string()]);

        assert_eq!(memory.subtopic_summaries(&key()), ["covered degrees"]);
        assert_eq!(
            memory.topic_rollup(RoundId::RoundOne, "Background"),
            ["covered degrees", "covered jobs"]
        );
    }

    #[test]
    fn snapshot_round_trip_preserves_order_without_duplicates() {
        let mut memory = ConversationMemory::new();
        memory.append(key(), turn("B", "hello", 2));
        memory.append(key(), turn("A", "hi", 1));
        memory.push_subtopic_summaries(key(), vec!["summary".to_string()]);
        memory.set_topic_digest(RoundId::RoundOne, "Background", "digest".to_string());

        let bytes = serde_json::to_vec(&memory.snapshot()).unwrap();
        let restored = ConversationMemory::restore(serde_json::from_slice(&bytes).unwrap());

        assert_eq!(restored.turns(&key()), memory.turns(&key()));
        assert_eq!(restored.subtopic_summaries(&key()), ["summary"]);
        assert_eq!(
            restored.topic_digest(RoundId::RoundOne, "Background"),
            Some("digest")
        );
        assert_eq!(restored.max_seq(), 2);
    }
}
