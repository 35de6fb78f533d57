//! The interview topic tracker: curriculum position, conversation memory and
//! completion state for one session.
//!
//! The tracker holds no hidden cursor. `current_position` is a pure forward
//! scan of completion state in curriculum order, so the caller (the
//! orchestration loop) owns the only mutable cursor in the system. Completion
//! flags are set exactly once and never unset; subtopic, topic and round
//! completion are derived from section flags rather than stored, which makes
//! the completion cascade atomic by construction.

use crate::curriculum::{Curriculum, RoundId};
use crate::error::ConfigError;
use crate::memory::{ConversationMemory, ConversationTurn, MemorySnapshot, NodeKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Fully-qualified reference to the smallest completable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionRef {
    pub round: RoundId,
    pub topic: String,
    pub subtopic: String,
    pub section: String,
}

/// The earliest not-yet-completed position within a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    pub topic: String,
    pub subtopic: String,
    pub section: String,
}

/// Snapshot of everything the tracker owns besides the curriculum, which is
/// reloaded separately on recovery.
#[derive(Debug, Serialize, Deserialize)]
struct TrackerSnapshot {
    memory: MemorySnapshot,
    completed: Vec<SectionRef>,
    rounds_reported: Vec<RoundId>,
    next_seq: u64,
}

pub struct InterviewTopicTracker {
    curriculum: Curriculum,
    memory: ConversationMemory,
    completed: HashSet<SectionRef>,
    /// Rounds whose completion has already been reported to the caller, so
    /// `round_changed` fires exactly once per round.
    rounds_reported: HashSet<RoundId>,
    next_seq: u64,
}

impl InterviewTopicTracker {
    pub fn new(curriculum: Curriculum) -> Self {
        Self {
            curriculum,
            memory: ConversationMemory::new(),
            completed: HashSet::new(),
            rounds_reported: HashSet::new(),
            next_seq: 1,
        }
    }

    /// Loads and validates a curriculum from JSON, failing with `ConfigError`
    /// on malformed input.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(Curriculum::from_json(raw)?))
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    /// The sequence number to stamp on the next confirmed utterance.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// First incomplete (topic, subtopic, section) of the round in curriculum
    /// order, scanned from the start on every call.
    ///
    /// Returns `(None, true)` exactly once when the round has just become
    /// fully complete; `(None, false)` on every later call for that round.
    /// A round absent from the curriculum is never reported complete,
    /// matching `is_round_complete`.
    pub fn current_position(&mut self, round: RoundId) -> (Option<CursorPosition>, bool) {
        let topics = self.curriculum.topics(round);
        if topics.is_empty() {
            return (None, false);
        }
        for topic in topics {
            for subtopic in &topic.subtopics {
                for section in &subtopic.sections {
                    let reference = SectionRef {
                        round,
                        topic: topic.name.clone(),
                        subtopic: subtopic.name.clone(),
                        section: section.clone(),
                    };
                    if !self.completed.contains(&reference) {
                        return (
                            Some(CursorPosition {
                                topic: reference.topic,
                                subtopic: reference.subtopic,
                                section: reference.section,
                            }),
                            false,
                        );
                    }
                }
            }
        }
        let first_report = self.rounds_reported.insert(round);
        (None, first_report)
    }

    /// Appends a confirmed utterance to the matching memory node.
    ///
    /// Unknown (round, topic, subtopic) names are logged and dropped rather
    /// than raised, tolerating decision-layer drift toward stale names. A
    /// duplicate sequence number is likewise dropped. Returns whether the
    /// turn was actually stored.
    pub fn append_turn(
        &mut self,
        round: RoundId,
        topic: &str,
        subtopic: &str,
        turn: ConversationTurn,
    ) -> bool {
        if !self.curriculum.contains_node(round, topic, subtopic) {
            warn!(
                %round,
                topic,
                subtopic,
                speaker = %turn.speaker,
                "memory mismatch: dropping turn for unknown curriculum node"
            );
            return false;
        }
        let seq = turn.seq;
        let stored = self
            .memory
            .append(NodeKey::new(round, topic, subtopic), turn);
        if stored {
            self.next_seq = self.next_seq.max(seq + 1);
        } else {
            debug!(%round, topic, subtopic, seq, "duplicate turn delivery ignored");
        }
        stored
    }

    /// Marks a section complete. Idempotent: re-marking is a no-op. Unknown
    /// sections are logged and ignored.
    pub fn mark_section_complete(
        &mut self,
        round: RoundId,
        topic: &str,
        subtopic: &str,
        section: &str,
    ) {
        let known = self
            .curriculum
            .subtopic(round, topic, subtopic)
            .map(|st| st.sections.iter().any(|s| s == section))
            .unwrap_or(false);
        if !known {
            warn!(%round, topic, subtopic, section, "ignoring completion of unknown section");
            return;
        }
        let inserted = self.completed.insert(SectionRef {
            round,
            topic: topic.to_string(),
            subtopic: subtopic.to_string(),
            section: section.to_string(),
        });
        if !inserted {
            debug!(%round, topic, subtopic, section, "section already complete");
        }
    }

    pub fn is_subtopic_complete(&self, round: RoundId, topic: &str, subtopic: &str) -> bool {
        match self.curriculum.subtopic(round, topic, subtopic) {
            Some(st) => st.sections.iter().all(|section| {
                self.completed.contains(&SectionRef {
                    round,
                    topic: topic.to_string(),
                    subtopic: subtopic.to_string(),
                    section: section.clone(),
                })
            }),
            None => false,
        }
    }

    pub fn is_topic_complete(&self, round: RoundId, topic: &str) -> bool {
        match self.curriculum.topic(round, topic) {
            Some(t) => t
                .subtopics
                .iter()
                .all(|st| self.is_subtopic_complete(round, topic, &st.name)),
            None => false,
        }
    }

    pub fn is_round_complete(&self, round: RoundId) -> bool {
        let topics = self.curriculum.topics(round);
        !topics.is_empty()
            && topics
                .iter()
                .all(|topic| self.is_topic_complete(round, &topic.name))
    }

    /// Names of the topic's not-yet-complete subtopics, in curriculum order.
    pub fn uncompleted_subtopics(&self, round: RoundId, topic: &str) -> Vec<String> {
        self.curriculum
            .topic(round, topic)
            .map(|t| {
                t.subtopics
                    .iter()
                    .filter(|st| !self.is_subtopic_complete(round, topic, &st.name))
                    .map(|st| st.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ordered turns for one subtopic; empty when nothing was recorded.
    pub fn history_for_subtopic(
        &self,
        round: RoundId,
        topic: &str,
        subtopic: &str,
    ) -> &[ConversationTurn] {
        self.memory.turns(&NodeKey::new(round, topic, subtopic))
    }

    /// Concatenated history across the topic's subtopics in curriculum order.
    pub fn history_for_topic(&self, round: RoundId, topic: &str) -> Vec<ConversationTurn> {
        let mut turns = Vec::new();
        if let Some(t) = self.curriculum.topic(round, topic) {
            for subtopic in &t.subtopics {
                turns.extend_from_slice(self.history_for_subtopic(round, topic, &subtopic.name));
            }
        }
        turns
    }

    pub fn add_subtopic_summary(
        &mut self,
        round: RoundId,
        topic: &str,
        subtopic: &str,
        summaries: Vec<String>,
    ) {
        self.memory
            .push_subtopic_summaries(NodeKey::new(round, topic, subtopic), summaries);
    }

    pub fn subtopic_summaries(&self, round: RoundId, topic: &str, subtopic: &str) -> &[String] {
        self.memory
            .subtopic_summaries(&NodeKey::new(round, topic, subtopic))
    }

    /// The topic's accumulated rollup of subtopic summaries.
    pub fn topic_summary(&self, round: RoundId, topic: &str) -> Vec<String> {
        self.memory.topic_rollup(round, topic).to_vec()
    }

    /// Stores the condensed digest produced when a topic closes.
    pub fn set_topic_digest(&mut self, round: RoundId, topic: &str, digest: String) {
        self.memory.set_topic_digest(round, topic, digest);
    }

    /// Summaries of the round's completed topics, in curriculum order. A
    /// topic's cached digest stands in for its rollup once one exists.
    pub fn completed_topics_summary(&self, round: RoundId) -> Vec<String> {
        let mut summaries = Vec::new();
        for topic in self.curriculum.topics(round) {
            if !self.is_topic_complete(round, &topic.name) {
                continue;
            }
            match self.memory.topic_digest(round, &topic.name) {
                Some(digest) => summaries.push(digest.to_string()),
                None => summaries.extend(self.topic_summary(round, &topic.name)),
            }
        }
        summaries
    }

    /// Deduplicated union of the round's evaluation criteria, for the scoring
    /// stage.
    pub fn metrics_for_round(&self, round: RoundId) -> Vec<String> {
        self.curriculum.metrics_for_round(round)
    }

    /// Full snapshot of memory and completion state as JSON bytes. The
    /// curriculum is not included; it is reloaded separately.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        let snapshot = TrackerSnapshot {
            memory: self.memory.snapshot(),
            completed: self.completed.iter().cloned().collect(),
            rounds_reported: self.rounds_reported.iter().copied().collect(),
            next_seq: self.next_seq,
        };
        serde_json::to_vec(&snapshot)
    }

    /// Restores memory and completion state from a `serialize` snapshot,
    /// replacing whatever the tracker currently holds.
    pub fn restore_from(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        let snapshot: TrackerSnapshot = serde_json::from_slice(bytes)?;
        self.memory = ConversationMemory::restore(snapshot.memory);
        self.completed = snapshot.completed.into_iter().collect();
        self.rounds_reported = snapshot.rounds_reported.into_iter().collect();
        self.next_seq = snapshot.next_seq.max(self.memory.max_seq() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{RoundPlan, Subtopic, Topic};

    fn subtopic(name: &str, sections: &[&str]) -> Subtopic {
        Subtopic {
            name: name.to_string(),
            description: String::new(),
            sections: sections.iter().map(|s| s.to_string()).collect(),
            time_limit_minutes: 5.0,
        }
    }

    fn topic(name: &str, subtopics: Vec<Subtopic>, criteria: &[&str]) -> Topic {
        Topic {
            name: name.to_string(),
            subtopics,
            evaluation_criteria: criteria.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// One round, one topic "Intro", two single-section subtopics.
    fn intro_tracker() -> InterviewTopicTracker {
        let curriculum = Curriculum::new(vec![RoundPlan {
            round: RoundId::RoundOne,
            topics: vec![topic(
                "Intro",
                vec![
                    subtopic("Warmup", &["icebreaker"]),
                    subtopic("Goals", &["motivation"]),
                ],
                &["communication", "clarity"],
            )],
        }])
        .unwrap();
        InterviewTopicTracker::new(curriculum)
    }

    fn two_round_tracker() -> InterviewTopicTracker {
        let curriculum = Curriculum::new(vec![
            RoundPlan {
                round: RoundId::RoundOne,
                topics: vec![topic(
                    "Background",
                    vec![subtopic("Education", &["degrees", "projects"])],
                    &["clarity"],
                )],
            },
            RoundPlan {
                round: RoundId::RoundTwo,
                topics: vec![topic(
                    "Systems",
                    vec![subtopic("Design", &["scaling"])],
                    &["depth"],
                )],
            },
        ])
        .unwrap();
        InterviewTopicTracker::new(curriculum)
    }

    fn turn(speaker: &str, content: &str, seq: u64) -> ConversationTurn {
        ConversationTurn {
            speaker: speaker.to_string(),
            content: content.to_string(),
            seq,
        }
    }

    #[test]
    fn cursor_never_moves_backwards() {
        // P1: positions returned after completions are never earlier than a
        // completed section.
        let mut tracker = intro_tracker();
        let (pos, _) = tracker.current_position(RoundId::RoundOne);
        assert_eq!(pos.unwrap().subtopic, "Warmup");

        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        let (pos, changed) = tracker.current_position(RoundId::RoundOne);
        assert!(!changed);
        assert_eq!(pos.unwrap().subtopic, "Goals");

        // Scanning again does not revisit the completed section.
        let (pos, _) = tracker.current_position(RoundId::RoundOne);
        assert_eq!(pos.unwrap().subtopic, "Goals");
    }

    #[test]
    fn completion_is_idempotent() {
        // P2: a second mark leaves all observable state unchanged.
        let mut tracker = intro_tracker();
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        let snapshot = tracker.serialize().unwrap();

        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        assert_eq!(tracker.serialize().unwrap(), snapshot);
    }

    #[test]
    fn completion_cascade_is_atomic() {
        // P4: finishing the last section flips subtopic and topic completion
        // in the same call.
        let mut tracker = intro_tracker();
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        assert!(tracker.is_subtopic_complete(RoundId::RoundOne, "Intro", "Warmup"));
        assert!(!tracker.is_topic_complete(RoundId::RoundOne, "Intro"));

        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Goals", "motivation");
        assert!(tracker.is_subtopic_complete(RoundId::RoundOne, "Intro", "Goals"));
        assert!(tracker.is_topic_complete(RoundId::RoundOne, "Intro"));
        assert!(tracker.is_round_complete(RoundId::RoundOne));
    }

    #[test]
    fn round_changed_fires_exactly_once() {
        // P5 and Scenario A.
        let mut tracker = intro_tracker();
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Goals", "motivation");

        let (pos, changed) = tracker.current_position(RoundId::RoundOne);
        assert!(pos.is_none());
        assert!(changed);

        let (pos, changed) = tracker.current_position(RoundId::RoundOne);
        assert!(pos.is_none());
        assert!(!changed);

        assert_eq!(
            tracker.metrics_for_round(RoundId::RoundOne),
            vec!["communication", "clarity"]
        );
    }

    #[test]
    fn absent_round_is_never_reported_complete() {
        // A round the curriculum does not define yields no position and no
        // completion signal, agreeing with is_round_complete.
        let mut tracker = intro_tracker();
        let (pos, changed) = tracker.current_position(RoundId::RoundTwo);
        assert!(pos.is_none());
        assert!(!changed);
        let (_, changed) = tracker.current_position(RoundId::RoundTwo);
        assert!(!changed);
        assert!(!tracker.is_round_complete(RoundId::RoundTwo));
    }

    #[test]
    fn completed_round_hands_over_to_the_next() {
        // Scenario C: round one closes, round two opens at its first section.
        let mut tracker = two_round_tracker();
        tracker.mark_section_complete(RoundId::RoundOne, "Background", "Education", "degrees");
        tracker.mark_section_complete(RoundId::RoundOne, "Background", "Education", "projects");

        let (pos, changed) = tracker.current_position(RoundId::RoundOne);
        assert!(pos.is_none());
        assert!(changed);

        let (pos, changed) = tracker.current_position(RoundId::RoundTwo);
        assert!(!changed);
        let pos = pos.unwrap();
        assert_eq!(pos.topic, "Systems");
        assert_eq!(pos.subtopic, "Design");
        assert_eq!(pos.section, "scaling");
    }

    #[test]
    fn out_of_order_turns_read_back_in_sequence_order() {
        // Scenario B.
        let mut tracker = two_round_tracker();
        assert!(tracker.append_turn(
            RoundId::RoundOne,
            "Background",
            "Education",
            turn("B", "hello", 2)
        ));
        assert!(tracker.append_turn(
            RoundId::RoundOne,
            "Background",
            "Education",
            turn("A", "hi", 1)
        ));
        let history = tracker.history_for_subtopic(RoundId::RoundOne, "Background", "Education");
        assert_eq!(history[0].seq, 1);
        assert_eq!(history[1].seq, 2);
        assert_eq!(tracker.next_seq(), 3);
    }

    #[test]
    fn mismatched_node_names_are_dropped_not_raised() {
        let mut tracker = two_round_tracker();
        assert!(!tracker.append_turn(
            RoundId::RoundOne,
            "Background",
            "NoSuchSubtopic",
            turn("A", "hi", 1)
        ));
        assert!(
            tracker
                .history_for_subtopic(RoundId::RoundOne, "Background", "NoSuchSubtopic")
                .is_empty()
        );
        // Unknown section completion is likewise a logged no-op.
        tracker.mark_section_complete(RoundId::RoundOne, "Background", "Education", "bogus");
        assert!(!tracker.is_subtopic_complete(RoundId::RoundOne, "Background", "Education"));
    }

    #[test]
    fn uncompleted_subtopics_shrink_in_order() {
        let mut tracker = intro_tracker();
        assert_eq!(
            tracker.uncompleted_subtopics(RoundId::RoundOne, "Intro"),
            vec!["Warmup", "Goals"]
        );
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        assert_eq!(
            tracker.uncompleted_subtopics(RoundId::RoundOne, "Intro"),
            vec!["Goals"]
        );
    }

    #[test]
    fn topic_history_concatenates_subtopics_in_curriculum_order() {
        let mut tracker = intro_tracker();
        tracker.append_turn(RoundId::RoundOne, "Intro", "Goals", turn("A", "later", 2));
        tracker.append_turn(RoundId::RoundOne, "Intro", "Warmup", turn("A", "first", 1));
        let history = tracker.history_for_topic(RoundId::RoundOne, "Intro");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[1].content, "later");
    }

    #[test]
    fn snapshot_survives_restart_mid_interview() {
        // Scenario D's recovery half: after a restore, the already-appended
        // turn is rejected on redelivery and the completion decision can be
        // re-requested cleanly.
        let mut tracker = two_round_tracker();
        tracker.append_turn(
            RoundId::RoundOne,
            "Background",
            "Education",
            turn("candidate", "I studied CS", 1),
        );
        tracker.mark_section_complete(RoundId::RoundOne, "Background", "Education", "degrees");
        tracker.add_subtopic_summary(
            RoundId::RoundOne,
            "Background",
            "Education",
            vec!["talked degrees".to_string()],
        );
        let bytes = tracker.serialize().unwrap();

        let mut restored = two_round_tracker();
        restored.restore_from(&bytes).unwrap();

        assert!(!restored.append_turn(
            RoundId::RoundOne,
            "Background",
            "Education",
            turn("candidate", "I studied CS", 1),
        ));
        assert_eq!(restored.next_seq(), 2);
        assert_eq!(
            restored.subtopic_summaries(RoundId::RoundOne, "Background", "Education"),
            ["talked degrees"]
        );
        let (pos, _) = restored.current_position(RoundId::RoundOne);
        assert_eq!(pos.unwrap().section, "projects");
    }

    #[test]
    fn completed_topics_summary_prefers_the_cached_digest() {
        let mut tracker = intro_tracker();
        tracker.add_subtopic_summary(
            RoundId::RoundOne,
            "Intro",
            "Warmup",
            vec!["warmed up".to_string()],
        );
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Warmup", "icebreaker");
        tracker.mark_section_complete(RoundId::RoundOne, "Intro", "Goals", "motivation");
        assert_eq!(
            tracker.completed_topics_summary(RoundId::RoundOne),
            vec!["warmed up"]
        );

        tracker.set_topic_digest(RoundId::RoundOne, "Intro", "intro digest".to_string());
        assert_eq!(
            tracker.completed_topics_summary(RoundId::RoundOne),
            vec!["intro digest"]
        );
    }
}
