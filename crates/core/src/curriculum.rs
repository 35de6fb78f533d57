//! Static interview curriculum: rounds, topics, subtopics and sections.
//!
//! The curriculum is loaded once at interview start and is read-only for the
//! lifetime of a session. Ordering of topics, subtopics and sections is fixed
//! and total; traversal never skips or reorders.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a top-level interview phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundId {
    RoundOne,
    RoundTwo,
}

impl RoundId {
    /// The round that follows this one in curriculum order, if any.
    pub fn next(self) -> Option<RoundId> {
        match self {
            RoundId::RoundOne => Some(RoundId::RoundTwo),
            RoundId::RoundTwo => None,
        }
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundId::RoundOne => write!(f, "ROUND_ONE"),
            RoundId::RoundTwo => write!(f, "ROUND_TWO"),
        }
    }
}

/// The smallest schedulable conversation unit. Each section within it is the
/// smallest unit whose completion the decision layer judges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtopic {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sections: Vec<String>,
    pub time_limit_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub subtopics: Vec<Subtopic>,
    /// Metric names scored within this topic by the downstream evaluation stage.
    #[serde(default)]
    pub evaluation_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPlan {
    pub round: RoundId,
    pub topics: Vec<Topic>,
}

/// Immutable interview plan covering one or more rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Curriculum {
    rounds: Vec<RoundPlan>,
}

impl Curriculum {
    /// Builds a curriculum from pre-constructed round plans, validating shape.
    pub fn new(rounds: Vec<RoundPlan>) -> Result<Self, ConfigError> {
        let curriculum = Self { rounds };
        curriculum.validate()?;
        Ok(curriculum)
    }

    /// Parses a curriculum from its JSON representation.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let rounds: Vec<RoundPlan> = serde_json::from_str(raw)?;
        Self::new(rounds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for plan in &self.rounds {
            let round = plan.round.to_string();
            if plan.topics.is_empty() {
                return Err(ConfigError::EmptyRound { round });
            }
            for topic in &plan.topics {
                if topic.name.trim().is_empty() {
                    return Err(ConfigError::MissingName {
                        round,
                        kind: "topic",
                    });
                }
                if topic.subtopics.is_empty() {
                    return Err(ConfigError::EmptyTopic {
                        round,
                        topic: topic.name.clone(),
                    });
                }
                for subtopic in &topic.subtopics {
                    if subtopic.name.trim().is_empty() {
                        return Err(ConfigError::MissingName {
                            round,
                            kind: "subtopic",
                        });
                    }
                    if subtopic.sections.is_empty() {
                        return Err(ConfigError::EmptySubtopic {
                            topic: topic.name.clone(),
                            subtopic: subtopic.name.clone(),
                        });
                    }
                    if subtopic.time_limit_minutes <= 0.0 {
                        return Err(ConfigError::BadTimeLimit {
                            subtopic: subtopic.name.clone(),
                            minutes: subtopic.time_limit_minutes,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn round(&self, round: RoundId) -> Option<&RoundPlan> {
        self.rounds.iter().find(|plan| plan.round == round)
    }

    /// Topics of a round in curriculum order; empty when the round is absent.
    pub fn topics(&self, round: RoundId) -> &[Topic] {
        self.round(round)
            .map(|plan| plan.topics.as_slice())
            .unwrap_or(&[])
    }

    pub fn topic(&self, round: RoundId, name: &str) -> Option<&Topic> {
        self.topics(round).iter().find(|topic| topic.name == name)
    }

    pub fn subtopic(&self, round: RoundId, topic: &str, name: &str) -> Option<&Subtopic> {
        self.topic(round, topic)?
            .subtopics
            .iter()
            .find(|subtopic| subtopic.name == name)
    }

    /// Whether a (topic, subtopic) pair exists in the given round.
    pub fn contains_node(&self, round: RoundId, topic: &str, subtopic: &str) -> bool {
        self.subtopic(round, topic, subtopic).is_some()
    }

    /// Order-preserving deduplicated union of the round's evaluation criteria.
    pub fn metrics_for_round(&self, round: RoundId) -> Vec<String> {
        let mut metrics: Vec<String> = Vec::new();
        for topic in self.topics(round) {
            for criterion in &topic.evaluation_criteria {
                if !metrics.iter().any(|m| m == criterion) {
                    metrics.push(criterion.clone());
                }
            }
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtopic(name: &str, sections: &[&str]) -> Subtopic {
        Subtopic {
            name: name.to_string(),
            description: String::new(),
            sections: sections.iter().map(|s| s.to_string()).collect(),
            time_limit_minutes: 5.0,
        }
    }

    fn single_round(topics: Vec<Topic>) -> Vec<RoundPlan> {
        vec![RoundPlan {
            round: RoundId::RoundOne,
            topics,
        }]
    }

    #[test]
    fn rejects_empty_round() {
        let err = Curriculum::new(single_round(vec![])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRound { .. }));
    }

    #[test]
    fn rejects_topic_without_subtopics() {
        let topics = vec![Topic {
            name: "Background".to_string(),
            subtopics: vec![],
            evaluation_criteria: vec![],
        }];
        let err = Curriculum::new(single_round(topics)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTopic { .. }));
    }

    #[test]
    fn rejects_subtopic_without_sections() {
        let topics = vec![Topic {
            name: "Background".to_string(),
            subtopics: vec![subtopic("Education", &[])],
            evaluation_criteria: vec![],
        }];
        let err = Curriculum::new(single_round(topics)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptySubtopic { .. }));
    }

    #[test]
    fn rejects_non_positive_time_limit() {
        let mut bad = subtopic("Education", &["degrees"]);
        bad.time_limit_minutes = 0.0;
        let topics = vec![Topic {
            name: "Background".to_string(),
            subtopics: vec![bad],
            evaluation_criteria: vec![],
        }];
        let err = Curriculum::new(single_round(topics)).unwrap_err();
        assert!(matches!(err, ConfigError::BadTimeLimit { .. }));
    }

    #[test]
    fn metrics_union_preserves_order_and_dedupes() {
        let topics = vec![
            Topic {
                name: "A".to_string(),
                subtopics: vec![subtopic("a1", &["s"])],
                evaluation_criteria: vec!["clarity".to_string(), "depth".to_string()],
            },
            Topic {
                name: "B".to_string(),
                subtopics: vec![subtopic("b1", &["s"])],
                evaluation_criteria: vec!["depth".to_string(), "rigor".to_string()],
            },
        ];
        let curriculum = Curriculum::new(single_round(topics)).unwrap();
        assert_eq!(
            curriculum.metrics_for_round(RoundId::RoundOne),
            vec!["clarity", "depth", "rigor"]
        );
    }

    #[test]
    fn parses_round_ids_from_screaming_snake_case() {
        let raw = r#"[{
            "round": "ROUND_ONE",
            "topics": [{
                "name": "Intro",
                "subtopics": [{
                    "name": "Warmup",
                    "sections": ["icebreaker"],
                    "time_limit_minutes": 3.0
                }]
            }]
        }]"#;
        let curriculum = Curriculum::from_json(raw).unwrap();
        assert!(curriculum.contains_node(RoundId::RoundOne, "Intro", "Warmup"));
        assert!(curriculum.round(RoundId::RoundTwo).is_none());
    }
}
