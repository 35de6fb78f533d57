//! Error taxonomy for the core interview domain.

use std::time::Duration;

/// Curriculum validation or parse failures. Fatal at startup: an interview
/// never begins against a malformed curriculum.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("round '{round}' has no topics")]
    EmptyRound { round: String },
    #[error("topic '{topic}' in round '{round}' has no subtopics")]
    EmptyTopic { round: String, topic: String },
    #[error("subtopic '{subtopic}' under topic '{topic}' has no sections")]
    EmptySubtopic { topic: String, subtopic: String },
    #[error("missing name for a {kind} in round '{round}'")]
    MissingName { round: String, kind: &'static str },
    #[error("subtopic '{subtopic}' has non-positive time limit {minutes}")]
    BadTimeLimit { subtopic: String, minutes: f64 },
    #[error("failed to parse curriculum: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures while querying the decision layer during a tick.
///
/// Both variants are recoverable: the current tick ends early without
/// mutating tracker state and the next scheduling pass retries.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("decision layer call exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
