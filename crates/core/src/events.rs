//! Logical message contracts between the Master and the outside world.
//!
//! These are transport-agnostic: the WebSocket gateway carries them as
//! tagged JSON, but any channel (gRPC, in-process mpsc) could carry the same
//! shapes.

use crate::curriculum::RoundId;
use serde::{Deserialize, Serialize};

/// Events arriving from the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// The candidate produced an utterance.
    CandidateUtterance { text: String },
    /// Begin (or resume) the interview.
    StartRound,
    /// End the interview early but cleanly.
    EndInterview,
    /// Abandon the interview; all in-flight work is cancelled.
    Cancel,
}

/// Events the Master emits toward the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// The decision layer chose who speaks next.
    SpeakerSelected { name: String },
    /// A confirmed utterance, rebroadcast to all participants.
    UtteranceBroadcast { speaker: String, text: String },
    /// The interview moved to the next round.
    RoundTransitioned { new_round: RoundId },
    /// Every round's curriculum is exhausted.
    InterviewComplete,
    /// A tick failed; internal detail stays internal.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_round_trip_as_tagged_json() {
        let raw = r#"{"type":"candidate_utterance","text":"hello"}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, InboundEvent::CandidateUtterance { ref text } if text == "hello"));
        assert_eq!(serde_json::to_string(&event).unwrap(), raw);

        let start: InboundEvent = serde_json::from_str(r#"{"type":"start_round"}"#).unwrap();
        assert!(matches!(start, InboundEvent::StartRound));
    }

    #[test]
    fn round_transition_serializes_the_round_name() {
        let event = OutboundEvent::RoundTransitioned {
            new_round: RoundId::RoundTwo,
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"round_transitioned","new_round":"ROUND_TWO"}"#
        );
    }
}
