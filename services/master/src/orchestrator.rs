//! The Master's turn-orchestration loop.
//!
//! One task owns the progress cursor, the tracker and all per-tick decision
//! making; every other participant (panelists, the candidate proxy behind
//! the gateway) talks to it exclusively through mailboxes. A tick runs only
//! while nothing is pending: it reads the cursor position, asks the decision
//! layer who speaks next (with per-panelist advice gathered concurrently),
//! dispatches the chosen speaker and suspends until the utterance arrives.
//! Tracker state advances only on confirmed decisions, so a failed or timed
//! out tick leaves the interview exactly where it was.

use crate::panelist::{PanelistVoice, SpeakRequest, spawn_panelist};
use crate::store::{InterviewStore, persist_with_retry};
use anyhow::Result;
use futures_util::future::join_all;
use roundtable_core::{
    curriculum::RoundId,
    decision::{AdviceDecision, DecisionContext, DecisionLayer, SectionVerdict},
    error::DecisionError,
    events::{InboundEvent, OutboundEvent},
    memory::ConversationTurn,
    tracker::{CursorPosition, InterviewTopicTracker},
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How many recent turns ride along in a decision context. Older ground is
/// carried by the accumulated summaries instead.
const RECENT_TURN_WINDOW: usize = 20;

/// Interview lifecycle. `Complete` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingStart,
    Active,
    RoundTransition,
    Complete,
    Cancelled,
}

/// What the loop is currently suspended on, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Idle,
    AwaitingCandidate,
    AwaitingPanelist(String),
}

/// Everything that can arrive in the Master's mailbox.
#[derive(Debug)]
pub enum MasterEvent {
    Inbound(InboundEvent),
    PanelistUtterance { name: String, text: String },
}

#[derive(Debug, Clone)]
pub struct InterviewSettings {
    pub candidate: String,
    pub panelists: Vec<String>,
    pub decision_timeout: Duration,
    pub tick_timeout: Duration,
}

/// The single mutable cursor in the system, owned by the loop alone.
#[derive(Debug)]
struct ProgressCursor {
    round: RoundId,
    position: Option<CursorPosition>,
    subtopic_started: Instant,
}

/// Handle given to the transport boundary: inject events, request cancellation.
#[derive(Clone)]
pub struct MasterHandle {
    pub events: mpsc::Sender<MasterEvent>,
    pub cancel: CancellationToken,
}

pub struct Master {
    session_id: Uuid,
    settings: InterviewSettings,
    tracker: InterviewTopicTracker,
    decisions: Arc<dyn DecisionLayer>,
    store: Arc<dyn InterviewStore>,
    events: mpsc::Receiver<MasterEvent>,
    outbound: mpsc::Sender<OutboundEvent>,
    panelist_mailboxes: HashMap<String, mpsc::Sender<SpeakRequest>>,
    panelist_handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    phase: Phase,
    wait: WaitState,
    cursor: ProgressCursor,
}

impl Master {
    pub fn new(
        session_id: Uuid,
        settings: InterviewSettings,
        tracker: InterviewTopicTracker,
        decisions: Arc<dyn DecisionLayer>,
        store: Arc<dyn InterviewStore>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> (Self, MasterHandle) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = MasterHandle {
            events: events_tx,
            cancel: cancel.clone(),
        };
        let master = Self {
            session_id,
            settings,
            tracker,
            decisions,
            store,
            events: events_rx,
            outbound,
            panelist_mailboxes: HashMap::new(),
            panelist_handles: Vec::new(),
            cancel,
            phase: Phase::AwaitingStart,
            wait: WaitState::Idle,
            cursor: ProgressCursor {
                round: RoundId::RoundOne,
                position: None,
                subtopic_started: Instant::now(),
            },
        };
        (master, handle)
    }

    /// Spawns one worker task per configured panelist, each under a child
    /// cancellation token so shutting down the loop shuts down the panel.
    pub fn spawn_panelists(
        &mut self,
        voice: Arc<dyn PanelistVoice>,
        events: mpsc::Sender<MasterEvent>,
    ) {
        for name in self.settings.panelists.clone() {
            let (mailbox_tx, mailbox_rx) = mpsc::channel(8);
            let handle = spawn_panelist(
                name.clone(),
                voice.clone(),
                mailbox_rx,
                events.clone(),
                self.cancel.child_token(),
            );
            self.panelist_mailboxes.insert(name, mailbox_tx);
            self.panelist_handles.push(handle);
        }
    }

    /// Runs the interview to completion, cancellation, or mailbox closure.
    pub async fn run(mut self) -> Result<()> {
        info!(session = %self.session_id, "master loop started");
        while !matches!(self.phase, Phase::Complete | Phase::Cancelled) {
            while matches!(self.phase, Phase::Active | Phase::RoundTransition)
                && self.wait == WaitState::Idle
            {
                self.run_tick().await;
                if matches!(self.phase, Phase::Complete | Phase::Cancelled)
                    || self.wait != WaitState::Idle
                {
                    break;
                }
            }
            if matches!(self.phase, Phase::Complete | Phase::Cancelled) {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(session = %self.session_id, "cancellation requested");
                    self.phase = Phase::Cancelled;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!(session = %self.session_id, "event mailbox closed");
                        self.phase = Phase::Cancelled;
                    }
                },
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// One bounded tick. A tick that fails or overruns its budget is logged,
    /// surfaced as an error event, and abandoned; the next pass retries from
    /// the same tracker state.
    async fn run_tick(&mut self) {
        let budget = self.settings.tick_timeout;
        match timeout(budget, self.tick()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(session = %self.session_id, %error, "tick failed; retrying on next pass");
                self.emit(OutboundEvent::Error {
                    message: "internal error during interview turn".to_string(),
                })
                .await;
            }
            Err(_) => {
                warn!(session = %self.session_id, ?budget, "tick overran its budget; cancelled");
                self.emit(OutboundEvent::Error {
                    message: "interview turn timed out".to_string(),
                })
                .await;
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let (position, round_changed) = self.tracker.current_position(self.cursor.round);
        let Some(position) = position else {
            if round_changed {
                debug!(session = %self.session_id, round = %self.cursor.round, "round complete");
            }
            return self.advance_round().await;
        };
        self.update_cursor(position.clone());
        self.phase = Phase::Active;

        let ctx = self.decision_context(&position);
        let budget = self.settings.decision_timeout;
        let decisions = self.decisions.clone();

        // The speaker decision and every per-panelist advice request are
        // independent reads; they run concurrently and may resolve in any
        // order without affecting history ordering.
        let speaker_fut = bounded(budget, decisions.decide_speaker(&ctx));
        let advice_futs = self.settings.panelists.iter().map(|name| {
            let decisions = self.decisions.clone();
            let ctx = ctx.clone();
            let name = name.clone();
            async move {
                let advice = bounded(budget, decisions.decide_advice(&ctx, &name)).await;
                (name, advice)
            }
        });
        let (speaker, advice_results) = tokio::join!(speaker_fut, join_all(advice_futs));

        let mut advice_by_panelist: HashMap<String, AdviceDecision> = HashMap::new();
        for (name, result) in advice_results {
            match result {
                Ok(advice) => {
                    advice_by_panelist.insert(name, advice);
                }
                Err(error) => {
                    warn!(panelist = %name, %error, "advice request failed; using default")
                }
            }
        }

        // Fail open toward the candidate: an empty, unknown, failed or timed
        // out speaker decision gives the human the turn rather than stalling.
        let mut chosen = match speaker {
            Ok(decision) if !decision.next_speaker.trim().is_empty() => decision.next_speaker,
            Ok(_) => {
                debug!("speaker decision empty; deferring to candidate");
                self.settings.candidate.clone()
            }
            Err(error) => {
                warn!(%error, "speaker decision failed; deferring to candidate");
                self.settings.candidate.clone()
            }
        };
        if chosen != self.settings.candidate && !self.panelist_mailboxes.contains_key(&chosen) {
            warn!(speaker = %chosen, "unknown speaker; deferring to candidate");
            chosen = self.settings.candidate.clone();
        }

        self.emit(OutboundEvent::SpeakerSelected {
            name: chosen.clone(),
        })
        .await;

        if chosen == self.settings.candidate {
            self.wait = WaitState::AwaitingCandidate;
            return Ok(());
        }

        let advice = advice_by_panelist.remove(&chosen).unwrap_or_default();
        let request = SpeakRequest {
            context: ctx,
            advice,
        };
        let delivered = match self.panelist_mailboxes.get(&chosen) {
            Some(mailbox) => mailbox.send(request).await.is_ok(),
            None => false,
        };
        if delivered {
            self.wait = WaitState::AwaitingPanelist(chosen);
        } else {
            warn!(panelist = %chosen, "panelist mailbox closed; deferring to candidate");
            self.wait = WaitState::AwaitingCandidate;
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: MasterEvent) {
        match event {
            MasterEvent::Inbound(InboundEvent::StartRound) => {
                if self.phase == Phase::AwaitingStart {
                    info!(session = %self.session_id, "interview started");
                    self.phase = Phase::Active;
                } else {
                    debug!("start requested while already running; ignored");
                }
            }
            MasterEvent::Inbound(InboundEvent::CandidateUtterance { text }) => {
                if !matches!(self.phase, Phase::Active | Phase::RoundTransition) {
                    warn!("candidate utterance outside an active interview; dropped");
                    return;
                }
                if self.wait != WaitState::AwaitingCandidate {
                    debug!("unsolicited candidate utterance; accepted");
                }
                let speaker = self.settings.candidate.clone();
                self.on_utterance(speaker, text).await;
            }
            MasterEvent::Inbound(InboundEvent::EndInterview) => {
                info!(session = %self.session_id, "interview ended by request");
                if let Err(error) = self.complete_interview().await {
                    warn!(%error, "failed to finalize interview cleanly");
                    self.phase = Phase::Complete;
                }
            }
            MasterEvent::Inbound(InboundEvent::Cancel) => {
                info!(session = %self.session_id, "interview cancelled by request");
                self.phase = Phase::Cancelled;
            }
            MasterEvent::PanelistUtterance { name, text } => match &self.wait {
                WaitState::AwaitingPanelist(expected) if *expected == name => {
                    self.on_utterance(name, text).await;
                }
                _ => warn!(panelist = %name, "unexpected panelist utterance; dropped"),
            },
        }
    }

    /// Step 6 of the tick cycle: confirm the utterance, judge the section,
    /// cascade subtopic/topic closure, then release the loop for the next
    /// tick.
    async fn on_utterance(&mut self, speaker: String, text: String) {
        let Some(position) = self.cursor.position.clone() else {
            warn!("utterance with no active position; dropped");
            self.wait = WaitState::Idle;
            return;
        };
        self.emit(OutboundEvent::UtteranceBroadcast {
            speaker: speaker.clone(),
            text: text.clone(),
        })
        .await;

        let turn = ConversationTurn {
            speaker,
            content: text,
            seq: self.tracker.next_seq(),
        };
        self.tracker
            .append_turn(self.cursor.round, &position.topic, &position.subtopic, turn);

        let ctx = self.decision_context(&position);
        let decisions = self.decisions.clone();
        let verdict = bounded(
            self.settings.decision_timeout,
            decisions.decide_section_complete(&ctx),
        )
        .await;
        match verdict {
            Ok(decision) => {
                if decision.complete == SectionVerdict::Yes {
                    debug!(
                        section = %position.section,
                        reason = %decision.reason,
                        "section judged complete"
                    );
                    self.tracker.mark_section_complete(
                        self.cursor.round,
                        &position.topic,
                        &position.subtopic,
                        &position.section,
                    );
                    if self.tracker.is_subtopic_complete(
                        self.cursor.round,
                        &position.topic,
                        &position.subtopic,
                    ) {
                        self.close_subtopic(&position).await;
                    }
                }
            }
            Err(error) => {
                // The turn is already stored; its sequence number keeps any
                // redelivery idempotent and the completion question is asked
                // again on a later pass.
                warn!(%error, "section-completion decision failed");
                self.emit(OutboundEvent::Error {
                    message: "interviewer decision delayed".to_string(),
                })
                .await;
            }
        }
        self.wait = WaitState::Idle;
    }

    /// A subtopic just closed: summarize it, persist the node, restart the
    /// subtopic clock, and condense the topic if it closed too.
    async fn close_subtopic(&mut self, position: &CursorPosition) {
        let round = self.cursor.round;
        info!(
            session = %self.session_id,
            topic = %position.topic,
            subtopic = %position.subtopic,
            "subtopic complete"
        );

        let ctx = self.decision_context(position);
        let decisions = self.decisions.clone();
        match bounded(self.settings.decision_timeout, decisions.summarize_subtopic(&ctx)).await {
            Ok(summary) => self.tracker.add_subtopic_summary(
                round,
                &position.topic,
                &position.subtopic,
                vec![summary],
            ),
            Err(error) => warn!(%error, "subtopic summary failed; continuing without it"),
        }
        self.persist_subtopic(position).await;
        self.cursor.subtopic_started = Instant::now();

        if self.tracker.is_topic_complete(round, &position.topic) {
            let rollup = self.tracker.topic_summary(round, &position.topic);
            let decisions = self.decisions.clone();
            match bounded(self.settings.decision_timeout, decisions.summarize_topic(&rollup)).await
            {
                Ok(digest) => self.tracker.set_topic_digest(round, &position.topic, digest),
                Err(error) => warn!(%error, "topic digest failed; rollup stands in"),
            }
        }
    }

    async fn advance_round(&mut self) -> Result<()> {
        let next = self
            .cursor
            .round
            .next()
            .filter(|round| self.tracker.curriculum().round(*round).is_some());
        match next {
            Some(next_round) => {
                info!(session = %self.session_id, %next_round, "round transition");
                self.phase = Phase::RoundTransition;
                self.cursor.round = next_round;
                self.cursor.position = None;
                self.cursor.subtopic_started = Instant::now();
                self.emit(OutboundEvent::RoundTransitioned {
                    new_round: next_round,
                })
                .await;
            }
            None => self.complete_interview().await?,
        }
        Ok(())
    }

    /// Persists the final tracker snapshot for the evaluation stage and
    /// announces completion.
    async fn complete_interview(&mut self) -> Result<()> {
        let payload: Value = serde_json::from_slice(&self.tracker.serialize()?)?;
        let key = format!("{}/final", self.session_id);
        persist_with_retry(self.store.as_ref(), &key, &payload).await;
        self.emit(OutboundEvent::InterviewComplete).await;
        self.phase = Phase::Complete;
        info!(session = %self.session_id, "interview complete");
        Ok(())
    }

    async fn persist_subtopic(&self, position: &CursorPosition) {
        let round = self.cursor.round;
        let key = format!(
            "{}/{}/{}/{}",
            self.session_id, round, position.topic, position.subtopic
        );
        let payload = serde_json::json!({
            "turns": self
                .tracker
                .history_for_subtopic(round, &position.topic, &position.subtopic),
            "summaries": self
                .tracker
                .subtopic_summaries(round, &position.topic, &position.subtopic),
        });
        persist_with_retry(self.store.as_ref(), &key, &payload).await;
    }

    fn update_cursor(&mut self, position: CursorPosition) {
        let subtopic_changed = self
            .cursor
            .position
            .as_ref()
            .map(|previous| {
                previous.topic != position.topic || previous.subtopic != position.subtopic
            })
            .unwrap_or(true);
        if subtopic_changed {
            self.cursor.subtopic_started = Instant::now();
        }
        self.cursor.position = Some(position);
    }

    fn decision_context(&self, position: &CursorPosition) -> DecisionContext {
        let round = self.cursor.round;
        let history =
            self.tracker
                .history_for_subtopic(round, &position.topic, &position.subtopic);
        let recent_turns = history
            .iter()
            .skip(history.len().saturating_sub(RECENT_TURN_WINDOW))
            .cloned()
            .collect();
        let remaining_minutes = self
            .tracker
            .curriculum()
            .subtopic(round, &position.topic, &position.subtopic)
            .map(|subtopic| {
                subtopic.time_limit_minutes
                    - self.cursor.subtopic_started.elapsed().as_secs_f64() / 60.0
            })
            .unwrap_or(0.0);
        DecisionContext {
            round,
            topic: position.topic.clone(),
            subtopic: position.subtopic.clone(),
            section: position.section.clone(),
            recent_turns,
            subtopic_summaries: self
                .tracker
                .subtopic_summaries(round, &position.topic, &position.subtopic)
                .to_vec(),
            topic_summaries: self.tracker.completed_topics_summary(round),
            remaining_minutes,
            panelists: self.settings.panelists.clone(),
            candidate: self.settings.candidate.clone(),
        }
    }

    async fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).await.is_err() {
            warn!(session = %self.session_id, "outbound channel closed");
        }
    }

    /// Cancels every child task and awaits them before releasing resources,
    /// so no panelist outlives its interview.
    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.panelist_mailboxes.clear();
        for handle in self.panelist_handles.drain(..) {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!(%error, "panelist task ended abnormally");
                }
            }
        }
        info!(session = %self.session_id, phase = ?self.phase, "master loop stopped");
    }
}

/// Bounds a decision-layer call, mapping overruns to `DecisionError::Timeout`.
async fn bounded<T>(
    budget: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T, DecisionError> {
    match timeout(budget, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(DecisionError::Backend(error)),
        Err(_) => Err(DecisionError::Timeout(budget)),
    }
}
