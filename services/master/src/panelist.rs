//! Panelist worker tasks.
//!
//! Each panelist is an independent long-running task owning a mailbox of
//! `SpeakRequest`s. The Master dispatches a request when the decision layer
//! picks that panelist; the worker composes an utterance and sends it back
//! through the Master's event mailbox. Workers never touch tracker state.

use crate::orchestrator::MasterEvent;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use roundtable_core::decision::{AdviceDecision, DecisionContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Dispatched to a panelist when it is that panelist's turn to speak.
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub context: DecisionContext,
    pub advice: AdviceDecision,
}

/// How a panelist turns context plus advice into an utterance.
#[async_trait]
pub trait PanelistVoice: Send + Sync {
    async fn speak(&self, name: &str, request: &SpeakRequest) -> Result<String>;
}

/// Panelist voice backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiPanelistVoice {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiPanelistVoice {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl PanelistVoice for OpenAiPanelistVoice {
    async fn speak(&self, name: &str, request: &SpeakRequest) -> Result<String> {
        let persona = format!(
            "You are {name}, an interviewer on a panel. Speak one conversational turn \
             addressed to the candidate. Stay on the current section."
        );
        let briefing = format!(
            "Interview context:\n{}\n\nGuidance for this turn: {}",
            serde_json::to_string_pretty(&request.context)?,
            request.advice.advice_text
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(persona)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(briefing)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(chat_request).await?;
        let utterance = response
            .choices
            .first()
            .context("no response choice from panelist model")?
            .message
            .content
            .as_ref()
            .context("no content in panelist response")?;
        Ok(utterance.trim().to_string())
    }
}

/// Deterministic voice for development and tests: pops queued lines, then
/// falls back to a generic follow-up question.
#[derive(Default)]
pub struct ScriptedVoice {
    lines: Mutex<VecDeque<String>>,
}

impl ScriptedVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl PanelistVoice for ScriptedVoice {
    async fn speak(&self, _name: &str, request: &SpeakRequest) -> Result<String> {
        Ok(self.lines.lock().unwrap().pop_front().unwrap_or_else(|| {
            format!(
                "Could you tell me more about {}?",
                request.context.section
            )
        }))
    }
}

/// Spawns one panelist worker. The task exits when its cancellation token
/// fires or either mailbox closes.
pub fn spawn_panelist(
    name: String,
    voice: Arc<dyn PanelistVoice>,
    mut requests: mpsc::Receiver<SpeakRequest>,
    events: mpsc::Sender<MasterEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let text = match voice.speak(&name, &request).await {
                        Ok(text) => text,
                        Err(error) => {
                            // A dead voice must not stall the interview.
                            warn!(panelist = %name, %error, "voice failed; using fallback line");
                            "Let me hand back to the candidate for a moment.".to_string()
                        }
                    };
                    let utterance = MasterEvent::PanelistUtterance {
                        name: name.clone(),
                        text,
                    };
                    if events.send(utterance).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!(panelist = %name, "panelist task stopped");
    })
}
