//! The decision layer: the language-model-backed oracle the orchestration
//! loop consults for speaker selection, advice, section completion and
//! summaries.
//!
//! Each query kind has one strongly-typed request/response pair resolved via
//! pattern matching; no stringly-typed dispatch. The loop treats every call
//! as a pure async request/response and owns all resulting state mutation.

use crate::curriculum::RoundId;
use crate::memory::ConversationTurn;
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Everything a decision query may need to know about the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub round: RoundId,
    pub topic: String,
    pub subtopic: String,
    pub section: String,
    /// Ordered recent turns for the current subtopic.
    pub recent_turns: Vec<ConversationTurn>,
    pub subtopic_summaries: Vec<String>,
    pub topic_summaries: Vec<String>,
    /// Wall-clock budget left for the subtopic. A signal, not a deadline.
    pub remaining_minutes: f64,
    pub panelists: Vec<String>,
    pub candidate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerDecision {
    /// Empty means "defer to the candidate"; the caller fails open.
    #[serde(default)]
    pub next_speaker: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdviceDecision {
    #[serde(default)]
    pub advice_text: String,
    #[serde(default)]
    pub should_wrap_up_topic: bool,
    #[serde(default)]
    pub should_ask_new_question: bool,
    #[serde(default)]
    pub should_end_interview: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionVerdict {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionDecision {
    pub complete: SectionVerdict,
    #[serde(default)]
    pub reason: String,
}

/// The closed set of query kinds, each mapped to its prompt-template key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    Speaker,
    Advice,
    Completion,
    SubtopicSummary,
    TopicSummary,
}

impl DecisionKind {
    pub fn prompt_key(self) -> &'static str {
        match self {
            DecisionKind::Speaker => "decide_speaker",
            DecisionKind::Advice => "decide_advice",
            DecisionKind::Completion => "decide_section_complete",
            DecisionKind::SubtopicSummary => "summarize_subtopic",
            DecisionKind::TopicSummary => "summarize_topic",
        }
    }
}

/// Contract every decision backend fulfils.
#[async_trait]
pub trait DecisionLayer: Send + Sync {
    async fn decide_speaker(&self, ctx: &DecisionContext) -> Result<SpeakerDecision>;
    async fn decide_advice(&self, ctx: &DecisionContext, target: &str) -> Result<AdviceDecision>;
    async fn decide_section_complete(&self, ctx: &DecisionContext) -> Result<CompletionDecision>;
    async fn summarize_subtopic(&self, ctx: &DecisionContext) -> Result<String>;
    async fn summarize_topic(&self, prior_summaries: &[String]) -> Result<String>;
}

/// Decision layer backed by any OpenAI-compatible chat-completions API.
pub struct OpenAiDecisionLayer {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl OpenAiDecisionLayer {
    /// `prompts` must contain one template per `DecisionKind::prompt_key`.
    /// Templates use `{context}`, `{target}` and `{summaries}` placeholders.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }

    async fn ask(&self, kind: DecisionKind, fill: &[(&str, String)]) -> Result<String> {
        let template = self
            .prompts
            .get(kind.prompt_key())
            .with_context(|| format!("missing prompt template: '{}'", kind.prompt_key()))?;
        let mut prompt = template.clone();
        for (placeholder, value) in fill {
            prompt = prompt.replace(&format!("{{{placeholder}}}"), value);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You are the orchestrator of a panel interview. Answer precisely in the requested format.")
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let answer = response
            .choices
            .first()
            .context("no response choice from decision model")?
            .message
            .content
            .as_ref()
            .context("no content in decision model response")?;
        Ok(answer.clone())
    }

    async fn ask_json<T: for<'de> Deserialize<'de>>(
        &self,
        kind: DecisionKind,
        fill: &[(&str, String)],
    ) -> Result<T> {
        let answer = self.ask(kind, fill).await?;
        let payload = extract_json(&answer)
            .ok_or_else(|| anyhow!("no JSON object in decision response: {answer}"))?;
        serde_json::from_str(payload)
            .with_context(|| format!("malformed decision response: {payload}"))
    }
}

/// Pulls the first JSON object out of a model reply, tolerating code fences
/// and surrounding prose.
fn extract_json(answer: &str) -> Option<&str> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    (end >= start).then(|| &answer[start..=end])
}

#[async_trait]
impl DecisionLayer for OpenAiDecisionLayer {
    async fn decide_speaker(&self, ctx: &DecisionContext) -> Result<SpeakerDecision> {
        let fill = [("context", serde_json::to_string(ctx)?)];
        self.ask_json(DecisionKind::Speaker, &fill).await
    }

    async fn decide_advice(&self, ctx: &DecisionContext, target: &str) -> Result<AdviceDecision> {
        let fill = [
            ("context", serde_json::to_string(ctx)?),
            ("target", target.to_string()),
        ];
        self.ask_json(DecisionKind::Advice, &fill).await
    }

    async fn decide_section_complete(&self, ctx: &DecisionContext) -> Result<CompletionDecision> {
        let fill = [("context", serde_json::to_string(ctx)?)];
        self.ask_json(DecisionKind::Completion, &fill).await
    }

    async fn summarize_subtopic(&self, ctx: &DecisionContext) -> Result<String> {
        let fill = [("context", serde_json::to_string(ctx)?)];
        let answer = self.ask(DecisionKind::SubtopicSummary, &fill).await?;
        Ok(answer.trim().to_string())
    }

    async fn summarize_topic(&self, prior_summaries: &[String]) -> Result<String> {
        let fill = [("summaries", prior_summaries.join("\n"))];
        let answer = self.ask(DecisionKind::TopicSummary, &fill).await?;
        Ok(answer.trim().to_string())
    }
}

/// Deterministic decision layer for development and tests.
///
/// Speaker picks and completion verdicts are popped from queues; when a
/// queue runs dry the layer defers to the candidate and answers "NO", which
/// keeps an unscripted interview from advancing on its own.
#[derive(Default)]
pub struct ScriptedDecisionLayer {
    speakers: Mutex<VecDeque<String>>,
    verdicts: Mutex<VecDeque<bool>>,
}

impl ScriptedDecisionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_speaker(&self, name: impl Into<String>) {
        self.speakers.lock().unwrap().push_back(name.into());
    }

    pub fn push_verdict(&self, complete: bool) {
        self.verdicts.lock().unwrap().push_back(complete);
    }
}

#[async_trait]
impl DecisionLayer for ScriptedDecisionLayer {
    async fn decide_speaker(&self, _ctx: &DecisionContext) -> Result<SpeakerDecision> {
        let next_speaker = self
            .speakers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(SpeakerDecision {
            next_speaker,
            reason: "scripted".to_string(),
        })
    }

    async fn decide_advice(&self, ctx: &DecisionContext, target: &str) -> Result<AdviceDecision> {
        Ok(AdviceDecision {
            advice_text: format!("{target}: probe '{}' further", ctx.section),
            ..AdviceDecision::default()
        })
    }

    async fn decide_section_complete(&self, _ctx: &DecisionContext) -> Result<CompletionDecision> {
        let complete = self.verdicts.lock().unwrap().pop_front().unwrap_or(false);
        Ok(CompletionDecision {
            complete: if complete {
                SectionVerdict::Yes
            } else {
                SectionVerdict::No
            },
            reason: "scripted".to_string(),
        })
    }

    async fn summarize_subtopic(&self, ctx: &DecisionContext) -> Result<String> {
        Ok(format!("summary of {}", ctx.subtopic))
    }

    async fn summarize_topic(&self, prior_summaries: &[String]) -> Result<String> {
        Ok(prior_summaries.join("; "))
    }
}
