//! Pipeline invocation adapter.
//!
//! Wraps exactly one pretrained-model pipeline behind a uniform contract:
//! build it once, feed it a task-typed [`PipelineInput`], and normalize
//! whatever the runtime returns into a [`PipelineOutput`].
//!
//! # Construct-once
//!
//! Building a pipeline means loading model weights (or resolving a hosted
//! model), so it happens at most once per [`PipelineHandle`]. Concurrent
//! first callers wait on the same construction and share its result. A
//! failed construction leaves the slot empty; the next caller tries again.
//!
//! # Output shapes
//!
//! Inference runtimes answer with loosely typed JSON. [`PipelineOutput::from_raw`]
//! converts it right after the call, with one conversion per known shape:
//!
//! | Shape | Variant |
//! |-------|---------|
//! | `[{"summary_text": …}, …]` | [`PipelineOutput::Summaries`] |
//! | `{"answer": …, "score": …}`, `[{…}]`, or a bare string | [`PipelineOutput::Answer`] |
//! | `[{"generated_text": …}]` or `{"generated_text": …}` | [`PipelineOutput::Generated`] |
//! | anything else | [`PipelineOutput::Unrecognized`] |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::ChatError;

/// Task a pipeline is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Summarization,
    QuestionAnswering,
    Conversational,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Summarization => "summarization",
            Task::QuestionAnswering => "question-answering",
            Task::Conversational => "conversational",
        }
    }

    /// Model used when neither `MODEL_NAME` nor the config names one.
    pub fn default_model(self) -> &'static str {
        match self {
            Task::Summarization => "facebook/bart-large-cnn",
            Task::QuestionAnswering => "distilbert-base-cased-distilled-squad",
            Task::Conversational => "microsoft/DialoGPT-small",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "summarization" => Ok(Task::Summarization),
            "question-answering" => Ok(Task::QuestionAnswering),
            "conversational" => Ok(Task::Conversational),
            other => bail!(
                "Unknown task: '{}'. Must be summarization, question-answering, or conversational.",
                other
            ),
        }
    }
}

/// Generation limits for summarization. Fixed by the service, never
/// taken from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummarizeParams {
    pub max_length: u32,
    pub min_length: u32,
    pub do_sample: bool,
}

impl SummarizeParams {
    pub const POLICY: SummarizeParams = SummarizeParams {
        max_length: 100,
        min_length: 30,
        do_sample: false,
    };
}

/// Task-typed pipeline input.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineInput {
    Summarize {
        text: String,
        params: SummarizeParams,
    },
    Answer {
        question: String,
        context: String,
    },
    Converse {
        prompt: String,
    },
}

impl PipelineInput {
    pub fn summarize(text: impl Into<String>) -> Self {
        PipelineInput::Summarize {
            text: text.into(),
            params: SummarizeParams::POLICY,
        }
    }

    pub fn answer(question: impl Into<String>, context: impl Into<String>) -> Self {
        PipelineInput::Answer {
            question: question.into(),
            context: context.into(),
        }
    }

    pub fn converse(prompt: impl Into<String>) -> Self {
        PipelineInput::Converse {
            prompt: prompt.into(),
        }
    }

    /// Builds the input a pipeline of `task` expects for a chat turn.
    pub fn for_task(task: Task, question: &str, context: String) -> Self {
        match task {
            Task::Summarization => Self::summarize(context),
            Task::QuestionAnswering => Self::answer(question, context),
            Task::Conversational => Self::converse(format!("{}\n\n{}", context, question)),
        }
    }

    pub fn task(&self) -> Task {
        match self {
            PipelineInput::Summarize { .. } => Task::Summarization,
            PipelineInput::Answer { .. } => Task::QuestionAnswering,
            PipelineInput::Converse { .. } => Task::Conversational,
        }
    }
}

/// A constructed inference pipeline.
///
/// `run` returns the runtime's raw output; normalization is the adapter's
/// job, not the backend's.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn task(&self) -> Task;

    /// Returns the model identifier (e.g. `"facebook/bart-large-cnn"`).
    fn model_name(&self) -> &str;

    async fn run(&self, input: &PipelineInput) -> Result<Value>;
}

/// Builds pipelines. Called at most once per [`PipelineHandle`] on success.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self, task: Task, model: &str) -> Result<Arc<dyn Pipeline>>;
}

/// Normalized pipeline output.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    Summaries(Vec<String>),
    Answer { answer: String, score: Option<f64> },
    Generated(Vec<String>),
    Unrecognized(Value),
}

impl PipelineOutput {
    /// Converts raw output, trying the shape expected for `task` first.
    pub fn from_raw(task: Task, raw: Value) -> Self {
        let converted = match task {
            Task::Summarization => summaries_from(&raw),
            Task::QuestionAnswering => answer_from(&raw),
            Task::Conversational => generated_from(&raw),
        };

        converted
            .or_else(|| summaries_from(&raw))
            .or_else(|| generated_from(&raw))
            .or_else(|| answer_from(&raw))
            .unwrap_or(PipelineOutput::Unrecognized(raw))
    }

    /// Extracts the reply text.
    pub fn into_text(self) -> Result<String, ChatError> {
        match self {
            PipelineOutput::Summaries(list) => list.into_iter().next().ok_or_else(|| {
                ChatError::MalformedPipelineOutput("empty summarization output".to_string())
            }),
            PipelineOutput::Answer { answer, .. } => Ok(answer),
            PipelineOutput::Generated(list) => list.into_iter().next().ok_or_else(|| {
                ChatError::MalformedPipelineOutput("empty generation output".to_string())
            }),
            PipelineOutput::Unrecognized(raw) => {
                Err(ChatError::MalformedPipelineOutput(preview(&raw)))
            }
        }
    }
}

const PREVIEW_CHARS: usize = 200;

fn preview(raw: &Value) -> String {
    let text = raw.to_string();
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        text
    }
}

/// `[{"summary_text": …}, …]`
fn summaries_from(raw: &Value) -> Option<PipelineOutput> {
    let items = raw.as_array()?;
    let summaries = items
        .iter()
        .map(|item| item.get("summary_text")?.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    Some(PipelineOutput::Summaries(summaries))
}

/// `{"answer": …, "score": …}`, a list of such records, or a bare string.
fn answer_from(raw: &Value) -> Option<PipelineOutput> {
    match raw {
        Value::String(s) => Some(PipelineOutput::Answer {
            answer: s.clone(),
            score: None,
        }),
        Value::Object(map) => {
            let answer = map.get("answer")?.as_str()?;
            Some(PipelineOutput::Answer {
                answer: answer.to_string(),
                score: map.get("score").and_then(Value::as_f64),
            })
        }
        Value::Array(items) => match items.first()? {
            first @ Value::Object(_) => answer_from(first),
            _ => None,
        },
        _ => None,
    }
}

/// `[{"generated_text": …}]` or a single `{"generated_text": …}`.
fn generated_from(raw: &Value) -> Option<PipelineOutput> {
    match raw {
        Value::Array(items) => {
            let texts = items
                .iter()
                .map(|item| item.get("generated_text")?.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()?;
            Some(PipelineOutput::Generated(texts))
        }
        Value::Object(map) => {
            let text = map.get("generated_text")?.as_str()?;
            Some(PipelineOutput::Generated(vec![text.to_string()]))
        }
        _ => None,
    }
}

/// Owns the one pipeline instance for a task/model pair.
pub struct PipelineHandle {
    task: Task,
    model: String,
    loader: Arc<dyn PipelineLoader>,
    slot: OnceCell<Arc<dyn Pipeline>>,
}

impl PipelineHandle {
    pub fn new(task: Task, model: impl Into<String>, loader: Arc<dyn PipelineLoader>) -> Self {
        Self {
            task,
            model: model.into(),
            loader,
            slot: OnceCell::new(),
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.initialized()
    }

    /// Returns the pipeline, building it on first use.
    pub async fn get(&self) -> Result<Arc<dyn Pipeline>, ChatError> {
        self.slot
            .get_or_try_init(|| async {
                info!(task = %self.task, model = %self.model, "loading pipeline");
                let pipeline = self
                    .loader
                    .load(self.task, &self.model)
                    .await
                    .map_err(ChatError::construction)?;
                if pipeline.task() != self.task {
                    return Err(ChatError::PipelineConstructionFailed(format!(
                        "loader returned a {} pipeline for a {} handle",
                        pipeline.task(),
                        self.task
                    )));
                }
                info!(task = %self.task, model = %pipeline.model_name(), "pipeline ready");
                Ok(pipeline)
            })
            .await
            .cloned()
    }

    /// Builds the pipeline now instead of on the first request.
    ///
    /// A failure is logged and returned; the slot stays empty so the next
    /// request retries.
    pub async fn warm_up(&self) -> Result<(), ChatError> {
        self.get().await.map(|_| ()).inspect_err(|e| {
            warn!(kind = e.kind(), error = %e, "pipeline warm-up failed, will retry on first request");
        })
    }

    /// Runs the pipeline and normalizes its output.
    pub async fn invoke(&self, input: &PipelineInput) -> Result<PipelineOutput, ChatError> {
        let pipeline = self.get().await?;
        let raw = pipeline.run(input).await.map_err(ChatError::invocation)?;
        Ok(PipelineOutput::from_raw(self.task, raw))
    }

    /// Runs the pipeline and returns its raw output untouched.
    pub async fn invoke_raw(&self, input: &PipelineInput) -> Result<Value, ChatError> {
        let pipeline = self.get().await?;
        pipeline.run(input).await.map_err(ChatError::invocation)
    }
}
