//! Inference backends behind the [`PipelineLoader`] seam.
//!
//! | `pipeline.provider` | Backend |
//! |---------------------|---------|
//! | `"hf-inference"` | [`HfInferencePipeline`], hosted Hugging Face inference |
//! | `"local"` | tract-based extractive QA (requires `--features local-qa-tract`) |
//! | `"disabled"` | every load fails |
//!
//! # Retry Strategy
//!
//! Hosted calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (model loading, server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-qa-tract")]
mod local_tract;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, PipelineInput, PipelineLoader, Task};

/// Environment variable holding an optional Hugging Face access token.
pub const TOKEN_ENV: &str = "HF_TOKEN";

/// Hub `pipeline_tag` values a model may carry and still serve `task`.
fn compatible_tags(task: Task) -> &'static [&'static str] {
    match task {
        Task::Summarization => &["summarization", "text2text-generation"],
        Task::QuestionAnswering => &["question-answering"],
        Task::Conversational => &["conversational", "text-generation", "text2text-generation"],
    }
}

/// Builds pipelines for the configured provider.
pub struct InferenceLoader {
    config: PipelineConfig,
    http: Client,
    retry_base: Duration,
}

impl InferenceLoader {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(crate::USER_AGENT)
            .build()
            .context("Failed to build inference HTTP client")?;
        Ok(Self {
            config: config.clone(),
            http,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Overrides the first backoff delay (tests use zero).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }
}

#[async_trait]
impl PipelineLoader for InferenceLoader {
    async fn load(&self, task: Task, model: &str) -> Result<Arc<dyn Pipeline>> {
        match self.config.provider.as_str() {
            "hf-inference" => {
                let pipeline = HfInferencePipeline::connect(
                    self.http.clone(),
                    &self.config,
                    task,
                    model,
                )
                .await?
                .with_retry_base(self.retry_base);
                Ok(Arc::new(pipeline))
            }
            #[cfg(feature = "local-qa-tract")]
            "local" => {
                let pipeline = local_tract::TractQaPipeline::load(&self.config, task, model).await?;
                Ok(Arc::new(pipeline))
            }
            #[cfg(not(feature = "local-qa-tract"))]
            "local" => bail!("Local pipeline provider requires --features local-qa-tract"),
            "disabled" => bail!("Pipeline provider is disabled"),
            other => bail!("Unknown pipeline provider: {}", other),
        }
    }
}

/// A model served by a Hugging Face inference endpoint.
///
/// Construction resolves the model on the hub and checks that its
/// `pipeline_tag` fits the task, so a typo in the model id fails at load
/// time instead of on every request.
pub struct HfInferencePipeline {
    http: Client,
    url: String,
    task: Task,
    model: String,
    token: Option<String>,
    max_retries: u32,
    retry_base: Duration,
}

impl HfInferencePipeline {
    pub async fn connect(
        http: Client,
        config: &PipelineConfig,
        task: Task,
        model: &str,
    ) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());

        let hub_url = format!(
            "{}/api/models/{}",
            config.hub_url.trim_end_matches('/'),
            model
        );
        let response = with_auth(http.get(&hub_url), token.as_deref())
            .send()
            .await
            .with_context(|| format!("Failed to reach model hub for '{}'", model))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            bail!("model '{}' not found", model);
        }
        // The hub answers 401 both for gated repos and for unknown ids
        // requested without a token.
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let hint = if token.is_some() {
                format!("the token in {} has no access to it", TOKEN_ENV)
            } else {
                format!("set {} to a token with access", TOKEN_ENV)
            };
            bail!(
                "model '{}' is missing or requires authentication ({}): {}",
                model,
                status,
                hint
            );
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Model hub error {} for '{}': {}", status, model, body_text);
        }

        let info: Value = response
            .json()
            .await
            .context("Invalid model hub response")?;
        match info.get("pipeline_tag").and_then(Value::as_str) {
            Some(tag) if compatible_tags(task).contains(&tag) => {
                debug!(model, tag, "model resolved");
            }
            Some(tag) => bail!(
                "model '{}' is a {} model and cannot serve {}",
                model,
                tag,
                task
            ),
            None => warn!(model, %task, "model has no pipeline_tag, assuming it fits"),
        }

        Ok(Self {
            http,
            url: format!("{}/{}", config.endpoint.trim_end_matches('/'), model),
            task,
            model: model.to_string(),
            token,
            max_retries: config.max_retries,
            retry_base: Duration::from_secs(1),
        })
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }
}

fn with_auth(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

/// Request body for one pipeline call.
fn payload(input: &PipelineInput) -> Value {
    match input {
        PipelineInput::Summarize { text, params } => json!({
            "inputs": text,
            "parameters": params,
        }),
        PipelineInput::Answer { question, context } => json!({
            "inputs": { "question": question, "context": context },
        }),
        PipelineInput::Converse { prompt } => json!({ "inputs": prompt }),
    }
}

#[async_trait]
impl Pipeline for HfInferencePipeline {
    fn task(&self) -> Task {
        self.task
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn run(&self, input: &PipelineInput) -> Result<Value> {
        if input.task() != self.task {
            bail!("{} input sent to a {} pipeline", input.task(), self.task);
        }

        let body = payload(input);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = with_auth(self.http.post(&self.url), self.token.as_deref())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.context("Invalid inference response");
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(model = %self.model, %status, attempt, "inference call failed, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "Inference API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Inference API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Inference failed after retries")))
    }
}
