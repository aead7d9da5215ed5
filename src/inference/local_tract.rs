//! Tract-based local extractive question answering.
//!
//! Pure-Rust path: loads an ONNX QA model with tract-onnx, tokenizes the
//! question/context pair with the tokenizers crate, and picks the best
//! answer span from the start/end logits. Model files are downloaded once
//! into the cache directory; after that no network calls are made.
//!
//! Contexts longer than one model input are split into overlapping
//! windows of at most [`MAX_SEQ_LEN`] tokens. Every window carries the full
//! question and its own special tokens; the best span over all windows wins.

use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Encoding, Tokenizer, TruncationParams, TruncationStrategy};
use tract_onnx::prelude::*;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, PipelineInput, Task};

const MAX_SEQ_LEN: usize = 384;
/// Context tokens shared by consecutive windows.
const DOC_STRIDE: usize = 128;
const MAX_ANSWER_TOKENS: usize = 30;

type QaModel = TypedRunnableModel<TypedModel>;

/// Model manifest: name -> (hub repo, onnx path in repo, tokenizer path in repo).
fn model_manifest(model_name: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match model_name {
        "distilbert-base-cased-distilled-squad" => Ok((
            "Xenova/distilbert-base-cased-distilled-squad",
            "onnx/model.onnx",
            "tokenizer.json",
        )),
        "deepset/roberta-base-squad2" => Ok((
            "Xenova/roberta-base-squad2",
            "onnx/model.onnx",
            "tokenizer.json",
        )),
        _ => bail!(
            "Tract backend supports distilbert-base-cased-distilled-squad and \
             deepset/roberta-base-squad2. Requested: '{}'",
            model_name
        ),
    }
}

fn cache_dir(config: &PipelineConfig) -> Result<PathBuf> {
    let dir = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => {
            let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(base)
                .join(".cache")
                .join("chatbot")
                .join("models")
        }
    };
    std::fs::create_dir_all(&dir).map_err(|e| anyhow::anyhow!("Create cache dir: {}", e))?;
    Ok(dir)
}

fn download_to_cache(hub_url: &str, repo: &str, path: &str, cache_path: &Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!(
        "{}/{}/resolve/main/{}",
        hub_url.trim_end_matches('/'),
        repo,
        path.replace(' ', "%20")
    );
    tracing::info!(url = %url, "downloading model file");
    let resp = reqwest::blocking::get(&url)
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?;
    let bytes = resp
        .bytes()
        .map_err(|e| anyhow::anyhow!("Read body: {}", e))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("Create cache parent: {}", e))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| anyhow::anyhow!("Write cache: {}", e))?;
    Ok(())
}

/// Ensure model and tokenizer are in cache; return (onnx path, tokenizer path).
fn ensure_cached(config: &PipelineConfig, model_name: &str) -> Result<(PathBuf, PathBuf)> {
    let (repo, onnx_rel, tokenizer_rel) = model_manifest(model_name)?;
    let model_dir = cache_dir(config)?.join(model_name.replace('/', "--"));
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(&config.hub_url, repo, onnx_rel, &onnx_path)?;
    download_to_cache(&config.hub_url, repo, tokenizer_rel, &tokenizer_path)?;
    Ok((onnx_path, tokenizer_path))
}

/// Extractive QA model held in memory for the life of the process.
pub struct TractQaPipeline {
    model_name: String,
    model: Arc<QaModel>,
    tokenizer: Arc<Tokenizer>,
}

impl TractQaPipeline {
    pub async fn load(config: &PipelineConfig, task: Task, model_name: &str) -> Result<Self> {
        if task != Task::QuestionAnswering {
            bail!("Local pipeline provider only supports question-answering, not {}", task);
        }
        model_manifest(model_name)?;

        let config = config.clone();
        let name = model_name.to_string();
        let (model, tokenizer) =
            tokio::task::spawn_blocking(move || load_blocking(&config, &name)).await??;

        Ok(Self {
            model_name: model_name.to_string(),
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

fn load_blocking(config: &PipelineConfig, model_name: &str) -> Result<(QaModel, Tokenizer)> {
    let (onnx_path, tokenizer_path) = ensure_cached(config, model_name)?;

    let mut tokenizer =
        Tokenizer::from_file(&tokenizer_path).map_err(|e| anyhow::anyhow!("Load tokenizer: {}", e))?;
    configure_windows(&mut tokenizer, MAX_SEQ_LEN, DOC_STRIDE)?;

    let model = tract_onnx::onnx()
        .model_for_path(onnx_path)
        .map_err(|e| anyhow::anyhow!("Load ONNX: {}", e))?
        .into_optimized()
        .map_err(|e| anyhow::anyhow!("Optimize: {}", e))?
        .into_runnable()
        .map_err(|e| anyhow::anyhow!("Build tract runnable: {}", e))?;

    Ok((model, tokenizer))
}

#[async_trait]
impl Pipeline for TractQaPipeline {
    fn task(&self) -> Task {
        Task::QuestionAnswering
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn run(&self, input: &PipelineInput) -> Result<Value> {
        let PipelineInput::Answer { question, context } = input else {
            bail!("{} input sent to a question-answering pipeline", input.task());
        };

        let model = self.model.clone();
        let tokenizer = self.tokenizer.clone();
        let question = question.clone();
        let context = context.clone();

        tokio::task::spawn_blocking(move || run_qa(&model, &tokenizer, &question, &context))
            .await?
    }
}

/// Truncate only the context, spilling the rest into overflowing
/// encodings that overlap by `stride` tokens.
fn configure_windows(tokenizer: &mut Tokenizer, max_length: usize, stride: usize) -> Result<()> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            stride,
            strategy: TruncationStrategy::OnlySecond,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Configure truncation: {}", e))?;
    Ok(())
}

/// Encodes the pair and returns the first window followed by its overflow.
fn windows(tokenizer: &Tokenizer, question: &str, context: &str) -> Result<Vec<Encoding>> {
    let mut first = tokenizer
        .encode((question, context), true)
        .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))?;
    let overflow = first.take_overflowing();
    Ok(std::iter::once(first).chain(overflow).collect())
}

/// Answer span in context character offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: usize,
    end: usize,
    score: f64,
}

/// Keeps the higher-scoring span; ties go to the earlier window.
fn better(current: Option<Span>, candidate: Span) -> Option<Span> {
    match current {
        Some(span) if span.score >= candidate.score => Some(span),
        _ => Some(candidate),
    }
}

fn run_qa(model: &QaModel, tokenizer: &Tokenizer, question: &str, context: &str) -> Result<Value> {
    let windows = windows(tokenizer, question, context)?;
    if windows.len() > 1 {
        tracing::debug!(windows = windows.len(), "context split into overlapping windows");
    }

    let mut best = None;
    for window in &windows {
        if let Some(span) = score_window(model, window)? {
            best = better(best, span);
        }
    }

    let Some(span) = best else {
        return Ok(json!({ "answer": "", "score": 0.0, "start": 0, "end": 0 }));
    };
    let answer = context.get(span.start..span.end).unwrap_or_default();

    Ok(json!({
        "answer": answer.trim(),
        "score": span.score,
        "start": span.start,
        "end": span.end,
    }))
}

fn score_window(model: &QaModel, window: &Encoding) -> Result<Option<Span>> {
    let len = window.get_ids().len();
    let input_ids: Vec<i64> = window.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = window
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();

    let input_ids_t: Tensor = ndarray::Array2::from_shape_vec((1, len), input_ids)
        .map_err(|e| anyhow::anyhow!("Input ids shape: {}", e))?
        .into();
    let attention_mask_t: Tensor = ndarray::Array2::from_shape_vec((1, len), attention_mask)
        .map_err(|e| anyhow::anyhow!("Attention mask shape: {}", e))?
        .into();

    let outputs = model.run(tvec!(input_ids_t.into(), attention_mask_t.into()))?;
    if outputs.len() < 2 {
        bail!("QA model returned {} outputs, expected start and end logits", outputs.len());
    }
    let start: Vec<f32> = outputs[0]
        .to_array_view::<f32>()
        .map_err(|e| anyhow::anyhow!("Start logits: {}", e))?
        .iter()
        .copied()
        .collect();
    let end: Vec<f32> = outputs[1]
        .to_array_view::<f32>()
        .map_err(|e| anyhow::anyhow!("End logits: {}", e))?
        .iter()
        .copied()
        .collect();

    let sequence_ids = window.get_sequence_ids();
    let context_tokens: Vec<usize> = (0..len.min(start.len()).min(end.len()))
        .filter(|&i| sequence_ids.get(i).copied().flatten() == Some(1))
        .collect();

    let offsets = window.get_offsets();
    Ok(best_span(&start, &end, &context_tokens).map(|(i, j, score)| Span {
        start: offsets[i].0,
        end: offsets[j].1,
        score,
    }))
}

/// Highest-scoring `(start, end, probability)` over context tokens, with
/// `start <= end` and at most [`MAX_ANSWER_TOKENS`] tokens long.
fn best_span(start: &[f32], end: &[f32], context_tokens: &[usize]) -> Option<(usize, usize, f64)> {
    let start_probs = softmax_over(start, context_tokens);
    let end_probs = softmax_over(end, context_tokens);

    let mut best: Option<(usize, usize, f64)> = None;
    for (a, &i) in context_tokens.iter().enumerate() {
        for (b, &j) in context_tokens.iter().enumerate().skip(a) {
            if j - i >= MAX_ANSWER_TOKENS {
                break;
            }
            let score = start_probs[a] * end_probs[b];
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((i, j, score));
            }
        }
    }
    best
}

fn softmax_over(logits: &[f32], indices: &[usize]) -> Vec<f64> {
    let max = indices
        .iter()
        .map(|&i| logits[i] as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = indices.iter().map(|&i| (logits[i] as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
