//! Answer composition: context → pipeline → reply.
//!
//! [`ChatService`] is the single request path shared by the HTTP server and
//! the `ask` command. [`ChatService::reply`] is the outermost boundary for a
//! chat request: every [`ChatError`] stops here, gets logged with its kind,
//! and becomes an in-band error [`Reply`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{Config, Mode};
use crate::context::{ContextSource, SearchContext, StaticContext};
use crate::error::ChatError;
use crate::inference::InferenceLoader;
use crate::models::Reply;
use crate::pipeline::{PipelineHandle, PipelineInput};
use crate::search_ddg::DuckDuckGo;

pub struct ChatService {
    context: ContextSource,
    pipeline: PipelineHandle,
}

impl ChatService {
    pub fn new(context: ContextSource, pipeline: PipelineHandle) -> Self {
        Self { context, pipeline }
    }

    /// Wires the configured context strategy to a pipeline handle.
    ///
    /// Nothing is loaded yet except the static context file; see
    /// [`start`](Self::start).
    pub fn from_config(config: &Config) -> Result<Self> {
        let context = match config.chat.mode {
            Mode::Search => {
                let ddg = DuckDuckGo::new(
                    Duration::from_secs(config.search.timeout_secs),
                    &config.search.base_url,
                )?;
                ContextSource::Search(SearchContext::new(
                    Arc::new(ddg),
                    config.search.keyword.clone(),
                    config.search.max_results,
                ))
            }
            Mode::Static => ContextSource::Static(StaticContext::load(&config.static_context_path())),
        };

        let loader = InferenceLoader::new(&config.pipeline)?;
        let pipeline = PipelineHandle::new(config.chat_task()?, config.chat_model()?, Arc::new(loader));
        Ok(Self::new(context, pipeline))
    }

    /// [`from_config`](Self::from_config), then warms the pipeline in static
    /// mode. A failed warm-up does not stop startup.
    pub async fn start(config: &Config) -> Result<Self> {
        let service = Self::from_config(config)?;
        if config.chat.mode == Mode::Static {
            let _ = service.pipeline.warm_up().await;
        }
        Ok(service)
    }

    pub fn context(&self) -> &ContextSource {
        &self.context
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }

    /// Resolves context for `question`, runs the pipeline, and returns the
    /// normalized reply text.
    ///
    /// Context failures return before the pipeline is touched, so a search
    /// outage never triggers model loading.
    pub async fn answer(&self, question: &str) -> Result<String, ChatError> {
        let context = self.context.resolve(question).await?;
        debug!(
            source = self.context.name(),
            context_len = context.len(),
            "context resolved"
        );

        let input = PipelineInput::for_task(self.pipeline.task(), question, context);
        self.pipeline.invoke(&input).await?.into_text()
    }

    /// Like [`answer`](Self::answer), but never fails.
    pub async fn reply(&self, question: &str) -> Reply {
        match self.answer(question).await {
            Ok(text) => {
                info!(source = self.context.name(), "chat answered");
                Reply::ok(text)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "chat request failed");
                Reply::from_error(&e)
            }
        }
    }
}
