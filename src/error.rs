//! Closed set of failures a chat request can end in.
//!
//! Every failure raised while resolving context or running the pipeline is
//! one of these kinds. The HTTP and CLI surfaces collapse them into the
//! same in-band reply (see [`Reply::from_error`](crate::models::Reply::from_error)),
//! but the kind survives in logs via [`ChatError::kind`].

/// Failure kinds for context resolution and pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The web search call failed or timed out.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    /// The web search returned no results with a usable body.
    #[error("No search results found")]
    NoContextFound,

    /// The inference pipeline could not be built (unknown model, wrong task).
    #[error("failed to load pipeline: {0}")]
    PipelineConstructionFailed(String),

    /// The inference runtime failed while running the pipeline.
    #[error("pipeline failed: {0}")]
    PipelineInvocationFailed(String),

    /// The pipeline returned a shape the adapter does not understand.
    #[error("unexpected pipeline output: {0}")]
    MalformedPipelineOutput(String),
}

impl ChatError {
    /// Stable snake_case label used as the `kind` field in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::SearchUnavailable(_) => "search_unavailable",
            ChatError::NoContextFound => "no_context_found",
            ChatError::PipelineConstructionFailed(_) => "pipeline_construction_failed",
            ChatError::PipelineInvocationFailed(_) => "pipeline_invocation_failed",
            ChatError::MalformedPipelineOutput(_) => "malformed_pipeline_output",
        }
    }

    /// Wraps a backend error, keeping its whole cause chain in the message.
    pub(crate) fn search(err: anyhow::Error) -> Self {
        ChatError::SearchUnavailable(format!("{err:#}"))
    }

    pub(crate) fn construction(err: anyhow::Error) -> Self {
        ChatError::PipelineConstructionFailed(format!("{err:#}"))
    }

    pub(crate) fn invocation(err: anyhow::Error) -> Self {
        ChatError::PipelineInvocationFailed(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            ChatError::SearchUnavailable("x".into()),
            ChatError::NoContextFound,
            ChatError::PipelineConstructionFailed("x".into()),
            ChatError::PipelineInvocationFailed("x".into()),
            ChatError::MalformedPipelineOutput("x".into()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(ChatError::kind).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn search_keeps_cause_chain() {
        let err = anyhow::anyhow!("connection refused").context("DuckDuckGo request failed");
        let chat = ChatError::search(err);
        assert_eq!(
            chat.to_string(),
            "search unavailable: DuckDuckGo request failed: connection refused"
        );
    }
}
