//! Core data models used throughout the chatbot.
//!
//! These types are what flows across the service boundary (requests and
//! replies) and out of the web search collaborator.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// One web search result.
///
/// Only `body` feeds the context; title and link are kept for logging and
/// for callers of the search client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: Option<String>,
    pub href: Option<String>,
    pub body: Option<String>,
}

impl SearchHit {
    /// A hit carrying only a body, as most tests and stubs need.
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }
}

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Client-facing reply: `{"reply": …}` or `{"reply": …, "error": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            error: None,
        }
    }

    /// Maps any failure onto the uniform in-band error shape.
    pub fn from_error(err: &ChatError) -> Self {
        Self {
            reply: format!("Error: {}", err),
            error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}
