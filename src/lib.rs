//! # Chatbot
//!
//! A small question-answering service. A question is paired with context,
//! either live web search results or a fixed local text file, and handed to
//! one pretrained inference pipeline (summarization or extractive question
//! answering). The answer comes back as `{"reply": …}`; any failure comes
//! back in the same shape with `"error": true`.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!  POST /chat ───▶│   ChatService    │
//!  chatbot ask    │ context→pipeline │
//!                 └───┬─────────┬────┘
//!                     ▼         ▼
//!          ┌──────────────┐  ┌──────────────────┐
//!          │ ContextSource│  │  PipelineHandle  │
//!          │ search|static│  │ (construct once) │
//!          └──────────────┘  └────────┬─────────┘
//!                                     ▼
//!                          hf-inference | local tract
//! ```
//!
//! A second surface, the MCP `chat` tool, sends prompts straight to a
//! conversational pipeline and returns its raw output.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Request, reply, and search hit types |
//! | [`error`] | Closed set of request failure kinds |
//! | [`search`] | Web search contract and context aggregation helpers |
//! | [`search_ddg`] | DuckDuckGo HTML search client |
//! | [`context`] | Search-backed and static context resolution |
//! | [`pipeline`] | Construct-once pipeline handle and output normalization |
//! | [`inference`] | Hosted and local inference backends |
//! | [`chat`] | Request composition and reply mapping |
//! | [`server`] | HTTP server |
//! | [`mcp`] | MCP tool server over stdio |

pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod inference;
pub mod mcp;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod search_ddg;
pub mod server;

/// User-Agent sent with every outbound HTTP request.
pub const USER_AGENT: &str = concat!("chatbot/", env!("CARGO_PKG_VERSION"));
