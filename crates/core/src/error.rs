//! Error types for the opshound domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded
//! context has its own error enum. Tool failures and model failures are
//! kept apart on purpose: the orchestration loop absorbs the former
//! into the exchange as data, while the latter end the exchange.

use thiserror::Error;

/// The top-level error type for all opshound operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model endpoint errors ---
    #[error("Model endpoint error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Transcript invariant violations ---
    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller went away mid-stream; the exchange cannot continue.
    #[error("Client disconnected mid-stream")]
    Disconnected,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by model endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Malformed endpoint response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    Execution { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Tool results do not pair with requests: {detail}")]
    UnpairedToolResult { detail: String },

    #[error("A tool round must contain at least one request")]
    EmptyToolRound,
}
