use thiserror::Error;

/// Failure talking to an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Reasons an agent run ends without a result.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The conversation is dropped; retry the task from the start.
    #[error("provider call failed on turn {turn} ({collected_results} tool results collected)")]
    Provider {
        turn: usize,
        collected_results: usize,
        #[source]
        source: ProviderError,
    },

    #[error("agent stalled on turn {turn}: model returned no tool calls and did not call done")]
    Stalled { turn: usize },

    #[error("reached maximum turn limit ({max_turns})")]
    TurnLimit { max_turns: usize },

    #[error("agent run cancelled before turn {turn}")]
    Cancelled { turn: usize },

    #[error("tool calls still awaiting results: {}", missing.join(", "))]
    PendingToolResults { missing: Vec<String> },
}
