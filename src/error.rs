use serde::Serialize;

/// Broad category of a [`ChatError`], used by callers that need to tell
/// configuration problems from bad input from network or vendor trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidInput,
    Transport,
    Provider,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{var} is not set; the {provider} provider needs an API key")]
    MissingSecret { provider: &'static str, var: String },

    #[error("no login credentials configured (set [[auth.users]] in config.toml or DUOCHAT_USERS)")]
    NoCredentials,

    #[error("unknown model '{0}'; choose one of: GPT, Claude")]
    UnknownModel(String),

    #[error("model '{0}' is not enabled in this mode")]
    ModelUnavailable(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error: HTTP {status}: {body}")]
    Api {
        provider: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{provider} sent a malformed stream: {detail}")]
    Protocol { provider: &'static str, detail: String },

    #[error("{provider} reported an error: {message}")]
    Upstream { provider: &'static str, message: String },

    #[error("{provider} stream closed before the response completed")]
    Incomplete { provider: &'static str },
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::MissingSecret { .. } | ChatError::NoCredentials => ErrorKind::Configuration,
            ChatError::UnknownModel(_) | ChatError::ModelUnavailable(_) | ChatError::EmptyMessage => {
                ErrorKind::InvalidInput
            }
            ChatError::Transport { .. } => ErrorKind::Transport,
            ChatError::Api { .. }
            | ChatError::Protocol { .. }
            | ChatError::Upstream { .. }
            | ChatError::Incomplete { .. } => ErrorKind::Provider,
        }
    }

    /// Text shown to the user in place of an answer.
    pub fn display_text(&self) -> String {
        format!("Error: {self}")
    }
}
