use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant, trying your best to answer every question as accurately as possible. \
You are also free to say you do not know if you do not have the information to answer a question. \
You always respond in markdown.";

pub const AUTH_MESSAGE: &str = "Please enter your credentials to access the chat interface";

pub const DEFAULT_BIND: &str = "127.0.0.1:7860";

/// Which front-end to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One provider (GPT) with a plain chat box.
    Single,
    /// GPT or Claude, picked from a dropdown.
    #[default]
    Dual,
}

impl Mode {
    pub fn title(self) -> &'static str {
        match self {
            Mode::Single => "AI chatbot",
            Mode::Dual => "AI Assistant",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Mode::Single => "Please login to use the chat interface",
            Mode::Dual => "Chat with GPT or Claude AI models",
        }
    }

    pub fn openai_model(self) -> &'static str {
        match self {
            Mode::Single => "gpt-4o-mini",
            Mode::Dual => "gpt-4",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Front-end mode; the CLI flag wins over this.
    pub mode: Option<Mode>,

    /// Overrides the built-in system prompt.
    pub system_prompt: Option<String>,

    /// Dropdown label selected by default ("GPT" or "Claude").
    pub default_model: Option<String>,

    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: Option<String>,
    /// Seconds a browser session may sit unused before it is dropped.
    pub session_idle_secs: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<UserEntry>,

    /// Prompt shown by the browser's login dialog.
    pub message: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,

    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}
