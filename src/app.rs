use crate::auth::StaticCredentials;
use crate::config::{self, Config, Mode, ProviderConfig};
use crate::dispatch::{Dispatcher, ModelChoice};
use crate::error::ChatError;
use crate::provider::{self, Provider, Sampling};
use crate::responder::Responder;
use crate::web;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const CLAUDE_MODEL: &str = "claude-3-5-sonnet-20240620";
const CLAUDE_MAX_TOKENS: u32 = 1000;
const CLAUDE_TEMPERATURE: f32 = 0.7;

pub async fn cmd_serve(
    http: &reqwest::Client,
    cfg: &Config,
    mode: Mode,
    stub: bool,
    bind: Option<SocketAddr>,
) -> anyhow::Result<()> {
    // Check logins before any provider is built so a bad config fails fast.
    let gate = build_gate(cfg, std::env::var(crate::auth::USERS_ENV).ok().as_deref())?;
    let dispatcher = build_dispatcher(http, cfg, mode, stub)?;

    let addr = match bind {
        Some(a) => a,
        None => cfg
            .server
            .bind
            .as_deref()
            .unwrap_or(config::DEFAULT_BIND)
            .parse()
            .context("invalid server.bind address")?,
    };

    tracing::info!(
        ?mode,
        stub,
        users = gate.len(),
        models = ?dispatcher.choices(),
        default = %dispatcher.default_choice(),
        "starting chat UI"
    );

    let idle = cfg
        .server
        .session_idle_secs
        .map(Duration::from_secs)
        .unwrap_or(web::DEFAULT_SESSION_IDLE);
    let state = web::AppState::new(dispatcher, Arc::new(gate), page_info(cfg, mode)).with_idle_timeout(idle);
    web::serve(addr, state).await
}

pub async fn cmd_ask(
    http: &reqwest::Client,
    cfg: &Config,
    mode: Mode,
    stub: bool,
    model: Option<&str>,
    prompt: &str,
) -> anyhow::Result<()> {
    use std::io::Write;

    let dispatcher = build_dispatcher(http, cfg, mode, stub)?;
    let session = dispatcher.new_session();
    let choice = dispatcher.select(model)?;

    let mut stream = dispatcher.dispatch_choice(&session, prompt, choice)?;

    let mut out = std::io::stdout();
    let mut printed = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                print!("{}", &text[printed..]);
                printed = text.len();
                out.flush().ok();
            }
            Err(e) => {
                if printed > 0 {
                    println!();
                }
                return Err(anyhow::Error::new(e).context("no complete answer"));
            }
        }
    }
    println!();

    Ok(())
}

fn choices_for(mode: Mode) -> Vec<ModelChoice> {
    match mode {
        Mode::Single => vec![ModelChoice::Gpt],
        Mode::Dual => ModelChoice::ALL.to_vec(),
    }
}

fn default_choice(cfg: &Config, mode: Mode) -> anyhow::Result<ModelChoice> {
    match cfg.default_model.as_deref() {
        Some(label) => label.parse().context("invalid default_model in config"),
        None => Ok(match mode {
            Mode::Single => ModelChoice::Gpt,
            Mode::Dual => ModelChoice::Claude,
        }),
    }
}

/// One responder per track enabled in `mode`. Every enabled provider must
/// have its API key unless `stub` is set.
pub fn build_dispatcher(
    http: &reqwest::Client,
    cfg: &Config,
    mode: Mode,
    stub: bool,
) -> anyhow::Result<Dispatcher> {
    let system_prompt = cfg.system_prompt.as_deref().unwrap_or(config::SYSTEM_PROMPT);

    let mut routes = Vec::new();
    for choice in choices_for(mode) {
        let responder = match choice {
            ModelChoice::Gpt => {
                let model = cfg.openai.model.clone().unwrap_or_else(|| mode.openai_model().to_string());
                let sampling = Sampling {
                    max_tokens: cfg.openai.max_tokens,
                    temperature: cfg.openai.temperature,
                };
                Responder::new(build_provider(http, cfg, choice, stub)?, model).with_sampling(sampling)
            }
            ModelChoice::Claude => {
                let model = cfg.anthropic.model.clone().unwrap_or_else(|| CLAUDE_MODEL.to_string());
                let sampling = Sampling {
                    max_tokens: Some(cfg.anthropic.max_tokens.unwrap_or(CLAUDE_MAX_TOKENS)),
                    temperature: Some(cfg.anthropic.temperature.unwrap_or(CLAUDE_TEMPERATURE)),
                };
                Responder::new(build_provider(http, cfg, choice, stub)?, model).with_sampling(sampling)
            }
        };
        routes.push((choice, responder.with_system_prompt(system_prompt)));
    }

    let default = default_choice(cfg, mode)?;
    Dispatcher::new(routes, default).with_context(|| format!("default model {default} is not served in {mode:?} mode"))
}

fn build_provider(
    http: &reqwest::Client,
    cfg: &Config,
    choice: ModelChoice,
    stub: bool,
) -> anyhow::Result<Arc<dyn Provider>> {
    if stub {
        let name = match choice {
            ModelChoice::Gpt => "openai-stub",
            ModelChoice::Claude => "anthropic-stub",
        };
        return Ok(Arc::new(provider::stub::StubProvider::echo(name)));
    }

    match choice {
        ModelChoice::Gpt => {
            #[cfg(feature = "openai")]
            {
                let key = api_key("openai", &cfg.openai, OPENAI_KEY_ENV)?;
                let base = cfg.openai.base_url.as_deref().unwrap_or(provider::openai::DEFAULT_API_BASE);
                let p = provider::openai::OpenAiProvider::new(http.clone(), &key, base)?;
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "openai"))]
            {
                let _ = (http, cfg, OPENAI_KEY_ENV);
                anyhow::bail!("openai provider is not enabled in this build")
            }
        }
        ModelChoice::Claude => {
            #[cfg(feature = "anthropic")]
            {
                let key = api_key("anthropic", &cfg.anthropic, ANTHROPIC_KEY_ENV)?;
                let base = cfg
                    .anthropic
                    .base_url
                    .as_deref()
                    .unwrap_or(provider::anthropic::DEFAULT_API_BASE);
                let p = provider::anthropic::AnthropicProvider::new(http.clone(), &key, base)?;
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "anthropic"))]
            {
                let _ = (http, cfg, ANTHROPIC_KEY_ENV);
                anyhow::bail!("anthropic provider is not enabled in this build")
            }
        }
    }
}

#[cfg_attr(not(any(feature = "openai", feature = "anthropic")), allow(dead_code))]
fn api_key(provider: &'static str, pc: &ProviderConfig, default_env: &str) -> Result<String, ChatError> {
    let var = pc.api_key_env.clone().unwrap_or_else(|| default_env.to_string());
    match std::env::var(&var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ChatError::MissingSecret { provider, var }),
    }
}

/// Logins from config plus the `DUOCHAT_USERS` list; an empty table is fatal.
fn build_gate(cfg: &Config, env_users: Option<&str>) -> Result<StaticCredentials, ChatError> {
    let mut gate = StaticCredentials::from_entries(&cfg.auth.users);
    if let Some(raw) = env_users {
        gate.merge_list(raw);
    }
    if gate.is_empty() {
        return Err(ChatError::NoCredentials);
    }
    Ok(gate)
}

fn page_info(cfg: &Config, mode: Mode) -> web::PageInfo {
    web::PageInfo {
        title: cfg.server.title.clone().unwrap_or_else(|| mode.title().to_string()),
        description: cfg
            .server
            .description
            .clone()
            .unwrap_or_else(|| mode.description().to_string()),
        auth_message: cfg
            .auth
            .message
            .clone()
            .unwrap_or_else(|| config::AUTH_MESSAGE.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialGate;
    use crate::config::UserEntry;

    fn http() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[test]
    fn dual_mode_serves_both_and_defaults_to_claude() {
        let d = build_dispatcher(&http(), &Config::default(), Mode::Dual, true).unwrap();
        assert_eq!(d.choices(), vec![ModelChoice::Gpt, ModelChoice::Claude]);
        assert_eq!(d.default_choice(), ModelChoice::Claude);
    }

    #[test]
    fn single_mode_serves_gpt_only() {
        let d = build_dispatcher(&http(), &Config::default(), Mode::Single, true).unwrap();
        assert_eq!(d.choices(), vec![ModelChoice::Gpt]);
        assert_eq!(d.default_choice(), ModelChoice::Gpt);
    }

    #[test]
    fn single_mode_rejects_claude_default() {
        let cfg = Config { default_model: Some("Claude".into()), ..Config::default() };
        assert!(build_dispatcher(&http(), &cfg, Mode::Single, true).is_err());
    }

    #[test]
    fn bad_default_label_is_fatal() {
        let cfg = Config { default_model: Some("Mistral".into()), ..Config::default() };
        let err = build_dispatcher(&http(), &cfg, Mode::Dual, true).err().expect("Mistral should be rejected");
        assert!(format!("{err:#}").contains("Mistral"));
    }

    #[cfg(feature = "openai")]
    #[test]
    fn missing_secret_is_fatal() {
        let mut cfg = Config::default();
        cfg.openai.api_key_env = Some("DUOCHAT_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = build_dispatcher(&http(), &cfg, Mode::Single, false).err().expect("key is unset");
        match err.downcast_ref::<ChatError>() {
            Some(ChatError::MissingSecret { provider, var }) => {
                assert_eq!(*provider, "openai");
                assert_eq!(var, "DUOCHAT_TEST_KEY_THAT_IS_NEVER_SET");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn gate_needs_at_least_one_login() {
        assert!(matches!(build_gate(&Config::default(), None), Err(ChatError::NoCredentials)));

        let gate = build_gate(&Config::default(), Some("bob:builder")).unwrap();
        assert!(gate.authenticate("bob", "builder"));

        let mut cfg = Config::default();
        cfg.auth.users.push(UserEntry { username: "alice".into(), password: "pw".into() });
        let gate = build_gate(&cfg, None).unwrap();
        assert!(gate.authenticate("alice", "pw"));
    }

    #[test]
    fn page_text_follows_mode() {
        let p = page_info(&Config::default(), Mode::Single);
        assert_eq!(p.title, "AI chatbot");
        assert_eq!(p.auth_message, config::AUTH_MESSAGE);

        let p = page_info(&Config::default(), Mode::Dual);
        assert_eq!(p.description, "Chat with GPT or Claude AI models");
    }

    #[tokio::test]
    async fn stub_dispatcher_answers_with_echo() {
        let d = build_dispatcher(&http(), &Config::default(), Mode::Dual, true).unwrap();
        let session = d.new_session();
        let out: Vec<_> = d.dispatch(&session, "ping", "GPT").unwrap().collect().await;
        let last = out.last().unwrap().as_ref().unwrap();
        assert!(last.contains("You said: ping"));
        assert!(last.contains("gpt-4"));
    }
}
