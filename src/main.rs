mod app;
mod auth;
mod cli;
mod config;
mod conversation;
mod dispatch;
mod error;
mod paths;
mod provider;
mod responder;
mod web;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // API keys and logins may live in a local .env file.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "failed to load .env");
        }
    }

    let args = cli::Args::parse();

    let config_path = match args.config.clone() {
        Some(p) => p,
        None => paths::config_path()?,
    };
    let cfg = config::Config::load_optional(&config_path)?.unwrap_or_default();
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let mode = args.mode.or(cfg.mode).unwrap_or_default();

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    match args.cmd {
        Some(cli::Command::Ask { model, prompt }) => {
            let prompt = prompt.join(" ");
            app::cmd_ask(&http, &cfg, mode, args.stub, model.as_deref(), &prompt).await
        }
        Some(cli::Command::Serve { bind }) => app::cmd_serve(&http, &cfg, mode, args.stub, bind).await,
        None => app::cmd_serve(&http, &cfg, mode, args.stub, None).await,
    }
}
