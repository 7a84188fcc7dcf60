use crate::config::Mode;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Chat with GPT or Claude from the browser
#[derive(Debug, Parser)]
#[command(name = "duochat")]
#[command(version)]
#[command(about = "Chat with GPT or Claude from the browser", long_about = None)]
pub struct Args {
    /// Config file (default: <config dir>/config.toml)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Front-end mode (default: config/mode or "dual")
    #[arg(long = "mode", value_enum)]
    pub mode: Option<Mode>,

    /// Answer with an offline stub instead of calling any API
    #[arg(long = "stub")]
    pub stub: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the chat UI (the default when no subcommand is given)
    Serve {
        /// Listen address (default: config/server.bind or 127.0.0.1:7860)
        #[arg(long = "bind", value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Ask one question and stream the answer to stdout
    Ask {
        /// Model label, "GPT" or "Claude"
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// Prompt text
        #[arg(value_name = "PROMPT", required = true)]
        prompt: Vec<String>,
    },
}
