//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments, loads configuration, and
//! dispatches to the interactive chat or one of the one-shot commands.

pub mod chat;
pub mod once;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiMessage, ChatRequest};
use crate::cli::chat::run_chat;
use crate::cli::once::run_once;
use crate::cli::say::run_say;
use crate::core::app::ConversationSettings;
use crate::core::chat_stream::{ChatClient, ClientOptions};
use crate::core::config::{path_display, Config};
use crate::core::errors::ApiError;
use crate::core::presenter::toast_for;

#[derive(Parser)]
#[command(name = "disa")]
#[command(version)]
#[command(about = "A streaming chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "Disa talks to OpenAI-compatible chat completion endpoints (OpenRouter by \
default) and streams the reply to your terminal.\n\n\
Authentication:\n\
  The API key is read from OPENROUTER_API_KEY (or the variable named by api_key_env in the \
config file), then from the system keyring (service \"disa\", account \"openrouter\").\n\n\
Chat commands:\n\
  /retry            Re-send the last user message\n\
  /reload           Same as /retry, keeping nothing after the last user message\n\
  /reset            Start a fresh conversation\n\
  /quit             Leave the chat\n\
  Ctrl+C            Stop the reply that is currently streaming"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use instead of the configured default
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// API base URL, e.g. https://openrouter.ai/api/v1
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Read configuration from this file instead of the platform default
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one prompt and stream the reply to stdout
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Send one prompt without streaming and print the reply
    Once {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
}

/// Everything a command needs to talk to the provider.
#[derive(Clone)]
pub struct Session {
    pub config: Config,
    pub client: ChatClient,
    pub model: String,
}

impl Session {
    pub fn load(args: &Args) -> Result<Self, Box<dyn Error>> {
        let config = match &args.config {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        };
        if let Some(path) = &args.config {
            debug!(path = %path_display(path), "loaded config");
        }

        let base_url = args
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| config.base_url().to_string());
        let model = args
            .model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| config.model().to_string());

        let mut options = ClientOptions::new(base_url, config.credentials(None));
        options.read_timeout = config.read_timeout();
        options.attribution = config.attribution();

        Ok(Self {
            client: ChatClient::new(options),
            config,
            model,
        })
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        let mut settings = ConversationSettings::new(self.model.clone());
        settings.sampling = self.config.sampling();
        settings
    }

    /// Single-turn request for `prompt`, with the configured system prompt.
    pub fn request(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.config.system_prompt() {
            messages.push(ApiMessage::new("system", system));
        }
        messages.push(ApiMessage::new("user", prompt));
        ChatRequest::new(self.model.clone(), messages).with_params(self.config.sampling())
    }
}

/// Print a failure the way the user should see it. Cancellation prints nothing.
pub fn report_error(error: &ApiError) {
    debug!(error = %error, "request failed");
    if let Some(toast) = toast_for(error) {
        eprintln!("❌ {}: {}", toast.title, toast.message);
    }
}

pub(crate) fn join_prompt(prompt: Vec<String>, command: &str) -> String {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: disa {command} <prompt>");
        std::process::exit(1);
    }
    prompt
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("disa={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args.log_level);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let session = Session::load(&args)?;

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(session).await,
        Commands::Say { prompt } => run_say(session, join_prompt(prompt, "say")).await,
        Commands::Once { prompt } => run_once(session, join_prompt(prompt, "once")).await,
    }
}
