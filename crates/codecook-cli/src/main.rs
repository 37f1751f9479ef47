use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codecook_core::{AiService, Config, Provider};

mod chat;
mod commands;

#[derive(Parser)]
#[command(name = "codecook")]
#[command(about = "Chat with Claude, OpenAI or a local Ollama model about your code")]
struct Cli {
    /// Backend to use instead of the configured default
    #[arg(short, long, global = true, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// Settings file (defaults to the user config directory)
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session
    Chat {
        /// File to describe to the assistant
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Ask a single question
    Ask {
        /// Your question
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// File to describe to the assistant
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Only send these lines of the file, e.g. 10-24
        #[arg(short, long, value_parser = commands::parse_line_range, requires = "file")]
        lines: Option<(usize, usize)>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Explain a file or a range of lines
    Explain {
        file: PathBuf,
        #[arg(short, long, value_parser = commands::parse_line_range)]
        lines: Option<(usize, usize)>,
    },
    /// Suggest fixes and improvements for a file or a range of lines
    Fix {
        file: PathBuf,
        #[arg(short, long, value_parser = commands::parse_line_range)]
        lines: Option<(usize, usize)>,
    },
    /// Generate code from a description
    Generate {
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
        /// Target language
        #[arg(short = 'L', long, default_value = "rust")]
        language: String,
    },
    /// List backends and whether they are ready to use
    Providers,
    /// List models a backend offers
    Models,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the current settings (keys are masked)
    Show,
    /// Change one setting
    Set { key: String, value: String },
    /// Print the settings file location
    Path,
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    Provider::from_str(s).ok_or_else(|| format!("unknown provider '{}' (claude, openai, ollama)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config_file {
        Some(path) => path,
        None => Config::get_config_path()?,
    };
    let config = Config::load_from(&config_path)?;

    let mut service = AiService::new(config);
    if let Some(provider) = cli.provider {
        service.set_provider(provider);
    }

    match cli.command {
        Commands::Chat { file } => chat::run(&mut service, file.as_deref()).await?,
        Commands::Ask { prompt, file, lines, no_stream } => {
            commands::ask(&service, &prompt.join(" "), file.as_deref(), lines, !no_stream).await?
        }
        Commands::Explain { file, lines } => {
            commands::review(&service, &file, lines, commands::Review::Explain).await?
        }
        Commands::Fix { file, lines } => {
            commands::review(&service, &file, lines, commands::Review::Fix).await?
        }
        Commands::Generate { description, language } => {
            commands::generate(&service, &description.join(" "), &language).await?
        }
        Commands::Providers => commands::list_providers(&service),
        Commands::Models => commands::list_models(&service).await?,
        Commands::Config { action } => commands::config(service.settings().clone(), &config_path, action)?,
    }

    Ok(())
}
