use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, Result};
use colored::*;

use codecook_core::context::{self, FileContext};
use codecook_core::{AiResponse, AiService, ChatMessage, Config, Provider};

use crate::ConfigAction;

pub enum Review {
    Explain,
    Fix,
}

/// Parses `START-END` (or a single line number) into a 1-based inclusive range.
pub fn parse_line_range(s: &str) -> Result<(usize, usize), String> {
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid line number '{}'", v))
    };
    let (start, end) = match s.split_once('-') {
        Some((a, b)) => (parse(a)?, parse(b)?),
        None => {
            let n = parse(s)?;
            (n, n)
        }
    };
    if start == 0 || end < start {
        return Err(format!("invalid line range '{}'", s));
    }
    Ok((start, end))
}

/// Loads a file as assistant context, optionally narrowed to a line range.
pub fn load_context(path: &Path, lines: Option<(usize, usize)>) -> Result<FileContext> {
    let ctx = FileContext::from_path(path)?;
    match lines {
        Some((start, end)) => ctx.with_line_range(start, end),
        None => Ok(ctx),
    }
}

fn print_fragment(fragment: &str) {
    print!("{}", fragment);
    let _ = io::stdout().flush();
}

pub fn print_footer(response: &AiResponse) {
    let usage = response
        .usage
        .as_ref()
        .map(|u| format!(" · {} tokens", u.total_tokens))
        .unwrap_or_default();
    println!("\n{}", format!("[{}{}]", response.model, usage).dimmed());
}

async fn run_turn(service: &AiService, messages: &[ChatMessage], stream: bool) -> Result<()> {
    let info = service.model_info();
    println!(
        "🤖 {} ({})\n",
        info.provider.display_name().bold().magenta(),
        info.model.dimmed()
    );

    let response = if stream {
        service.stream(messages, print_fragment, None).await?
    } else {
        let response = service.send(messages, None).await?;
        print!("{}", response.content);
        response
    };

    print_footer(&response);
    Ok(())
}

pub async fn ask(
    service: &AiService,
    prompt: &str,
    file: Option<&Path>,
    lines: Option<(usize, usize)>,
    stream: bool,
) -> Result<()> {
    let file_context = match file {
        Some(path) if service.settings().include_file_context() => Some(load_context(path, lines)?),
        _ => None,
    };

    let messages = vec![
        ChatMessage::system(context::system_prompt(file_context.as_ref())),
        ChatMessage::user(prompt),
    ];
    run_turn(service, &messages, stream).await
}

pub async fn review(
    service: &AiService,
    file: &Path,
    lines: Option<(usize, usize)>,
    kind: Review,
) -> Result<()> {
    let ctx = load_context(file, lines)?;
    let prompt = match kind {
        Review::Explain => context::explain_prompt(ctx.code(), &ctx.language),
        Review::Fix => context::fix_prompt(ctx.code(), &ctx.language),
    };

    let messages = vec![
        ChatMessage::system(context::system_prompt(None)),
        ChatMessage::user(prompt),
    ];
    run_turn(service, &messages, true).await
}

pub async fn generate(service: &AiService, description: &str, language: &str) -> Result<()> {
    let messages = vec![
        ChatMessage::system(context::system_prompt(None)),
        ChatMessage::user(context::generate_prompt(description, language)),
    ];
    run_turn(service, &messages, true).await
}

pub fn list_providers(service: &AiService) {
    let current = service.current_provider();
    for provider in Provider::all() {
        let marker = if provider == current { "●".green() } else { "○".dimmed() };
        let status = match service.settings().key_source(provider) {
            Some("local") => "no key needed".green(),
            Some(source) => format!("key from {}", source).green(),
            None => "API key missing".red(),
        };
        println!(
            "{} {:<8} {:<30} {:<28} {}",
            marker,
            provider.as_str().bold(),
            provider.description(),
            service.settings().model(provider).cyan(),
            status
        );
    }
}

pub async fn list_models(service: &AiService) -> Result<()> {
    let provider = service.current_provider();
    let models = service.list_models(provider).await?;
    let configured = service.settings().model(provider);

    println!("{}", format!("{} models:", provider.display_name()).bold());
    if models.is_empty() {
        println!("{}", "No models found".red());
    }
    for model in models {
        if model == configured {
            println!("  {} {}", model.green(), "(configured)".dimmed());
        } else {
            println!("  {}", model);
        }
    }
    Ok(())
}

fn mask(key: Option<&str>) -> String {
    match key {
        Some(k) if k.chars().count() > 8 => {
            let chars: Vec<char> = k.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}…{}", head, tail)
        }
        Some(k) if !k.is_empty() => "****".to_string(),
        _ => "(not set)".to_string(),
    }
}

pub fn config(mut config: Config, path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{:<22} {}", "default_provider".bold(), config.default_provider());
            println!("{:<22} {}", "anthropic_api_key".bold(), mask(config.anthropic_api_key.as_deref()));
            println!("{:<22} {}", "openai_api_key".bold(), mask(config.openai_api_key.as_deref()));
            println!("{:<22} {}", "claude_model".bold(), config.model(Provider::Claude));
            println!("{:<22} {}", "openai_model".bold(), config.model(Provider::OpenAI));
            println!("{:<22} {}", "ollama_model".bold(), config.model(Provider::Ollama));
            println!("{:<22} {}", "max_tokens".bold(), config.max_tokens());
            println!("{:<22} {}", "temperature".bold(), config.temperature());
            println!("{:<22} {}", "include_file_context".bold(), config.include_file_context());
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value).map_err(|e| {
                anyhow!("{} (known settings: {})", e, Config::keys().join(", "))
            })?;
            config.save_to(path)?;
            println!("{} {}", "✓ Saved".green(), key.bold());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_range() {
        assert_eq!(parse_line_range("10-24"), Ok((10, 24)));
        assert_eq!(parse_line_range("7"), Ok((7, 7)));
        assert_eq!(parse_line_range(" 3 - 4 "), Ok((3, 4)));
        assert!(parse_line_range("0-2").is_err());
        assert!(parse_line_range("5-2").is_err());
        assert!(parse_line_range("a-b").is_err());
    }

    #[test]
    fn test_mask_hides_keys() {
        assert_eq!(mask(None), "(not set)");
        assert_eq!(mask(Some("")), "(not set)");
        assert_eq!(mask(Some("short")), "****");
        assert_eq!(mask(Some("sk-ant-1234567890")), "sk-a…7890");
    }

    #[test]
    fn test_config_set_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        config(
            Config::new(),
            &path,
            ConfigAction::Set {
                key: "ollama_model".to_string(),
                value: "codellama".to_string(),
            },
        )
        .unwrap();
        let saved = Config::load_from(&path).unwrap();
        assert_eq!(saved.model(Provider::Ollama), "codellama");
    }

    #[test]
    fn test_config_set_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let err = config(
            Config::new(),
            &path,
            ConfigAction::Set {
                key: "colour".to_string(),
                value: "blue".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("known settings"));
        assert!(!path.exists());
    }
}
