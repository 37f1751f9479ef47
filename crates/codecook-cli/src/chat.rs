use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::*;
use dialoguer::{theme::ColorfulTheme, Select};

use codecook_core::context;
use codecook_core::{AiService, ChatSession, Provider};

use crate::commands::{load_context, parse_line_range, print_footer};

#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Clear,
    Help,
    Provider(Option<Provider>),
    Model(Option<String>),
    Add(PathBuf, Option<(usize, usize)>),
    Unknown(String),
}

/// Parses a `/command`. Returns `None` for ordinary chat input.
fn parse_command(line: &str) -> Option<Command> {
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };

    Some(match name {
        "quit" | "exit" | "q" => Command::Quit,
        "clear" => Command::Clear,
        "help" => Command::Help,
        "provider" => match arg {
            None => Command::Provider(None),
            Some(a) => match Provider::from_str(a) {
                Some(p) => Command::Provider(Some(p)),
                None => Command::Unknown(format!("unknown provider '{}'", a)),
            },
        },
        "model" => Command::Model(arg.map(str::to_string)),
        "add" => {
            let mut parts = arg.unwrap_or_default().split_whitespace();
            match (parts.next(), parts.next().map(parse_line_range)) {
                (None, _) => Command::Unknown("usage: /add <file> [start-end]".to_string()),
                (Some(_), Some(Err(e))) => Command::Unknown(e),
                (Some(path), range) => Command::Add(PathBuf::from(path), range.and_then(Result::ok)),
            }
        }
        other => Command::Unknown(format!("unknown command '/{}'", other)),
    })
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  {}      switch backend (claude, openai, ollama)", "/provider [name]".cyan());
    println!("  {}         show or change the model for this session", "/model [name]".cyan());
    println!("  {}  send a file or a range of its lines", "/add <file> [start-end]".cyan());
    println!("  {}                forget the conversation so far", "/clear".cyan());
    println!("  {}                 leave", "/quit".cyan());
}

fn choose_provider(current: Provider) -> Result<Provider> {
    let providers = Provider::all();
    let items: Vec<String> = providers
        .iter()
        .map(|p| format!("{} - {}", p.display_name(), p.description()))
        .collect();
    let default = providers.iter().position(|p| *p == current).unwrap_or(0);

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Choose a provider")
        .items(&items)
        .default(default)
        .interact()?;

    Ok(providers[selection])
}

fn print_banner(service: &AiService) {
    let info = service.model_info();
    println!(
        "🤖 {} {} {}",
        "Chatting with".bold(),
        info.provider.display_name().bold().magenta(),
        format!("({})", info.model).dimmed()
    );
}

pub async fn run(service: &mut AiService, file: Option<&Path>) -> Result<()> {
    let file_context = match file {
        Some(path) if service.settings().include_file_context() => Some(load_context(path, None)?),
        _ => None,
    };
    let system_prompt = context::system_prompt(file_context.as_ref());
    let mut session = ChatSession::new();

    print_banner(service);
    if let Some(ctx) = &file_context {
        println!("{} {}", "📄 Context:".dimmed(), ctx.file_name.cyan());
    }
    println!("{}\n", "Type /help for commands, /quit to leave.".dimmed());

    let stdin = io::stdin();
    loop {
        print!("{} ", "you ›".green().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = parse_command(line) {
            match command {
                Command::Quit => break,
                Command::Clear => {
                    session.clear();
                    println!("{}", "✓ Conversation cleared".green());
                }
                Command::Help => print_help(),
                Command::Provider(choice) => {
                    let provider = match choice {
                        Some(p) => p,
                        None => choose_provider(service.current_provider())?,
                    };
                    service.set_provider(provider);
                    print_banner(service);
                }
                Command::Model(None) => println!("{}", service.model_info().model.cyan()),
                Command::Model(Some(model)) => {
                    let key = match service.current_provider() {
                        Provider::Claude => "claude_model",
                        Provider::OpenAI => "openai_model",
                        Provider::Ollama => "ollama_model",
                    };
                    service.settings_mut().set(key, &model)?;
                    print_banner(service);
                }
                Command::Add(path, lines) => match load_context(&path, lines) {
                    Ok(ctx) => {
                        let prompt = context::add_to_chat_prompt(ctx.code(), &ctx.language);
                        turn(service, &mut session, &system_prompt, &prompt).await;
                    }
                    Err(e) => println!("{} {}", "❌".red(), e.to_string().red()),
                },
                Command::Unknown(message) => println!("{}", message.red()),
            }
            continue;
        }

        turn(service, &mut session, &system_prompt, line).await;
    }

    println!("{}", "👋 Bye".dimmed());
    Ok(())
}

/// Streams one reply to stdout. Failures are reported and the turn is dropped.
async fn turn(service: &AiService, session: &mut ChatSession, system_prompt: &str, text: &str) {
    println!();
    let result = session
        .send_streaming(service, system_prompt, text, |fragment| {
            print!("{}", fragment);
            let _ = io::stdout().flush();
        })
        .await;

    match result {
        Ok(response) => print_footer(&response),
        Err(e) => println!("\n{} {}", "❌".red(), e.to_string().red()),
    }
    println!();
}
