//! Editor context attached to the system prompt.
//!
//! When context inclusion is on, the chat surface describes the file the user
//! is looking at: its name, language, and either the selected code or the
//! beginning of the file.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Result};

/// Lines of a file included when nothing is selected.
pub const MAX_CONTEXT_LINES: usize = 100;

pub const SYSTEM_PROMPT: &str = "You are an expert coding assistant integrated into the developer's editor. \
You help developers write, understand, and improve code.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub file_name: String,
    pub language: String,
    pub content: String,
    pub selection: Option<String>,
}

impl FileContext {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let language = language_for_path(Path::new(&file_name)).to_string();
        Self {
            file_name,
            language,
            content: content.into(),
            selection: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read {:?}: {}", path, e))?;
        Ok(Self::new(path.display().to_string(), content))
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        let selection = selection.into();
        self.selection = if selection.is_empty() { None } else { Some(selection) };
        self
    }

    /// Selects lines `start..=end` (1-based, inclusive).
    pub fn with_line_range(self, start: usize, end: usize) -> Result<Self> {
        if start == 0 || end < start {
            bail!("Invalid line range {}-{}", start, end);
        }
        let selected: Vec<&str> = self
            .content
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect();
        if selected.is_empty() {
            bail!("Line range {}-{} is outside {}", start, end, self.file_name);
        }
        let selection = selected.join("\n");
        Ok(self.with_selection(selection))
    }

    /// The code this context refers to: the selection, or the whole file.
    pub fn code(&self) -> &str {
        self.selection.as_deref().unwrap_or(&self.content)
    }

    pub fn render(&self) -> String {
        let mut context = format!(
            "\n\nCurrent file: {}\nLanguage: {}\n",
            self.file_name, self.language
        );

        match &self.selection {
            Some(selected) => {
                context.push_str(&format!(
                    "\nSelected code:\n```{}\n{}\n```\n",
                    self.language, selected
                ));
            }
            None => {
                let head: Vec<&str> = self.content.lines().take(MAX_CONTEXT_LINES).collect();
                let mut text = head.join("\n");
                text.push('\n');
                context.push_str(&format!(
                    "\nFile content (first {} lines):\n```{}\n{}```\n",
                    head.len(),
                    self.language,
                    text
                ));
            }
        }

        context
    }
}

/// The assistant instruction, with file context appended when given.
pub fn system_prompt(context: Option<&FileContext>) -> String {
    match context {
        Some(context) => format!("{} {}", SYSTEM_PROMPT, context.render()),
        None => SYSTEM_PROMPT.to_string(),
    }
}

pub fn language_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "jsx" => "javascriptreact",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "shellscript",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "sql" => "sql",
        _ => "plaintext",
    }
}

pub fn add_to_chat_prompt(code: &str, language: &str) -> String {
    format!(
        "Here's some code I'm working with:\n\n```{}\n{}\n```\n\nCan you help me with this?",
        language, code
    )
}

pub fn explain_prompt(code: &str, language: &str) -> String {
    format!(
        "Please explain what this code does:\n\n```{}\n{}\n```",
        language, code
    )
}

pub fn fix_prompt(code: &str, language: &str) -> String {
    format!(
        "Please review and improve this code:\n\n```{}\n{}\n```\n\nSuggest improvements for:\n- Bug fixes\n- Performance\n- Code quality\n- Best practices",
        language, code
    )
}

pub fn generate_prompt(description: &str, language: &str) -> String {
    format!("Generate {} code for: {}", language, description)
}
