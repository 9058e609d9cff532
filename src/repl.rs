//! The interactive shell loop
//!
//! Reads a line, dispatches backtick-quoted OS commands or command-line
//! commands, prints results, and classifies errors with actionable
//! hints.

use std::io::{BufRead, Write};
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::registry::{CommandAction, ModuleRegistry};
use crate::command::{assemble, tokenize, Token};
use crate::config;
use crate::context::RuntimeContext;
use crate::display::DisplayValue;
use crate::error::{ErrorHint, Result, TrifectaError};
use crate::kql;
use crate::modules;

/// The interactive shell.
pub struct Shell {
    ctx: Arc<RuntimeContext>,
    registry: ModuleRegistry,
}

impl Shell {
    /// Boots the registry over all modules.
    pub fn new(ctx: Arc<RuntimeContext>) -> Result<Self> {
        let registry = ModuleRegistry::new(modules::all())?;
        Ok(Self { ctx, registry })
    }

    /// Runs the interactive loop until `exit`/`quit` or EOF.
    pub fn run(&self) -> Result<()> {
        println!("{}", "Trifecta: Kafka + ZooKeeper operator shell".bold().cyan());
        println!(
            "{}",
            "Type 'help' for commands, 'exit' to leave".dimmed()
        );
        println!();

        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("{} ", format!("{}>", self.registry.prompt(&self.ctx)).green().bold());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            append_history(line);
            if line == "exit" || line == "quit" {
                break;
            }

            match self.dispatch(line) {
                Ok(value) => self.print_value(&value),
                Err(e) => self.print_error(&e),
            }
        }

        self.registry.shutdown(&self.ctx);
        self.ctx.jobs.cancel_all();
        Ok(())
    }

    /// Runs a single command line (one-shot invocation).
    pub fn run_once(&self, line: &str) -> Result<()> {
        let value = self.dispatch(line)?;
        self.print_value(&value);
        self.registry.shutdown(&self.ctx);
        Ok(())
    }

    /// Interprets one input line.
    pub fn dispatch(&self, line: &str) -> Result<DisplayValue> {
        if let Some(inner) = backtick_command(line) {
            return run_os_command(inner);
        }
        if kql::is_select(line) {
            return self.dispatch_select(line);
        }

        let tokens = tokenize(line)?;
        let Some(first) = tokens.first() else {
            return Ok(DisplayValue::None);
        };
        if let Token::Shell(inner) = first {
            return run_os_command(inner);
        }

        let name = first.text().to_string();
        let command = self
            .registry
            .command(&name)
            .ok_or_else(|| TrifectaError::invalid_args(name.clone(), "unknown command"))?
            .clone();
        let args = assemble(&tokens, command.params.bare_flags)?;
        command.params.validate(command.name, &args)?;

        let value = match &command.action {
            CommandAction::Context(handler) => handler(&self.ctx, &args)?,
            CommandAction::Shell(handler) => handler(&self.registry, &self.ctx, &args)?,
        };
        self.registry.auto_switch(&command, &self.ctx);
        Ok(value)
    }

    /// Runs a `select`; a trailing `&` submits it as a background job.
    fn dispatch_select(&self, line: &str) -> Result<DisplayValue> {
        let (text, background) = match line.trim_end().strip_suffix('&') {
            Some(stripped) => (stripped.trim_end(), true),
            None => (line, false),
        };
        let query = kql::parse(text)?;
        let engine = self.ctx.scan_engine()?;
        let cancel = CancellationToken::new();

        if background {
            let token = cancel.clone();
            let label = text.to_string();
            let columns = self.ctx.columns();
            let handle = self.ctx.runtime().spawn(async move {
                match kql::execute(&engine, &query, token).await {
                    Ok(result) => {
                        let value = DisplayValue::Table {
                            headers: result.labels,
                            rows: result.rows,
                        };
                        println!("\n{}", value.render(columns));
                    }
                    Err(e) => eprintln!("\n{} {e}", "Query failed:".red()),
                }
            });
            let id = self.ctx.jobs.submit(label, cancel, handle);
            return Ok(DisplayValue::Job(id));
        }

        let result = self.ctx.block_on(kql::execute(&engine, &query, cancel))?;
        debug!(rows = result.rows.len(), read = result.messages_read, "query finished");
        Ok(DisplayValue::Table {
            headers: result.labels,
            rows: result.rows,
        })
    }

    fn print_value(&self, value: &DisplayValue) {
        let rendered = value.render(self.ctx.columns());
        if !rendered.is_empty() {
            println!("{rendered}");
        }
    }

    /// Classified error rendering, with stack traces under `debug on`.
    fn print_error(&self, error: &TrifectaError) {
        match error {
            TrifectaError::ZkConnectionLost => {
                eprintln!("{} {error}", "Connection error:".red());
            }
            TrifectaError::InvalidArgs { .. } => {
                eprintln!("{} {error}", "Syntax error:".yellow());
            }
            _ => {
                eprintln!("{} {error}", "Runtime error:".red());
            }
        }
        if let Some(hint) = error.hint() {
            eprintln!("  {}", hint.dimmed());
        }
        if self.ctx.debug_enabled() {
            eprintln!("{error:?}");
        }
    }
}

/// The whole line is an OS command when wrapped in backticks.
fn backtick_command(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.len() >= 2 && line.starts_with('`') && line.ends_with('`') {
        Some(&line[1..line.len() - 1])
    } else {
        None
    }
}

/// Runs an OS command synchronously and captures its stdout.
fn run_os_command(command: &str) -> Result<DisplayValue> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TrifectaError::internal(format!(
            "'{command}' exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(DisplayValue::Text(
        String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
    ))
}

/// Appends a line to `$HOME/.trifecta/history`; history is best-effort.
fn append_history(line: &str) {
    if config::ensure_config_dir().is_err() {
        return;
    }
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config::history_file())
    {
        let _ = writeln!(file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtick_lines_are_os_commands() {
        assert_eq!(backtick_command("`ls -la`"), Some("ls -la"));
        assert_eq!(backtick_command("ls -la"), None);
        assert_eq!(backtick_command("`unbalanced"), None);
    }

    #[test]
    fn os_command_captures_stdout() {
        let value = run_os_command("echo hello").expect("run");
        match value {
            DisplayValue::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn failing_os_command_is_an_error() {
        assert!(run_os_command("exit 3").is_err());
    }
}
