//! Command declarations and the module registry
//!
//! Modules contribute commands; the registry merges them, validates
//! arguments against each command's declared parameters, and tracks the
//! active module for prompt-aware switching.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::CommandArgs;
use crate::context::RuntimeContext;
use crate::display::DisplayValue;
use crate::error::{Result, TrifectaError};

/// The module every shell always has; its commands never trigger
/// auto-switching.
pub const CORE_MODULE: &str = "core";

/// Declared parameters of a command.
#[derive(Debug, Clone, Default)]
pub struct CommandParams {
    /// Required positionals, in order
    pub required: &'static [&'static str],
    /// Optional positionals, in order
    pub optional: &'static [&'static str],
    /// Flags that take a value, e.g. `("t", "type")`
    pub flags: &'static [(&'static str, &'static str)],
    /// Flags that take no value, e.g. `"r"`
    pub bare_flags: &'static [&'static str],
}

impl CommandParams {
    /// The `syntax` template rendered for help output.
    pub fn template(&self, name: &str) -> String {
        let mut out = name.to_string();
        for required in self.required {
            out.push_str(&format!(" <{required}>"));
        }
        for optional in self.optional {
            out.push_str(&format!(" [{optional}]"));
        }
        for (flag, value) in self.flags {
            out.push_str(&format!(" [-{flag} <{value}>]"));
        }
        for flag in self.bare_flags {
            out.push_str(&format!(" [-{flag}]"));
        }
        out
    }

    /// Validates assembled arguments; failures carry the command name so
    /// the REPL can point at `syntax <cmd>`.
    pub fn validate(&self, name: &str, args: &CommandArgs) -> Result<()> {
        if args.positional.len() < self.required.len() {
            let missing = self.required[args.positional.len()];
            return Err(TrifectaError::invalid_args(
                name,
                format!("missing required argument '{missing}'"),
            ));
        }
        let max = self.required.len() + self.optional.len();
        if args.positional.len() > max {
            return Err(TrifectaError::invalid_args(
                name,
                format!("too many arguments (expected at most {max})"),
            ));
        }
        for flag in args.flags.keys() {
            let known = self.flags.iter().any(|(f, _)| f == flag)
                || self.bare_flags.contains(&flag.as_str());
            if !known {
                return Err(TrifectaError::invalid_args(
                    name,
                    format!("unknown flag '-{flag}'"),
                ));
            }
        }
        Ok(())
    }
}

/// A command handler bound to the runtime context.
pub type CommandHandler = fn(&RuntimeContext, &CommandArgs) -> Result<DisplayValue>;

/// A handler that additionally sees the registry (`help`, `use`, ...).
pub type ShellHandler = fn(&ModuleRegistry, &RuntimeContext, &CommandArgs) -> Result<DisplayValue>;

/// How a command executes. Most commands only need the context; a few
/// shell-level ones inspect the registry itself, which they receive by
/// argument rather than by a stored back-reference.
#[derive(Clone)]
pub enum CommandAction {
    Context(CommandHandler),
    Shell(ShellHandler),
}

/// One registered command.
#[derive(Clone)]
pub struct Command {
    pub name: &'static str,
    pub module: &'static str,
    pub help: &'static str,
    pub params: CommandParams,
    /// Successful execution switches the shell to this command's module
    pub prompt_aware: bool,
    pub action: CommandAction,
}

/// A pluggable command module.
pub trait ShellModule: Send + Sync {
    /// The module's registry name
    fn name(&self) -> &'static str;
    /// A human-readable label for `modules`
    fn label(&self) -> &'static str;
    /// The prompt shown while this module is active
    fn prompt(&self, ctx: &RuntimeContext) -> String;
    /// The commands this module contributes
    fn commands(&self) -> Vec<Command>;
    /// Called once at shell shutdown
    fn shutdown(&self, _ctx: &RuntimeContext) {}
}

/// Merges modules and resolves commands by name.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ShellModule>>,
    commands: HashMap<&'static str, Command>,
}

impl ModuleRegistry {
    /// Builds the registry; a duplicate command name across modules is a
    /// configuration error at boot.
    pub fn new(modules: Vec<Arc<dyn ShellModule>>) -> Result<Self> {
        let mut commands = HashMap::new();
        for module in &modules {
            for command in module.commands() {
                if commands.contains_key(command.name) {
                    return Err(TrifectaError::Config(format!(
                        "duplicate command '{}' contributed by module '{}'",
                        command.name, command.module
                    )));
                }
                commands.insert(command.name, command);
            }
        }
        Ok(Self { modules, commands })
    }

    pub fn modules(&self) -> &[Arc<dyn ShellModule>] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Arc<dyn ShellModule>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// All commands sorted by name, for `help`.
    pub fn commands_sorted(&self) -> Vec<&Command> {
        let mut commands: Vec<&Command> = self.commands.values().collect();
        commands.sort_by_key(|c| c.name);
        commands
    }

    /// The bare flags a command declares; needed before assembly.
    pub fn bare_flags(&self, name: &str) -> Vec<&'static str> {
        self.commands
            .get(name)
            .map(|c| c.params.bare_flags.to_vec())
            .unwrap_or_default()
    }

    /// After a successful execution, decides which module becomes
    /// active: the command's owner when the command is prompt-aware or
    /// lives outside the core module.
    pub fn auto_switch(&self, command: &Command, ctx: &RuntimeContext) {
        if command.prompt_aware || command.module != CORE_MODULE {
            ctx.set_active_module(command.module);
        }
    }

    /// The prompt of the active module.
    pub fn prompt(&self, ctx: &RuntimeContext) -> String {
        let active = ctx.active_module();
        self.module(&active)
            .map(|module| module.prompt(ctx))
            .unwrap_or(active)
    }

    /// Runs every module's shutdown hook.
    pub fn shutdown(&self, ctx: &RuntimeContext) {
        for module in &self.modules {
            module.shutdown(ctx);
        }
    }
}
