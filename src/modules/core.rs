//! Core module: help, session variables, modules, and jobs

use crate::command::registry::{
    Command, CommandAction, CommandParams, ModuleRegistry, ShellModule, CORE_MODULE,
};
use crate::command::CommandArgs;
use crate::context::RuntimeContext;
use crate::display::DisplayValue;
use crate::error::{Result, TrifectaError};

/// The always-present module.
pub struct CoreModule;

impl ShellModule for CoreModule {
    fn name(&self) -> &'static str {
        CORE_MODULE
    }

    fn label(&self) -> &'static str {
        "Core commands"
    }

    fn prompt(&self, _ctx: &RuntimeContext) -> String {
        "core".to_string()
    }

    fn commands(&self) -> Vec<Command> {
        vec![
            Command {
                name: "help",
                module: CORE_MODULE,
                help: "Lists available commands",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Shell(help),
            },
            Command {
                name: "syntax",
                module: CORE_MODULE,
                help: "Shows the syntax of a command",
                params: CommandParams {
                    required: &["command"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Shell(syntax),
            },
            Command {
                name: "modules",
                module: CORE_MODULE,
                help: "Lists loaded modules",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Shell(modules),
            },
            Command {
                name: "use",
                module: CORE_MODULE,
                help: "Switches the active module",
                params: CommandParams {
                    required: &["module"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Shell(use_module),
            },
            Command {
                name: "set",
                module: CORE_MODULE,
                help: "Sets a session variable",
                params: CommandParams {
                    required: &["name", "value"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Context(set_var),
            },
            Command {
                name: "get",
                module: CORE_MODULE,
                help: "Reads a session variable",
                params: CommandParams {
                    required: &["name"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Context(get_var),
            },
            Command {
                name: "vars",
                module: CORE_MODULE,
                help: "Lists session variables",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Context(vars),
            },
            Command {
                name: "debug",
                module: CORE_MODULE,
                help: "Toggles debug output (debug [on|off])",
                params: CommandParams {
                    optional: &["state"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Context(debug),
            },
            Command {
                name: "jobs",
                module: CORE_MODULE,
                help: "Lists background jobs",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Context(jobs),
            },
            Command {
                name: "kill",
                module: CORE_MODULE,
                help: "Requests cancellation of a background job",
                params: CommandParams {
                    required: &["jobId"],
                    ..Default::default()
                },
                prompt_aware: false,
                action: CommandAction::Context(kill),
            },
            Command {
                name: "version",
                module: CORE_MODULE,
                help: "Shows the shell version",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Context(version),
            },
            Command {
                name: "exit",
                module: CORE_MODULE,
                help: "Leaves the shell",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Context(noop),
            },
            Command {
                name: "quit",
                module: CORE_MODULE,
                help: "Leaves the shell",
                params: CommandParams::default(),
                prompt_aware: false,
                action: CommandAction::Context(noop),
            },
        ]
    }
}

// `exit`/`quit` are intercepted by the shell loop; the handler exists so
// they participate in help and validation.
fn noop(_ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    Ok(DisplayValue::None)
}

fn help(
    registry: &ModuleRegistry,
    _ctx: &RuntimeContext,
    _args: &CommandArgs,
) -> Result<DisplayValue> {
    let rows = registry
        .commands_sorted()
        .into_iter()
        .map(|command| {
            vec![
                command.name.to_string(),
                command.module.to_string(),
                command.help.to_string(),
            ]
        })
        .collect();
    Ok(DisplayValue::Table {
        headers: vec!["command".into(), "module".into(), "description".into()],
        rows,
    })
}

fn syntax(
    registry: &ModuleRegistry,
    _ctx: &RuntimeContext,
    args: &CommandArgs,
) -> Result<DisplayValue> {
    let name = args.arg(0).unwrap_or_default();
    let command = registry
        .command(name)
        .ok_or_else(|| TrifectaError::invalid_args("syntax", format!("unknown command '{name}'")))?;
    Ok(DisplayValue::text(command.params.template(command.name)))
}

fn modules(
    registry: &ModuleRegistry,
    ctx: &RuntimeContext,
    _args: &CommandArgs,
) -> Result<DisplayValue> {
    let active = ctx.active_module();
    let rows = registry
        .modules()
        .iter()
        .map(|module| {
            vec![
                module.name().to_string(),
                module.label().to_string(),
                if module.name() == active { "*".to_string() } else { String::new() },
            ]
        })
        .collect();
    Ok(DisplayValue::Table {
        headers: vec!["module".into(), "description".into(), "active".into()],
        rows,
    })
}

fn use_module(
    registry: &ModuleRegistry,
    ctx: &RuntimeContext,
    args: &CommandArgs,
) -> Result<DisplayValue> {
    let name = args.arg(0).unwrap_or_default();
    let module = registry
        .module(name)
        .ok_or_else(|| TrifectaError::invalid_args("use", format!("unknown module '{name}'")))?;
    ctx.set_active_module(module.name());
    Ok(DisplayValue::None)
}

fn set_var(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let name = args.arg(0).unwrap_or_default();
    let value = args.arg(1).unwrap_or_default();
    ctx.session.set(name, value);
    Ok(DisplayValue::None)
}

fn get_var(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let name = args.arg(0).unwrap_or_default();
    match ctx.session.get(name) {
        Some(value) => Ok(DisplayValue::Text(value)),
        None => Ok(DisplayValue::text(format!("{name} is not set"))),
    }
}

fn vars(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    let rows = ctx
        .session
        .all()
        .into_iter()
        .map(|(name, value)| vec![name, value])
        .collect();
    Ok(DisplayValue::Table {
        headers: vec!["variable".into(), "value".into()],
        rows,
    })
}

fn debug(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    match args.arg(0) {
        Some("on") => ctx.set_debug(true),
        Some("off") => ctx.set_debug(false),
        Some(other) => {
            return Err(TrifectaError::invalid_args(
                "debug",
                format!("expected 'on' or 'off', found '{other}'"),
            ))
        }
        None => {}
    }
    Ok(DisplayValue::text(format!(
        "debug is {}",
        if ctx.debug_enabled() { "on" } else { "off" }
    )))
}

fn jobs(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    let rows = ctx
        .jobs
        .list()
        .into_iter()
        .map(|status| {
            vec![
                status.id.to_string(),
                status.label,
                status.started.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{:?}", status.state),
            ]
        })
        .collect();
    Ok(DisplayValue::Table {
        headers: vec!["id".into(), "label".into(), "started".into(), "state".into()],
        rows,
    })
}

fn kill(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let raw = args.arg(0).unwrap_or_default();
    let id: usize = raw
        .parse()
        .map_err(|_| TrifectaError::invalid_args("kill", format!("'{raw}' is not a job id")))?;
    if ctx.jobs.cancel(id) {
        Ok(DisplayValue::text(format!("cancellation requested for job {id}")))
    } else {
        Err(TrifectaError::invalid_args(
            "kill",
            format!("no such job {id}"),
        ))
    }
}

fn version(_ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    Ok(DisplayValue::text(format!(
        "trifecta {}",
        env!("CARGO_PKG_VERSION")
    )))
}
