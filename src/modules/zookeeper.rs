//! ZooKeeper module: key access, tree walking and session control

use crate::command::registry::{Command, CommandAction, CommandParams, ShellModule};
use crate::command::CommandArgs;
use crate::codec::{self, ValueType};
use crate::context::RuntimeContext;
use crate::display::DisplayValue;
use crate::error::{Result, TrifectaError};
use crate::zk::zk_key_to_path;

const MODULE: &str = "zookeeper";

/// Commands over the ZooKeeper ensemble.
pub struct ZookeeperModule;

impl ShellModule for ZookeeperModule {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn label(&self) -> &'static str {
        "ZooKeeper keys and session"
    }

    fn prompt(&self, ctx: &RuntimeContext) -> String {
        ctx.zk_cwd()
    }

    fn commands(&self) -> Vec<Command> {
        fn cmd(
            name: &'static str,
            help: &'static str,
            params: CommandParams,
            handler: fn(&RuntimeContext, &CommandArgs) -> Result<DisplayValue>,
        ) -> Command {
            Command {
                name,
                module: MODULE,
                help,
                params,
                prompt_aware: true,
                action: CommandAction::Context(handler),
            }
        }

        vec![
            cmd(
                "zcd",
                "Changes the ZooKeeper working directory",
                CommandParams {
                    optional: &["key"],
                    ..Default::default()
                },
                zcd,
            ),
            cmd(
                "zls",
                "Lists the children of a key",
                CommandParams {
                    optional: &["path"],
                    ..Default::default()
                },
                zls,
            ),
            cmd(
                "zget",
                "Reads a key, optionally decoded as a type",
                CommandParams {
                    required: &["key"],
                    flags: &[("t", "type")],
                    ..Default::default()
                },
                zget,
            ),
            cmd(
                "zput",
                "Writes an encoded value to a key",
                CommandParams {
                    required: &["key", "value"],
                    flags: &[("t", "type")],
                    ..Default::default()
                },
                zput,
            ),
            cmd(
                "zmk",
                "Creates an empty key (with parents)",
                CommandParams {
                    required: &["key"],
                    ..Default::default()
                },
                zmk,
            ),
            cmd(
                "zrm",
                "Deletes a key (-r for recursive)",
                CommandParams {
                    required: &["key"],
                    bare_flags: &["r"],
                    ..Default::default()
                },
                zrm,
            ),
            cmd(
                "zexists",
                "Reports a key's stat fields",
                CommandParams {
                    required: &["key"],
                    ..Default::default()
                },
                zexists,
            ),
            cmd(
                "ztree",
                "Dumps a subtree in pre-order",
                CommandParams {
                    optional: &["path"],
                    ..Default::default()
                },
                ztree,
            ),
            cmd(
                "zsess",
                "Shows the ZooKeeper session id",
                CommandParams::default(),
                zsess,
            ),
            cmd(
                "zstat",
                "Queries server status (four-letter 'stat')",
                CommandParams::default(),
                zstat,
            ),
            cmd(
                "zruok",
                "Checks server liveness (four-letter 'ruok')",
                CommandParams::default(),
                zruok,
            ),
            cmd(
                "zreconnect",
                "Re-establishes the ZooKeeper session",
                CommandParams::default(),
                zreconnect,
            ),
        ]
    }

    fn shutdown(&self, ctx: &RuntimeContext) {
        ctx.zk.close();
    }
}

fn resolve(ctx: &RuntimeContext, key: Option<&str>) -> String {
    match key {
        Some(key) => zk_key_to_path(&ctx.zk_cwd(), key),
        None => ctx.zk_cwd(),
    }
}

fn zcd(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    match args.arg(0) {
        Some(key) => {
            ctx.set_zk_cwd(zk_key_to_path(&ctx.zk_cwd(), key));
            Ok(DisplayValue::None)
        }
        None => Ok(DisplayValue::Text(ctx.zk_cwd())),
    }
}

fn zls(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    Ok(DisplayValue::Lines(ctx.zk.get_children(&path)?))
}

fn zget(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    let data = ctx.zk.read(&path)?;
    match args.flag_value("t") {
        Some(tag) => match ValueType::parse(tag)? {
            ValueType::Json => {
                let doc: serde_json::Value = serde_json::from_slice(&data)?;
                Ok(DisplayValue::Json(doc))
            }
            value_type => Ok(DisplayValue::Text(codec::decode(&data, value_type)?)),
        },
        None => Ok(DisplayValue::Bytes(data)),
    }
}

fn zput(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    let literal = args.arg(1).unwrap_or_default();
    let value_type = match args.flag_value("t") {
        Some(tag) => ValueType::parse(tag)?,
        None => codec::guess(literal),
    };
    let data = codec::encode(literal, value_type)?;
    if ctx.zk.exists(&path)?.is_some() {
        ctx.zk.delete(&path)?;
    }
    ctx.zk.ensure_parents(&path)?;
    ctx.zk.create(&path, data)?;
    Ok(DisplayValue::None)
}

fn zmk(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    ctx.zk.ensure_path(&path)?;
    Ok(DisplayValue::None)
}

fn zrm(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    if args.has_flag("r") {
        ctx.zk.delete_recursively(&path)?;
    } else {
        ctx.zk.delete(&path)?;
    }
    Ok(DisplayValue::None)
}

fn zexists(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    match ctx.zk.exists(&path)? {
        Some(stat) => Ok(DisplayValue::Lines(vec![
            format!("czxid          : {}", stat.czxid),
            format!("mzxid          : {}", stat.mzxid),
            format!("ctime          : {}", stat.ctime),
            format!("mtime          : {}", stat.mtime),
            format!("version        : {}", stat.version),
            format!("cversion       : {}", stat.cversion),
            format!("aversion       : {}", stat.aversion),
            format!("ephemeralOwner : {}", stat.ephemeral_owner),
            format!("dataLength     : {}", stat.data_length),
            format!("numChildren    : {}", stat.num_children),
            format!("pzxid          : {}", stat.pzxid),
        ])),
        None => Err(TrifectaError::ZkNotFound(path)),
    }
}

fn ztree(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let path = resolve(ctx, args.arg(0));
    Ok(DisplayValue::Lines(ctx.zk.tree(&path)?))
}

fn zsess(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    Ok(DisplayValue::text(format!(
        "session 0x{:x} to {}",
        ctx.zk.session_id(),
        ctx.zk.connect_string()
    )))
}

fn zstat(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    Ok(DisplayValue::Text(ctx.zk.four_letter("stat")?))
}

fn zruok(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    Ok(DisplayValue::Text(ctx.zk.four_letter("ruok")?))
}

fn zreconnect(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    ctx.zk.reconnect()?;
    Ok(DisplayValue::text(format!(
        "reconnected to {}",
        ctx.zk.connect_string()
    )))
}
