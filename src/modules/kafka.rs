//! Kafka module: topic inspection, message access, and scans

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::command::registry::{Command, CommandAction, CommandParams, ShellModule};
use crate::command::CommandArgs;
use crate::codec::{self, ValueType};
use crate::context::RuntimeContext;
use crate::display::DisplayValue;
use crate::error::{Result, TrifectaError};
use crate::kafka::TopicAndPartition;
use crate::kql::{FieldPredicate, Operator, QueryCondition};
use crate::scan::{KqlRestrictions, Predicate, ScanCounter};

const MODULE: &str = "kafka";

/// Commands over Kafka topics and partitions.
pub struct KafkaModule;

impl ShellModule for KafkaModule {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn label(&self) -> &'static str {
        "Kafka topics, messages and scans"
    }

    fn prompt(&self, _ctx: &RuntimeContext) -> String {
        "kafka".to_string()
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
                "kbrokers",
                "Lists the brokers registered in ZooKeeper",
                CommandParams::default(),
                kbrokers,
            ),
            cmd(
                "kls",
                "Lists topics with their partition counts",
                CommandParams {
                    optional: &["prefix"],
                    ..Default::default()
                },
                kls,
            ),
            cmd(
                "ktopic",
                "Shows leader, replicas and ISR per partition",
                CommandParams {
                    required: &["topic"],
                    ..Default::default()
                },
                ktopic,
            ),
            cmd(
                "kstats",
                "Shows per-partition offsets for a topic",
                CommandParams {
                    required: &["topic"],
                    ..Default::default()
                },
                kstats,
            ),
            cmd(
                "kfirst",
                "Shows the earliest offset of a partition",
                CommandParams {
                    required: &["topic", "partition"],
                    ..Default::default()
                },
                kfirst,
            ),
            cmd(
                "klast",
                "Shows the latest offset of a partition",
                CommandParams {
                    required: &["topic", "partition"],
                    ..Default::default()
                },
                klast,
            ),
            cmd(
                "kget",
                "Fetches one message at an offset",
                CommandParams {
                    required: &["topic", "partition", "offset"],
                    flags: &[("t", "valueType"), ("k", "keyType")],
                    ..Default::default()
                },
                kget,
            ),
            cmd(
                "knext",
                "Fetches the message after the cursor",
                CommandParams {
                    optional: &["topic"],
                    flags: &[("t", "valueType")],
                    ..Default::default()
                },
                knext,
            ),
            cmd(
                "kprev",
                "Fetches the message before the cursor",
                CommandParams {
                    optional: &["topic"],
                    flags: &[("t", "valueType")],
                    ..Default::default()
                },
                kprev,
            ),
            cmd(
                "kcount",
                "Counts messages, optionally matching a condition",
                CommandParams {
                    required: &["topic"],
                    optional: &["field", "operator", "value"],
                    ..Default::default()
                },
                kcount,
            ),
            cmd(
                "kfind",
                "Finds messages matching a condition",
                CommandParams {
                    required: &["field", "operator", "value"],
                    flags: &[("t", "topic"), ("l", "limit"), ("g", "groupId"), ("d", "delta")],
                    ..Default::default()
                },
                kfind,
            ),
            cmd(
                "kfindone",
                "Finds the first matching message",
                CommandParams {
                    required: &["field", "operator", "value"],
                    flags: &[("t", "topic"), ("p", "partition")],
                    ..Default::default()
                },
                kfindone,
            ),
            cmd(
                "kput",
                "Publishes a message to a partition",
                CommandParams {
                    required: &["topic", "key", "value"],
                    flags: &[("t", "valueType"), ("p", "partition")],
                    ..Default::default()
                },
                kput,
            ),
            cmd(
                "kcommit",
                "Commits a consumer-group offset",
                CommandParams {
                    required: &["groupId", "topic", "partition", "offset"],
                    flags: &[("m", "metadata")],
                    ..Default::default()
                },
                kcommit,
            ),
            cmd(
                "kfetch",
                "Fetches a consumer-group offset",
                CommandParams {
                    required: &["groupId", "topic", "partition"],
                    ..Default::default()
                },
                kfetch,
            ),
            cmd(
                "kconsumers",
                "Shows consumer-group offsets from ZooKeeper",
                CommandParams {
                    flags: &[("t", "topic")],
                    bare_flags: &["d", "s"],
                    ..Default::default()
                },
                kconsumers,
            ),
        ]
    }
}

// ── argument helpers ──

fn parse_partition(command: &str, raw: &str) -> Result<i32> {
    raw.parse()
        .map_err(|_| TrifectaError::invalid_args(command, format!("'{raw}' is not a partition id")))
}

fn parse_offset(command: &str, raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| TrifectaError::invalid_args(command, format!("'{raw}' is not an offset")))
}

fn parse_operator(command: &str, raw: &str) -> Result<Operator> {
    match raw.to_ascii_lowercase().as_str() {
        "=" | "==" => Ok(Operator::Eq),
        "!=" => Ok(Operator::Ne),
        ">" => Ok(Operator::Gt),
        ">=" => Ok(Operator::Ge),
        "<" => Ok(Operator::Lt),
        "<=" => Ok(Operator::Le),
        "like" => Ok(Operator::Like),
        "contains" => Ok(Operator::Contains),
        other => Err(TrifectaError::invalid_args(
            command,
            format!("unknown operator '{other}'"),
        )),
    }
}

fn condition_predicates(
    command: &str,
    field: &str,
    operator: &str,
    literal: &str,
) -> Result<Arc<Vec<Box<dyn Predicate>>>> {
    let condition = QueryCondition {
        field: field.to_string(),
        op: parse_operator(command, operator)?,
        literal: literal.to_string(),
    };
    Ok(Arc::new(vec![
        Box::new(FieldPredicate::new(&condition)) as Box<dyn Predicate>
    ]))
}

fn required_flag<'a>(command: &str, args: &'a CommandArgs, flag: &str, what: &str) -> Result<&'a str> {
    args.flag_value(flag)
        .ok_or_else(|| TrifectaError::invalid_args(command, format!("missing -{flag} <{what}>")))
}

fn decode_or_dump(data: &[u8], tag: Option<&str>) -> Result<Option<String>> {
    match tag {
        Some(tag) => {
            let value_type = ValueType::parse(tag)?;
            Ok(Some(codec::decode(data, value_type)?))
        }
        None => Ok(None),
    }
}

// ── handlers ──

fn kbrokers(ctx: &RuntimeContext, _args: &CommandArgs) -> Result<DisplayValue> {
    let mut brokers = ctx.zk.get_broker_list()?;
    brokers.sort_by_key(|b| b.id);
    let rows = brokers
        .into_iter()
        .map(|broker| {
            vec![
                broker.id.map(|id| id.to_string()).unwrap_or_default(),
                broker.host,
                broker.port.to_string(),
            ]
        })
        .collect();
    Ok(DisplayValue::Table {
        headers: vec!["id".into(), "host".into(), "port".into()],
        rows,
    })
}

fn kls(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let prefix = args.arg(0).unwrap_or("");
    let mut rows = Vec::new();
    for topic in ctx.zk.get_broker_topic_names()? {
        if !topic.starts_with(prefix) {
            continue;
        }
        let partitions = ctx.zk.get_broker_topic_partitions(&topic)?;
        rows.push(vec![topic, partitions.len().to_string()]);
    }
    Ok(DisplayValue::Table {
        headers: vec!["topic".into(), "partitions".into()],
        rows,
    })
}

fn ktopic(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default();
    let join = |brokers: &[crate::kafka::Broker]| {
        brokers
            .iter()
            .map(|b| b.id.map(|id| id.to_string()).unwrap_or_else(|| b.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    };
    let rows = ctx
        .zk
        .get_topic_details(topic)?
        .into_iter()
        .map(|detail| {
            vec![
                detail.partition_id.to_string(),
                detail
                    .leader
                    .map(|leader| leader.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                join(&detail.replicas),
                join(&detail.isr),
            ]
        })
        .collect();
    Ok(DisplayValue::Table {
        headers: vec![
            "partition".into(),
            "leader".into(),
            "replicas".into(),
            "isr".into(),
        ],
        rows,
    })
}

fn kstats(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default().to_string();
    let partitions = ctx.zk.get_broker_topic_partitions(&topic)?;
    let rows = ctx.block_on(async {
        let mut rows = Vec::new();
        for partition in partitions {
            let tap = TopicAndPartition::new(topic.clone(), partition);
            let mut consumer = ctx.consumer(tap).await?;
            let first = consumer.get_first_offset().await?;
            let last = consumer.get_last_offset().await?;
            consumer.close().await;
            rows.push(vec![
                partition.to_string(),
                first.to_string(),
                last.to_string(),
                (last - first + 1).max(0).to_string(),
            ]);
        }
        Ok::<_, TrifectaError>(rows)
    })?;
    Ok(DisplayValue::Table {
        headers: vec![
            "partition".into(),
            "first".into(),
            "last".into(),
            "messages".into(),
        ],
        rows,
    })
}

fn offset_lookup(
    ctx: &RuntimeContext,
    args: &CommandArgs,
    command: &str,
    earliest: bool,
) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default().to_string();
    let partition = parse_partition(command, args.arg(1).unwrap_or_default())?;
    let offset = ctx.block_on(async {
        let mut consumer = ctx
            .consumer(TopicAndPartition::new(topic.clone(), partition))
            .await?;
        let offset = if earliest {
            consumer.get_first_offset().await
        } else {
            consumer.get_last_offset().await
        };
        consumer.close().await;
        offset
    })?;
    Ok(DisplayValue::text(offset.to_string()))
}

fn kfirst(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    offset_lookup(ctx, args, "kfirst", true)
}

fn klast(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    offset_lookup(ctx, args, "klast", false)
}

fn fetch_at(
    ctx: &RuntimeContext,
    tap: TopicAndPartition,
    offset: i64,
    value_tag: Option<&str>,
    key_tag: Option<&str>,
) -> Result<DisplayValue> {
    let messages = ctx.block_on(async {
        let mut consumer = ctx.consumer(tap.clone()).await?;
        let messages = consumer.fetch_one(offset).await;
        consumer.close().await;
        messages
    })?;
    let message = messages
        .into_iter()
        .find(|m| m.offset == offset)
        .ok_or_else(|| {
            TrifectaError::Query(format!("no message at {tap}@{offset}"))
        })?;
    ctx.set_cursor(tap, offset);

    let decoded_value = decode_or_dump(&message.value, value_tag)?;
    let decoded_key = decode_or_dump(&message.key, key_tag)?;
    match (decoded_value, decoded_key) {
        (None, None) => Ok(DisplayValue::Message(message)),
        (value, key) => {
            let mut lines = Vec::new();
            if let Some(key) = key {
                lines.push(format!("key   : {key}"));
            }
            if let Some(value) = value {
                lines.push(format!("value : {value}"));
            }
            Ok(DisplayValue::Lines(lines))
        }
    }
}

fn kget(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default().to_string();
    let partition = parse_partition("kget", args.arg(1).unwrap_or_default())?;
    let offset = parse_offset("kget", args.arg(2).unwrap_or_default())?;
    fetch_at(
        ctx,
        TopicAndPartition::new(topic, partition),
        offset,
        args.flag_value("t"),
        args.flag_value("k"),
    )
}

fn cursor_step(ctx: &RuntimeContext, args: &CommandArgs, command: &str, step: i64) -> Result<DisplayValue> {
    let cursor = match args.arg(0) {
        Some(topic) => ctx.cursor(topic),
        None => ctx.any_cursor(),
    };
    let (tap, offset) = cursor.ok_or_else(|| {
        TrifectaError::invalid_args(command, "no cursor; fetch a message with kget first")
    })?;
    fetch_at(ctx, tap, offset + step, args.flag_value("t"), None)
}

fn knext(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    cursor_step(ctx, args, "knext", 1)
}

fn kprev(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    cursor_step(ctx, args, "kprev", -1)
}

fn kcount(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default().to_string();
    let predicates = match (args.arg(1), args.arg(2), args.arg(3)) {
        (Some(field), Some(op), Some(value)) => condition_predicates("kcount", field, op, value)?,
        (None, _, _) => Arc::new(Vec::new()),
        _ => {
            return Err(TrifectaError::invalid_args(
                "kcount",
                "a condition needs all of field, operator and value",
            ))
        }
    };
    let engine = ctx.scan_engine()?;
    let total = ctx.block_on(engine.count(
        &topic,
        predicates,
        KqlRestrictions::default(),
        CancellationToken::new(),
    ))?;
    Ok(DisplayValue::text(total.to_string()))
}

fn scan_restrictions(args: &CommandArgs, command: &str) -> Result<KqlRestrictions> {
    let mut restrictions = KqlRestrictions {
        group_id: args.flag_value("g").map(str::to_string),
        delta: None,
    };
    if let Some(delta) = args.flag_value("d") {
        restrictions.delta = Some(parse_offset(command, delta)?);
    }
    Ok(restrictions)
}

fn kfind(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let field = args.arg(0).unwrap_or_default();
    let operator = args.arg(1).unwrap_or_default();
    let value = args.arg(2).unwrap_or_default();
    let topic = required_flag("kfind", args, "t", "topic")?.to_string();
    let limit = match args.flag_value("l") {
        Some(raw) => Some(raw.parse().map_err(|_| {
            TrifectaError::invalid_args("kfind", format!("'{raw}' is not a limit"))
        })?),
        None => None,
    };
    let predicates = condition_predicates("kfind", field, operator, value)?;
    let restrictions = scan_restrictions(args, "kfind")?;
    let engine = ctx.scan_engine()?;
    let counter = ScanCounter::new();
    let messages = ctx.block_on(engine.find_many(
        &topic,
        predicates,
        restrictions,
        limit,
        counter,
        CancellationToken::new(),
    ))?;
    Ok(DisplayValue::Messages(messages))
}

fn kfindone(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let field = args.arg(0).unwrap_or_default();
    let operator = args.arg(1).unwrap_or_default();
    let value = args.arg(2).unwrap_or_default();
    let topic = required_flag("kfindone", args, "t", "topic")?.to_string();
    let predicates = condition_predicates("kfindone", field, operator, value)?;
    let engine = ctx.scan_engine()?;
    let found = match args.flag_value("p") {
        Some(partition) => {
            let partition = parse_partition("kfindone", partition)?;
            ctx.block_on(engine.find_next(
                TopicAndPartition::new(topic, partition),
                predicates,
                KqlRestrictions::default(),
                CancellationToken::new(),
            ))?
        }
        None => ctx.block_on(engine.find_one(
            &topic,
            predicates,
            KqlRestrictions::default(),
            CancellationToken::new(),
        ))?,
    };
    match found {
        Some(message) => Ok(DisplayValue::Message(message)),
        None => Ok(DisplayValue::text("no match")),
    }
}

fn kput(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic = args.arg(0).unwrap_or_default().to_string();
    let key = args.arg(1).unwrap_or_default().to_string();
    let literal = args.arg(2).unwrap_or_default().to_string();
    let partition = match args.flag_value("p") {
        Some(raw) => parse_partition("kput", raw)?,
        None => 0,
    };
    let value_type = match args.flag_value("t") {
        Some(tag) => ValueType::parse(tag)?,
        None => codec::guess(&literal),
    };
    let value = codec::encode(&literal, value_type)?;
    let tap = TopicAndPartition::new(topic, partition);
    let offset = ctx.block_on(async {
        let mut consumer = ctx.consumer(tap.clone()).await?;
        let offset = consumer
            .publish(Some(key.as_bytes()), &value)
            .await;
        consumer.close().await;
        offset
    })?;
    Ok(DisplayValue::text(format!("published to {tap}@{offset}")))
}

fn kcommit(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let group = args.arg(0).unwrap_or_default().to_string();
    let topic = args.arg(1).unwrap_or_default().to_string();
    let partition = parse_partition("kcommit", args.arg(2).unwrap_or_default())?;
    let offset = parse_offset("kcommit", args.arg(3).unwrap_or_default())?;
    let metadata = args.flag_value("m").unwrap_or("").to_string();
    ctx.block_on(async {
        let mut consumer = ctx
            .consumer(TopicAndPartition::new(topic.clone(), partition))
            .await?;
        let result = consumer.commit_offsets(&group, offset, &metadata).await;
        consumer.close().await;
        result
    })?;
    Ok(DisplayValue::text(format!(
        "committed {offset} for {group} on {topic}:{partition}"
    )))
}

fn kfetch(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let group = args.arg(0).unwrap_or_default().to_string();
    let topic = args.arg(1).unwrap_or_default().to_string();
    let partition = parse_partition("kfetch", args.arg(2).unwrap_or_default())?;
    let stored = ctx.block_on(async {
        let mut consumer = ctx
            .consumer(TopicAndPartition::new(topic, partition))
            .await?;
        let stored = consumer.fetch_offset(&group).await;
        consumer.close().await;
        stored
    })?;
    match stored {
        Some(offset) => Ok(DisplayValue::text(offset.to_string())),
        None => Ok(DisplayValue::text(format!("no offset stored for {group}"))),
    }
}

fn kconsumers(ctx: &RuntimeContext, args: &CommandArgs) -> Result<DisplayValue> {
    let topic_filter = args.flag_value("t");
    let mut details = if args.has_flag("s") {
        ctx.zk.get_consumers_for_storm(&ctx.config.storm_root)?
    } else {
        ctx.zk.get_consumer_details()?
    };
    if let Some(filter) = topic_filter {
        details.retain(|d| d.topic == filter);
    }
    details.sort_by(|a, b| {
        (&a.group_id, &a.topic, a.partition).cmp(&(&b.group_id, &b.topic, b.partition))
    });

    let with_deltas = args.has_flag("d");
    let mut rows = Vec::new();
    for detail in details {
        let mut row = vec![
            detail.group_id.clone(),
            detail.topic.clone(),
            detail.partition.to_string(),
            detail.offset.to_string(),
        ];
        if with_deltas {
            let last = ctx.block_on(async {
                let mut consumer = ctx
                    .consumer(TopicAndPartition::new(detail.topic.clone(), detail.partition))
                    .await?;
                let last = consumer.get_last_offset().await;
                consumer.close().await;
                last
            });
            row.push(match last {
                Ok(last) => (last - detail.offset + 1).max(0).to_string(),
                Err(_) => "?".to_string(),
            });
        }
        rows.push(row);
    }

    let mut headers: Vec<String> = vec![
        "group".into(),
        "topic".into(),
        "partition".into(),
        "offset".into(),
    ];
    if with_deltas {
        headers.push("remaining".into());
    }
    Ok(DisplayValue::Table { headers, rows })
}
