//! Plans a parsed query into predicates and a projection, then runs it
//! through the scan engine.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::parser::{KqlQuery, Operator, QueryCondition};
use crate::error::Result;
use crate::kafka::MessageData;
use crate::scan::{Predicate, ScanCounter, ScanEngine};

/// A compiled `where` condition.
///
/// `key` and `value` compare against the raw message text; any other
/// field is looked up in the value decoded as a JSON document. A message
/// whose value does not decode simply does not match.
pub struct FieldPredicate {
    field: String,
    op: Operator,
    literal: String,
}

impl FieldPredicate {
    pub fn new(condition: &QueryCondition) -> Self {
        Self {
            field: condition.field.clone(),
            op: condition.op,
            literal: condition.literal.clone(),
        }
    }

    fn satisfies_text(&self, actual: &str) -> bool {
        compare_text(self.op, actual, &self.literal)
    }
}

impl Predicate for FieldPredicate {
    fn satisfies(&self, value: &[u8], key: &[u8]) -> bool {
        match self.field.as_str() {
            "value" => self.satisfies_text(&String::from_utf8_lossy(value)),
            "key" => self.satisfies_text(&String::from_utf8_lossy(key)),
            field => {
                let Ok(doc) = serde_json::from_slice::<Value>(value) else {
                    return false;
                };
                match json_field_text(&doc, field) {
                    Some(actual) => compare(self.op, &actual, &self.literal),
                    None => false,
                }
            }
        }
    }
}

/// Numeric-aware comparison for JSON-decoded fields.
fn compare(op: Operator, actual: &str, literal: &str) -> bool {
    if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), literal.parse::<f64>()) {
        return match op {
            Operator::Eq => a == b,
            Operator::Ne => a != b,
            Operator::Gt => a > b,
            Operator::Ge => a >= b,
            Operator::Lt => a < b,
            Operator::Le => a <= b,
            Operator::Like | Operator::Contains => actual.contains(literal),
        };
    }
    compare_text(op, actual, literal)
}

/// Raw-text comparison for the `key` and `value` fields.
fn compare_text(op: Operator, actual: &str, literal: &str) -> bool {
    match op {
        Operator::Eq => actual == literal,
        Operator::Ne => actual != literal,
        Operator::Gt => actual > literal,
        Operator::Ge => actual >= literal,
        Operator::Lt => actual < literal,
        Operator::Le => actual <= literal,
        Operator::Like => like_match(actual, literal),
        Operator::Contains => actual.contains(literal),
    }
}

/// SQL-style `like` with `%` wildcards.
fn like_match(text: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return text == pattern;
    }
    let mut remaining = text;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(segment) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(idx) => remaining = &remaining[idx + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

fn json_field_text(doc: &Value, field: &str) -> Option<String> {
    let entry = doc.get(field)?;
    Some(match entry {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// What the query projects out of each matching message.
#[derive(Debug, Clone)]
pub enum Projection {
    /// `select *`: partition, offset, key and value columns
    All,
    Fields(Vec<String>),
}

impl Projection {
    pub fn labels(&self) -> Vec<String> {
        match self {
            Projection::All => ["partition", "offset", "key", "value"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Projection::Fields(fields) => fields.clone(),
        }
    }

    /// Projects one message into a row, in label order.
    pub fn project(&self, message: &MessageData) -> Vec<String> {
        match self {
            Projection::All => vec![
                message.partition.to_string(),
                message.offset.to_string(),
                display_bytes(&message.key),
                display_bytes(&message.value),
            ],
            Projection::Fields(fields) => fields
                .iter()
                .map(|field| match field.as_str() {
                    "partition" => message.partition.to_string(),
                    "offset" => message.offset.to_string(),
                    "key" => display_bytes(&message.key),
                    "value" => display_bytes(&message.value),
                    other => serde_json::from_slice::<Value>(&message.value)
                        .ok()
                        .and_then(|doc| json_field_text(&doc, other))
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }
}

fn display_bytes(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => crate::codec::to_dotted_hex(data),
    }
}

/// The rows produced by a query, plus how many messages were read to
/// find them.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub labels: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub messages_read: i64,
}

/// Compiles a parsed query into predicates and a projection.
pub fn compile(query: &KqlQuery) -> (Vec<Box<dyn Predicate>>, Projection) {
    let predicates: Vec<Box<dyn Predicate>> = query
        .conditions
        .iter()
        .map(|condition| Box::new(FieldPredicate::new(condition)) as Box<dyn Predicate>)
        .collect();
    let projection = if query.fields.is_empty() {
        Projection::All
    } else {
        Projection::Fields(query.fields.clone())
    };
    (predicates, projection)
}

/// Runs a query through `find_many` and projects the matches.
pub async fn execute(
    engine: &ScanEngine,
    query: &KqlQuery,
    cancel: CancellationToken,
) -> Result<QueryResult> {
    let (predicates, projection) = compile(query);
    let counter = ScanCounter::new();
    let messages = engine
        .find_many(
            &query.topic,
            Arc::new(predicates),
            query.restrictions.clone(),
            query.limit,
            counter.clone(),
            cancel,
        )
        .await?;
    let rows = messages
        .iter()
        .map(|message| projection.project(message))
        .collect();
    Ok(QueryResult {
        labels: projection.labels(),
        rows,
        messages_read: counter.read(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kql::parse;

    fn message(partition: i32, offset: i64, key: &str, value: &str) -> MessageData {
        MessageData {
            partition,
            offset,
            next_offset: offset + 1,
            last_offset: 10,
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn raw_value_comparison() {
        let query = parse("select * from t where value = 'b'").expect("parse");
        let (predicates, _) = compile(&query);
        assert!(predicates[0].satisfies(b"b", b""));
        assert!(!predicates[0].satisfies(b"a", b""));
    }

    #[test]
    fn raw_fields_compare_as_text_even_when_numeric() {
        let query = parse("select * from t where value > '9'").expect("parse");
        let (predicates, _) = compile(&query);
        // lexicographic: "10" sorts below "9"
        assert!(!predicates[0].satisfies(b"10", b""));
        assert!(predicates[0].satisfies(b"91", b""));

        let query = parse("select * from t where value = '08'").expect("parse");
        let (predicates, _) = compile(&query);
        assert!(!predicates[0].satisfies(b"8", b""));
        assert!(predicates[0].satisfies(b"08", b""));

        let query = parse("select * from t where key = '7'").expect("parse");
        let (predicates, _) = compile(&query);
        assert!(predicates[0].satisfies(b"", b"7"));
        assert!(!predicates[0].satisfies(b"", b"7.0"));
    }

    #[test]
    fn json_field_comparison_is_numeric_aware() {
        let query = parse("select * from t where level >= 3").expect("parse");
        let (predicates, _) = compile(&query);
        assert!(predicates[0].satisfies(br#"{"level": 10}"#, b""));
        assert!(!predicates[0].satisfies(br#"{"level": 2}"#, b""));
        // "10" > "3" numerically even though it sorts lower as a string
        assert!(predicates[0].satisfies(br#"{"level": "10"}"#, b""));
    }

    #[test]
    fn undecodable_value_does_not_match() {
        let query = parse("select * from t where level = 1").expect("parse");
        let (predicates, _) = compile(&query);
        assert!(!predicates[0].satisfies(b"not json", b""));
        assert!(!predicates[0].satisfies(br#"{"other": 1}"#, b""));
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("error: disk full", "error%"));
        assert!(like_match("error: disk full", "%disk%"));
        assert!(like_match("error: disk full", "%full"));
        assert!(!like_match("warning", "error%"));
        assert!(like_match("exact", "exact"));
    }

    #[test]
    fn projection_covers_builtin_and_json_fields() {
        let projection = Projection::Fields(vec![
            "partition".to_string(),
            "offset".to_string(),
            "key".to_string(),
            "level".to_string(),
        ]);
        let row = projection.project(&message(1, 7, "k1", r#"{"level": 4}"#));
        assert_eq!(row, vec!["1", "7", "k1", "4"]);
    }

    #[test]
    fn star_projection_shows_raw_columns() {
        let projection = Projection::All;
        let row = projection.project(&message(0, 2, "a", "b"));
        assert_eq!(row, vec!["0", "2", "a", "b"]);
    }
}
