//! KQL: the `select` query language over Kafka topics

mod parser;
mod planner;

pub use parser::{parse, KqlQuery, Operator, QueryCondition};
pub use planner::{compile, execute, FieldPredicate, Projection, QueryResult};

/// True when the line should be dispatched to the query engine.
pub fn is_select(line: &str) -> bool {
    line.trim_start()
        .to_ascii_lowercase()
        .starts_with("select")
}
