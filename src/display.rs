//! Rendering of command results
//!
//! Command handlers return a tagged [`DisplayValue`]; the REPL decides
//! how it reaches the terminal. Tables go through comfy-table, JSON is
//! pretty-printed, raw bytes get a dotted-hex dump with an ASCII gutter.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use crate::codec;
use crate::kafka::MessageData;

/// The result of a command, as a tagged variant rather than a dynamic
/// type switch.
#[derive(Debug, Clone)]
pub enum DisplayValue {
    /// Nothing to print
    None,
    /// A single line of text
    Text(String),
    /// Multiple lines of text
    Lines(Vec<String>),
    /// A pretty-printed JSON document
    Json(serde_json::Value),
    /// Raw bytes, shown as a hex dump
    Bytes(Vec<u8>),
    /// A table with a header row
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// A single fetched message
    Message(MessageData),
    /// A set of fetched messages
    Messages(Vec<MessageData>),
    /// A job was submitted
    Job(usize),
}

impl DisplayValue {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Renders the value for the terminal; `columns` controls hex-dump
    /// width.
    pub fn render(&self, columns: usize) -> String {
        match self {
            Self::None => String::new(),
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.join("\n"),
            Self::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Self::Bytes(data) => hex_dump(data, columns),
            Self::Table { headers, rows } => render_table(headers, rows),
            Self::Message(message) => render_message(message, columns),
            Self::Messages(messages) => {
                let headers = ["partition", "offset", "key", "value"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>();
                let rows = messages
                    .iter()
                    .map(|m| {
                        vec![
                            m.partition.to_string(),
                            m.offset.to_string(),
                            preview(&m.key),
                            preview(&m.value),
                        ]
                    })
                    .collect::<Vec<_>>();
                render_table(&headers, &rows)
            }
            Self::Job(id) => format!("Submitted as job {id}"),
        }
    }
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(no results)".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
    for row in rows {
        table.add_row(row.clone());
    }
    table.to_string()
}

fn render_message(message: &MessageData, columns: usize) -> String {
    let mut out = format!(
        "partition {} offset {} (next {}, last {})\n",
        message.partition, message.offset, message.next_offset, message.last_offset
    );
    if !message.key.is_empty() {
        out.push_str("key:\n");
        out.push_str(&hex_dump(&message.key, columns));
        out.push('\n');
    }
    out.push_str("value:\n");
    out.push_str(&hex_dump(&message.value, columns));
    out
}

/// A dotted-hex dump with an ASCII gutter, `columns` bytes per line.
pub fn hex_dump(data: &[u8], columns: usize) -> String {
    let columns = columns.max(1);
    if data.is_empty() {
        return "(empty)".to_string();
    }
    data.chunks(columns)
        .enumerate()
        .map(|(i, chunk)| {
            let hex = codec::to_dotted_hex(chunk);
            let ascii: String = chunk
                .iter()
                .map(|b| {
                    if b.is_ascii_graphic() || *b == b' ' {
                        *b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            let pad = columns * 3 - 1;
            format!("{:08} {hex:<pad$} | {ascii}", i * columns)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(data: &[u8]) -> String {
    const MAX: usize = 60;
    let text = match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => codec::to_dotted_hex(data),
    };
    if text.chars().count() > MAX {
        let truncated: String = text.chars().take(MAX).collect();
        format!("{truncated}…")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_wraps_at_column_width() {
        let dump = hex_dump(b"abcdefgh", 4);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("61.62.63.64"));
        assert!(lines[0].ends_with("| abcd"));
        assert!(lines[1].starts_with("00000004"));
    }

    #[test]
    fn table_render_includes_headers_and_rows() {
        let rendered = DisplayValue::Table {
            headers: vec!["topic".to_string()],
            rows: vec![vec!["events".to_string()]],
        }
        .render(25);
        assert!(rendered.contains("topic"));
        assert!(rendered.contains("events"));
    }

    #[test]
    fn empty_table_prints_placeholder() {
        let rendered = DisplayValue::Table {
            headers: vec!["topic".to_string()],
            rows: Vec::new(),
        }
        .render(25);
        assert_eq!(rendered, "(no results)");
    }
}
