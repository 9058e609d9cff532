//! Typed value codec shared between the ZooKeeper and Kafka subsystems
//!
//! Encodes `(text, type)` pairs into byte arrays and back. All fixed-width
//! values are big-endian on the wire; `bytes` literals use the dotted-hex
//! form (`DE.AD.BE.EF`).

use crate::error::{Result, TrifectaError};
use bytes::{Buf, BufMut};

/// The value types an operator can name with `-t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bytes,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Json,
}

impl ValueType {
    /// Parses a type tag; `text` is accepted as an alias for `string`.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "bytes" => Ok(Self::Bytes),
            "char" => Ok(Self::Char),
            "short" => Ok(Self::Short),
            "int" | "integer" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "string" | "text" => Ok(Self::String),
            "json" => Ok(Self::Json),
            _ => Err(TrifectaError::InvalidType(tag.to_string())),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bytes => "bytes",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Encodes a text literal as the given type.
pub fn encode(text: &str, value_type: ValueType) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match value_type {
        ValueType::Bytes => {
            buf = parse_dotted_hex(text)?;
        }
        ValueType::Char => {
            let unit = text
                .encode_utf16()
                .next()
                .ok_or_else(|| TrifectaError::invalid_literal(text, "char"))?;
            buf.put_u16(unit);
        }
        ValueType::Short => {
            let n: i16 = text
                .trim()
                .parse()
                .map_err(|_| TrifectaError::invalid_literal(text, "short"))?;
            buf.put_i16(n);
        }
        ValueType::Int => {
            let n: i32 = text
                .trim()
                .parse()
                .map_err(|_| TrifectaError::invalid_literal(text, "int"))?;
            buf.put_i32(n);
        }
        ValueType::Long => {
            let n: i64 = text
                .trim()
                .parse()
                .map_err(|_| TrifectaError::invalid_literal(text, "long"))?;
            buf.put_i64(n);
        }
        ValueType::Float => {
            let n: f32 = text
                .trim()
                .parse()
                .map_err(|_| TrifectaError::invalid_literal(text, "float"))?;
            buf.put_f32(n);
        }
        ValueType::Double => {
            let n: f64 = text
                .trim()
                .parse()
                .map_err(|_| TrifectaError::invalid_literal(text, "double"))?;
            buf.put_f64(n);
        }
        ValueType::String => {
            buf.extend_from_slice(unescape(text).as_bytes());
        }
        ValueType::Json => {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|_| TrifectaError::invalid_literal(text, "json"))?;
            let pretty = serde_json::to_string_pretty(&value)?;
            buf.extend_from_slice(pretty.as_bytes());
        }
    }
    Ok(buf)
}

/// Decodes a byte array as the given type; the inverse of [`encode`].
pub fn decode(data: &[u8], value_type: ValueType) -> Result<String> {
    let mut buf = data;
    match value_type {
        ValueType::Bytes => Ok(to_dotted_hex(data)),
        ValueType::Char => {
            if buf.remaining() < 2 {
                return Err(decode_error(data, "char"));
            }
            let unit = buf.get_u16();
            String::from_utf16(&[unit]).map_err(|_| decode_error(data, "char"))
        }
        ValueType::Short => {
            if buf.remaining() < 2 {
                return Err(decode_error(data, "short"));
            }
            Ok(buf.get_i16().to_string())
        }
        ValueType::Int => {
            if buf.remaining() < 4 {
                return Err(decode_error(data, "int"));
            }
            Ok(buf.get_i32().to_string())
        }
        ValueType::Long => {
            if buf.remaining() < 8 {
                return Err(decode_error(data, "long"));
            }
            Ok(buf.get_i64().to_string())
        }
        ValueType::Float => {
            if buf.remaining() < 4 {
                return Err(decode_error(data, "float"));
            }
            Ok(buf.get_f32().to_string())
        }
        ValueType::Double => {
            if buf.remaining() < 8 {
                return Err(decode_error(data, "double"));
            }
            Ok(buf.get_f64().to_string())
        }
        ValueType::String => {
            String::from_utf8(data.to_vec()).map_err(|_| decode_error(data, "string"))
        }
        ValueType::Json => {
            let text =
                std::str::from_utf8(data).map_err(|_| decode_error(data, "json"))?;
            let value: serde_json::Value =
                serde_json::from_str(text).map_err(|_| decode_error(data, "json"))?;
            Ok(serde_json::to_string_pretty(&value)?)
        }
    }
}

fn decode_error(data: &[u8], expected: &str) -> TrifectaError {
    TrifectaError::invalid_literal(to_dotted_hex(data), expected)
}

/// Guesses the type of an untagged literal.
///
/// Precedence is ordered: double, then long, then bytes, then string.
pub fn guess(text: &str) -> ValueType {
    if looks_like_double(text) {
        ValueType::Double
    } else if looks_like_long(text) {
        ValueType::Long
    } else if looks_like_dotted_hex(text) {
        ValueType::Bytes
    } else {
        ValueType::String
    }
}

fn looks_like_double(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    let mut parts = body.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    match parts.next() {
        Some(frac) => {
            !whole.is_empty()
                && !frac.is_empty()
                && whole.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn looks_like_long(text: &str) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}

fn looks_like_dotted_hex(text: &str) -> bool {
    let tokens: Vec<&str> = text.split('.').collect();
    tokens.len() >= 2
        && tokens
            .iter()
            .all(|t| t.len() == 2 && t.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Parses a dotted-hex literal (`AA.BB.CC`, case-insensitive, one byte per
/// token).
pub fn parse_dotted_hex(text: &str) -> Result<Vec<u8>> {
    text.split('.')
        .map(|token| {
            if token.is_empty() || token.len() > 2 {
                return Err(TrifectaError::invalid_literal(text, "bytes"));
            }
            u8::from_str_radix(token, 16)
                .map_err(|_| TrifectaError::invalid_literal(text, "bytes"))
        })
        .collect()
}

/// Renders a byte array as an uppercase dotted-hex literal.
pub fn to_dotted_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Resolves backslash escapes the way a shell string would.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_round_trips() {
        for (text, vt) in [
            ("1234", ValueType::Short),
            ("-70000", ValueType::Int),
            ("8589934592", ValueType::Long),
            ("1.5", ValueType::Float),
            ("-3.141592653589793", ValueType::Double),
        ] {
            let encoded = encode(text, vt).expect("encode");
            assert_eq!(decode(&encoded, vt).expect("decode"), text);
        }
    }

    #[test]
    fn short_is_two_big_endian_bytes() {
        assert_eq!(encode("258", ValueType::Short).unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn char_round_trips_first_code_unit() {
        let encoded = encode("Z", ValueType::Char).expect("encode");
        assert_eq!(encoded, vec![0x00, 0x5A]);
        assert_eq!(decode(&encoded, ValueType::Char).unwrap(), "Z");
    }

    #[test]
    fn bytes_round_trips_dotted_hex() {
        let encoded = encode("de.ad.be.ef", ValueType::Bytes).expect("encode");
        assert_eq!(encoded, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decode(&encoded, ValueType::Bytes).unwrap(), "DE.AD.BE.EF");
    }

    #[test]
    fn string_round_trips_with_escapes() {
        let encoded = encode("hello\\tworld", ValueType::String).expect("encode");
        assert_eq!(encoded, b"hello\tworld");
        assert_eq!(decode(&encoded, ValueType::String).unwrap(), "hello\tworld");
    }

    #[test]
    fn json_round_trips_minified_reparse() {
        let encoded = encode(r#"{"b":1,"a":[2,3]}"#, ValueType::Json).expect("encode");
        let decoded = decode(&encoded, ValueType::Json).expect("decode");
        let left: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        let right: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":[2,3]}"#).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn invalid_literals_are_rejected() {
        assert!(matches!(
            encode("not-a-number", ValueType::Long),
            Err(TrifectaError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            encode("zz.yy", ValueType::Bytes),
            Err(TrifectaError::InvalidLiteral { .. })
        ));
        assert!(matches!(
            ValueType::parse("uuid"),
            Err(TrifectaError::InvalidType(_))
        ));
    }

    #[test]
    fn guessing_precedence() {
        assert_eq!(guess("-3.14"), ValueType::Double);
        assert_eq!(guess("42"), ValueType::Long);
        assert_eq!(guess("-42"), ValueType::Long);
        assert_eq!(guess("de.ad.be.ef"), ValueType::Bytes);
        assert_eq!(guess("hello"), ValueType::String);
    }

    #[test]
    fn guessing_malformed_numeric_falls_back_to_string() {
        assert_eq!(guess("3.14.15"), ValueType::String);
        assert_eq!(guess("-"), ValueType::String);
        assert_eq!(guess(""), ValueType::String);
    }
}
