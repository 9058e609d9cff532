//! Parser for `select` statements
//!
//! Grammar:
//! `select <*|field[,field]*> from <topic> [where <cond> {and <cond>}]
//!  [limit N] [with group <id>] [with delta <N>]`

use crate::error::{Result, TrifectaError};
use crate::scan::KqlRestrictions;

/// Comparison operators usable in a `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    Contains,
}

/// One `field <op> literal` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    pub field: String,
    pub op: Operator,
    pub literal: String,
}

/// A parsed `select` statement.
#[derive(Debug, Clone)]
pub struct KqlQuery {
    /// Projected fields; empty means `*`
    pub fields: Vec<String>,
    pub topic: String,
    pub conditions: Vec<QueryCondition>,
    pub limit: Option<usize>,
    pub restrictions: KqlRestrictions,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Symbol(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Token::Word(s) | Token::Quoted(s) | Token::Symbol(s) => s,
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(s) if s.eq_ignore_ascii_case(keyword))
    }
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            literal.push(escaped);
                        }
                        continue;
                    }
                    literal.push(c);
                }
                if !closed {
                    return Err(TrifectaError::Query(format!(
                        "unterminated string literal: {literal}"
                    )));
                }
                tokens.push(Token::Quoted(literal));
            }
            ',' | '*' => {
                chars.next();
                tokens.push(Token::Symbol(c.to_string()));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Symbol("=".to_string()));
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Symbol("!=".to_string()));
                } else {
                    return Err(TrifectaError::Query("dangling '!'".to_string()));
                }
            }
            '>' | '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Symbol(format!("{c}=")));
                } else {
                    tokens.push(Token::Symbol(c.to_string()));
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, ',' | '=' | '!' | '>' | '<' | '\'' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.next() {
            Some(token) if token.is_keyword(keyword) => Ok(()),
            Some(token) => Err(TrifectaError::Query(format!(
                "expected '{keyword}', found '{}'",
                token.text()
            ))),
            None => Err(TrifectaError::Query(format!(
                "expected '{keyword}', found end of statement"
            ))),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            Some(Token::Quoted(word)) => Ok(word),
            Some(token) => Err(TrifectaError::Query(format!(
                "expected {what}, found '{}'",
                token.text()
            ))),
            None => Err(TrifectaError::Query(format!(
                "expected {what}, found end of statement"
            ))),
        }
    }
}

/// Parses a `select` statement.
pub fn parse(text: &str) -> Result<KqlQuery> {
    let mut parser = Parser {
        tokens: lex(text)?,
        pos: 0,
    };
    parser.expect_keyword("select")?;

    let mut fields = Vec::new();
    if parser.peek() == Some(&Token::Symbol("*".to_string())) {
        parser.next();
    } else {
        loop {
            fields.push(parser.expect_word("a field name")?);
            if parser.peek() == Some(&Token::Symbol(",".to_string())) {
                parser.next();
            } else {
                break;
            }
        }
    }

    parser.expect_keyword("from")?;
    let topic = parser.expect_word("a topic name")?;

    let mut conditions = Vec::new();
    let mut limit = None;
    let mut restrictions = KqlRestrictions::default();

    while let Some(token) = parser.peek().cloned() {
        if token.is_keyword("where") {
            parser.next();
            loop {
                conditions.push(parse_condition(&mut parser)?);
                match parser.peek() {
                    Some(token) if token.is_keyword("and") => {
                        parser.next();
                    }
                    _ => break,
                }
            }
        } else if token.is_keyword("limit") {
            parser.next();
            let value = parser.expect_word("a limit")?;
            limit = Some(value.parse().map_err(|_| {
                TrifectaError::Query(format!("'{value}' is not a valid limit"))
            })?);
        } else if token.is_keyword("with") {
            parser.next();
            let knob = parser.expect_word("a restriction")?;
            match knob.to_ascii_lowercase().as_str() {
                "group" => restrictions.group_id = Some(parser.expect_word("a group id")?),
                "delta" => {
                    let value = parser.expect_word("a delta")?;
                    restrictions.delta = Some(value.parse().map_err(|_| {
                        TrifectaError::Query(format!("'{value}' is not a valid delta"))
                    })?);
                }
                other => {
                    return Err(TrifectaError::Query(format!(
                        "unknown restriction '{other}'"
                    )))
                }
            }
        } else {
            return Err(TrifectaError::Query(format!(
                "unexpected token '{}'",
                token.text()
            )));
        }
    }

    Ok(KqlQuery {
        fields,
        topic,
        conditions,
        limit,
        restrictions,
    })
}

fn parse_condition(parser: &mut Parser) -> Result<QueryCondition> {
    let field = parser.expect_word("a field name")?;
    let op = match parser.next() {
        Some(Token::Symbol(op)) => match op.as_str() {
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            other => {
                return Err(TrifectaError::Query(format!("unknown operator '{other}'")))
            }
        },
        Some(token) if token.is_keyword("like") => Operator::Like,
        Some(token) if token.is_keyword("contains") => Operator::Contains,
        Some(token) => {
            return Err(TrifectaError::Query(format!(
                "expected an operator, found '{}'",
                token.text()
            )))
        }
        None => {
            return Err(TrifectaError::Query(
                "expected an operator, found end of statement".to_string(),
            ))
        }
    };
    let literal = parser.expect_word("a literal")?;
    Ok(QueryCondition { field, op, literal })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_statement_parses() {
        let query = parse(
            "select key,value from events where value = 'b' and level > 3 limit 10 with group audit with delta 5",
        )
        .expect("parse");
        assert_eq!(query.fields, vec!["key", "value"]);
        assert_eq!(query.topic, "events");
        assert_eq!(query.conditions.len(), 2);
        assert_eq!(
            query.conditions[0],
            QueryCondition {
                field: "value".to_string(),
                op: Operator::Eq,
                literal: "b".to_string(),
            }
        );
        assert_eq!(query.conditions[1].op, Operator::Gt);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.restrictions.group_id.as_deref(), Some("audit"));
        assert_eq!(query.restrictions.delta, Some(5));
    }

    #[test]
    fn star_projection_is_empty_field_list() {
        let query = parse("select * from events").expect("parse");
        assert!(query.fields.is_empty());
        assert!(query.conditions.is_empty());
        assert_eq!(query.limit, None);
    }

    #[test]
    fn like_and_contains_operators() {
        let query =
            parse("select * from t where value like 'err%' and key contains abc").expect("parse");
        assert_eq!(query.conditions[0].op, Operator::Like);
        assert_eq!(query.conditions[1].op, Operator::Contains);
    }

    #[test]
    fn missing_from_is_rejected() {
        let err = parse("select * events").unwrap_err();
        assert!(err.to_string().contains("from"));
    }

    #[test]
    fn bad_limit_is_rejected() {
        assert!(parse("select * from t limit many").is_err());
    }

    #[test]
    fn unterminated_literal_is_rejected() {
        assert!(parse("select * from t where value = 'oops").is_err());
    }
}
