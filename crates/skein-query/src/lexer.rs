//! Tokeniser for the query language.
//!
//! Whitespace-insensitive; keywords (`AND`, `OR`, `NOT`) are matched
//! case-insensitively. Every token carries the byte offset it started at so
//! errors can cite the offending character.

use crate::error::{QueryError, Result};

/// One lexed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the query string.
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Bare word: field name, enum value, duration literal...
    Ident(String),
    Number(i64),
    /// Double- or single-quoted string, quotes stripped.
    Str(String),
    Eof,
}

impl TokenKind {
    /// Human-readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::And => "'AND'".into(),
            Self::Or => "'OR'".into(),
            Self::Not => "'NOT'".into(),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Eq => "'='".into(),
            Self::Ne => "'!='".into(),
            Self::Lt => "'<'".into(),
            Self::Le => "'<='".into(),
            Self::Gt => "'>'".into(),
            Self::Ge => "'>='".into(),
            Self::Ident(s) => format!("'{s}'"),
            Self::Number(n) => format!("'{n}'"),
            Self::Str(s) => format!("\"{s}\""),
            Self::Eof => "end of query".into(),
        }
    }
}

/// Lexes the whole query.
pub fn lex(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, pos: i });
                i += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RParen, pos: i });
                i += 1;
            }
            b'=' => {
                tokens.push(Token { kind: TokenKind::Eq, pos: i });
                i += 1;
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ne, pos: i });
                    i += 2;
                } else {
                    return Err(QueryError::bad_char(i, '!'));
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, pos: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, pos: i });
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, pos: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, pos: i });
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let quote = b;
                let start = i;
                i += 1;
                let content_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(QueryError::unterminated_string(start));
                }
                let content = &input[content_start..i];
                tokens.push(Token {
                    kind: TokenKind::Str(content.to_string()),
                    pos: start,
                });
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                if b == b'-' {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // Digits followed by word characters form an ident (duration
                // literals like `7d`).
                if i < bytes.len() && is_ident_byte(bytes[i]) {
                    while i < bytes.len() && is_ident_byte(bytes[i]) {
                        i += 1;
                    }
                    tokens.push(Token {
                        kind: TokenKind::Ident(input[start..i].to_string()),
                        pos: start,
                    });
                } else {
                    let text = &input[start..i];
                    let n: i64 = text
                        .parse()
                        .map_err(|_| QueryError::bad_number(start, text))?;
                    tokens.push(Token {
                        kind: TokenKind::Number(n),
                        pos: start,
                    });
                }
            }
            _ if is_ident_byte(b) => {
                let start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                let word = &input[start..i];
                let kind = match word.to_ascii_uppercase().as_str() {
                    "AND" => TokenKind::And,
                    "OR" => TokenKind::Or,
                    "NOT" => TokenKind::Not,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, pos: start });
            }
            _ => return Err(QueryError::bad_char(i, input[i..].chars().next().unwrap_or('?'))),
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: input.len(),
    });
    Ok(tokens)
}

/// Ident bytes: letters, digits, `_`, `-`, `.` (dotted metadata keys, kebab
/// values, duration literals).
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_comparison() {
        assert_eq!(
            kinds("status = open"),
            vec![
                TokenKind::Ident("status".into()),
                TokenKind::Eq,
                TokenKind::Ident("open".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_case_insensitive() {
        assert_eq!(
            kinds("a and b OR not c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::And,
                TokenKind::Ident("b".into()),
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Ident("c".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn operators_and_numbers() {
        assert_eq!(
            kinds("priority <= 1"),
            vec![
                TokenKind::Ident("priority".into()),
                TokenKind::Le,
                TokenKind::Number(1),
                TokenKind::Eof
            ]
        );
        assert_eq!(kinds("p != 2")[1], TokenKind::Ne);
    }

    #[test]
    fn durations_lex_as_idents() {
        assert_eq!(
            kinds("updated < 7d")[2],
            TokenKind::Ident("7d".into())
        );
    }

    #[test]
    fn quoted_strings() {
        assert_eq!(
            kinds(r#"title = "hello world""#)[2],
            TokenKind::Str("hello world".into())
        );
        assert_eq!(kinds("title = 'x'")[2], TokenKind::Str("x".into()));
    }

    #[test]
    fn dotted_metadata_key() {
        assert_eq!(
            kinds("metadata.run_id = abc")[0],
            TokenKind::Ident("metadata.run_id".into())
        );
    }

    #[test]
    fn errors_carry_position() {
        let err = lex("status @ open").unwrap_err();
        assert!(err.to_string().contains("position 7"));

        let err = lex(r#"title = "unterminated"#).unwrap_err();
        assert!(err.to_string().contains("position 8"));
    }
}
