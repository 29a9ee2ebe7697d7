//! CQL statement splitter.
//!
//! A character scanner that breaks a normalized script into individual
//! statements. Semicolons terminate statements only outside quoted literals;
//! `--` line comments and `/* */` block comments are discarded. The SQL
//! escape `''` inside a single-quoted literal is preserved verbatim and does
//! not close the literal.

use thiserror::Error;

/// Why a script could not be split.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("unterminated single quote in CQL")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote in CQL")]
    UnterminatedDoubleQuote,
    #[error("unterminated block comment in CQL")]
    UnterminatedBlockComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Split a script into trimmed statements, dropping comments and empty
/// statements. Fails if the script ends inside a quote or block comment.
pub fn split_statements(content: &str) -> Result<Vec<String>, SplitError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Default;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::LineComment => {
                if ch == '\n' {
                    state = State::Default;
                    current.push(ch);
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Default;
                }
            }
            State::SingleQuote => {
                if ch == '\'' {
                    // '' is an escaped apostrophe, not a closing quote.
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        current.push_str("''");
                    } else {
                        state = State::Default;
                        current.push(ch);
                    }
                } else {
                    current.push(ch);
                }
            }
            State::DoubleQuote => {
                if ch == '"' {
                    state = State::Default;
                }
                current.push(ch);
            }
            State::Default => match ch {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '\'' => {
                    state = State::SingleQuote;
                    current.push(ch);
                }
                '"' => {
                    state = State::DoubleQuote;
                    current.push(ch);
                }
                ';' => {
                    let stmt = current.trim();
                    if !stmt.is_empty() {
                        statements.push(stmt.to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    match state {
        State::SingleQuote => return Err(SplitError::UnterminatedSingleQuote),
        State::DoubleQuote => return Err(SplitError::UnterminatedDoubleQuote),
        State::BlockComment => return Err(SplitError::UnterminatedBlockComment),
        State::Default | State::LineComment => {}
    }

    // Last statement may lack a trailing semicolon.
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }

    Ok(statements)
}

/// Whether a statement is DDL and therefore needs a schema-agreement barrier.
pub fn is_ddl(statement: &str) -> bool {
    let upper = statement.trim_start().to_uppercase();
    upper.starts_with("CREATE") || upper.starts_with("ALTER") || upper.starts_with("DROP")
}
