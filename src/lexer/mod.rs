//! Lexical analysis for Uya source text.
//!
//! The lexer transforms raw source into a positioned token stream using a
//! longest-match scan: fixed terminals and regex-backed literal patterns all
//! compete at the current offset and the longest match wins, with keywords
//! taking precedence over plain identifiers. Every token carries a [`Span`]
//! with 1-based line/column information and the originating filename so the
//! parser and both backends can report precise locations.

mod lexikon;
mod token;

pub use lexikon::*;
pub use token::*;

use serde::{Deserialize, Serialize};
use std::{error::Error, fmt::Display};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexError(String);

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Error for LexError {}

pub struct Lexer<'a> {
    tokens: Vec<Token>,
    lexikon: Lexikon,
    position: usize,
    col: usize,
    line: usize,
    filename: String,
    input: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, filename: impl ToString) -> Self {
        Self {
            tokens: vec![],
            lexikon: Lexikon::new(),
            position: 0,
            col: 1,
            line: 1,
            filename: filename.to_string(),
            input,
        }
    }

    fn eat_whitespace(&mut self) {
        while let Some(c) = self.input.as_bytes().get(self.position) {
            if !c.is_ascii_whitespace() {
                return;
            }

            if *c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.position += 1;
        }
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        while self.position != self.input.len() {
            self.eat_whitespace();
            if self.position == self.input.len() {
                break;
            }

            let (len, res) = self.lexikon.find_longest_match(
                &self.input[self.position..],
                (self.line, self.col),
                &self.filename,
            );

            if len == 0 {
                return Err(LexError(format!(
                    "failed to lex {}:{}:{}; remaining input starts with {:?}",
                    self.filename,
                    self.line,
                    self.col,
                    &self.input[self.position..self.input.len().min(self.position + 16)]
                )));
            }

            if let Some(t) = res {
                self.tokens.push(t);
            }

            // string literals are the only tokens that may span lines
            let consumed = &self.input[self.position..self.position + len];
            for c in consumed.chars() {
                if c == '\n' {
                    self.line += 1;
                    self.col = 1;
                } else {
                    self.col += 1;
                }
            }
            self.position += len;
        }

        Ok(self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_alphabetic_id() {
        let lexer = Lexer::new("letter", "test.uya");

        assert_eq!(
            Ok(vec![Token::Id {
                value: "letter".into(),
                position: Span::default(),
            }]),
            lexer.lex()
        )
    }

    #[test]
    fn test_lex_numeric() {
        let lexer = Lexer::new("1337", "test.uya");

        assert_eq!(
            Ok(vec![Token::Integer {
                value: 1337,
                position: Span::default(),
            }]),
            lexer.lex()
        )
    }

    #[test]
    fn test_lex_function_head() {
        let lexer = Lexer::new("fn () {}", "test.uya");

        assert_eq!(
            Ok(vec![
                Token::FnKeyword {
                    position: Span::default(),
                },
                Token::LParen {
                    position: Span::default(),
                },
                Token::RParen {
                    position: Span::default(),
                },
                Token::LBrace {
                    position: Span::default(),
                },
                Token::RBrace {
                    position: Span::default(),
                }
            ]),
            lexer.lex()
        );
    }

    #[test]
    fn test_lex_var_decl() {
        let lexer = Lexer::new("var foo = 42;", "test.uya");

        assert_eq!(
            Ok(vec![
                Token::Var {
                    position: Span::default(),
                },
                Token::Id {
                    value: "foo".into(),
                    position: Span::default(),
                },
                Token::Assign {
                    position: Span::default(),
                },
                Token::Integer {
                    value: 42,
                    position: Span::default(),
                },
                Token::Semicolon {
                    position: Span::default(),
                }
            ]),
            lexer.lex()
        );
    }

    #[test]
    fn test_longest_match_operators() {
        let tokens = Lexer::new("a == b != c <= d && e +| f", "t").lex().unwrap();
        let shapes = tokens
            .iter()
            .map(|t| format!("{t:?}"))
            .collect::<Vec<_>>()
            .join(" ");
        assert!(shapes.contains("Equal"));
        assert!(shapes.contains("NotEqual"));
        assert!(shapes.contains("LessOrEqual"));
        assert!(shapes.contains("LogicalAnd"));
        assert!(shapes.contains("PlusPipe"));
    }

    #[test]
    fn test_keywords_beat_identifiers() {
        let tokens = Lexer::new("defer errdefer trying", "t").lex().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::DeferKeyword {
                    position: Span::default()
                },
                Token::ErrDeferKeyword {
                    position: Span::default()
                },
                Token::Id {
                    value: "trying".into(),
                    position: Span::default()
                },
            ]
        );
    }

    #[test]
    fn test_at_identifier_and_comment() {
        let tokens = Lexer::new("@syscall(60) // exit", "t").lex().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Id {
                    value: "@syscall".into(),
                    position: Span::default()
                },
                Token::LParen {
                    position: Span::default()
                },
                Token::Integer {
                    value: 60,
                    position: Span::default()
                },
                Token::RParen {
                    position: Span::default()
                },
            ]
        );
    }

    #[test]
    fn test_string_with_interpolation_survives_raw() {
        let tokens = Lexer::new(r#""x = ${x:d}!""#, "t").lex().unwrap();
        assert_eq!(
            tokens,
            vec![Token::StringLiteral {
                value: "x = ${x:d}!".into(),
                position: Span::default()
            }]
        );
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = Lexer::new("fn\nmain", "t").lex().unwrap();
        assert_eq!(tokens[0].position().line(), 1);
        assert_eq!(tokens[1].position().line(), 2);
        assert_eq!(tokens[1].position().column(), 1);
    }
}
