use once_cell::sync::Lazy;
use regex::Regex;

use super::{Span, Token};

/// Constructor for a fixed terminal symbol.
type TerminalCtor = fn(Span) -> Token;

static FLOAT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+\.[0-9]+").unwrap());
static INTEGER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x[0-9a-fA-F]+|[0-9]+)").unwrap());
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@?[a-zA-Z_][a-zA-Z0-9_]*").unwrap());
static STRING_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(\\.|[^"\\])*""#).unwrap());
static COMMENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^//[^\n]*").unwrap());

/// Table of all fixed terminal symbols, longest first so that `==` wins over
/// `=`, `...` over `..` over `.`, and so on.
const TERMINALS: &[(&str, TerminalCtor)] = &[
    ("...", |position| Token::Ellipsis { position }),
    ("<<", |position| Token::ShiftLeft { position }),
    (">>", |position| Token::ShiftRight { position }),
    ("..", |position| Token::DotDot { position }),
    ("=>", |position| Token::BigRightArrow { position }),
    ("->", |position| Token::SmallRightArrow { position }),
    ("==", |position| Token::Equal { position }),
    ("!=", |position| Token::NotEqual { position }),
    ("<=", |position| Token::LessOrEqual { position }),
    (">=", |position| Token::GreaterOrEqual { position }),
    ("&&", |position| Token::LogicalAnd { position }),
    ("||", |position| Token::LogicalOr { position }),
    ("+|", |position| Token::PlusPipe { position }),
    ("-|", |position| Token::MinusPipe { position }),
    ("*|", |position| Token::AsteriskPipe { position }),
    ("+%", |position| Token::PlusPercent { position }),
    ("-%", |position| Token::MinusPercent { position }),
    ("*%", |position| Token::AsteriskPercent { position }),
    ("(", |position| Token::LParen { position }),
    (")", |position| Token::RParen { position }),
    ("{", |position| Token::LBrace { position }),
    ("}", |position| Token::RBrace { position }),
    ("[", |position| Token::LBracket { position }),
    ("]", |position| Token::RBracket { position }),
    (",", |position| Token::Comma { position }),
    (";", |position| Token::Semicolon { position }),
    (":", |position| Token::Colon { position }),
    (".", |position| Token::Dot { position }),
    ("|", |position| Token::Pipe { position }),
    ("=", |position| Token::Assign { position }),
    ("+", |position| Token::Plus { position }),
    ("-", |position| Token::Minus { position }),
    ("*", |position| Token::Asterisk { position }),
    ("/", |position| Token::Slash { position }),
    ("%", |position| Token::Percent { position }),
    ("<", |position| Token::LessThan { position }),
    (">", |position| Token::GreaterThan { position }),
    ("!", |position| Token::ExclamationMark { position }),
    ("&", |position| Token::Ampersand { position }),
    ("^", |position| Token::Caret { position }),
    ("~", |position| Token::Tilde { position }),
];

fn keyword(word: &str, position: Span) -> Option<Token> {
    let token = match word {
        "fn" => Token::FnKeyword { position },
        "struct" => Token::StructKeyword { position },
        "enum" => Token::EnumKeyword { position },
        "error" => Token::ErrorKeyword { position },
        "extern" => Token::ExternKeyword { position },
        "var" => Token::Var { position },
        "const" => Token::Const { position },
        "if" => Token::IfKeyword { position },
        "else" => Token::ElseKeyword { position },
        "while" => Token::WhileKeyword { position },
        "for" => Token::ForKeyword { position },
        "return" => Token::ReturnKeyword { position },
        "defer" => Token::DeferKeyword { position },
        "errdefer" => Token::ErrDeferKeyword { position },
        "match" => Token::MatchKeyword { position },
        "try" => Token::TryKeyword { position },
        "catch" => Token::CatchKeyword { position },
        "atomic" => Token::AtomicKeyword { position },
        "break" => Token::BreakKeyword { position },
        "continue" => Token::ContinueKeyword { position },
        "as" => Token::AsKeyword { position },
        "true" => Token::True { position },
        "false" => Token::False { position },
        _ => return None,
    };
    Some(token)
}

/// Pattern matching engine for the lexer. Finds the longest token match at
/// the start of the remaining input; keywords take precedence over plain
/// identifiers, comments match but produce no token.
#[derive(Debug, Clone, Default)]
pub struct Lexikon;

impl Lexikon {
    pub fn new() -> Self {
        Self
    }

    /// Returns `(consumed_len, token)`. A comment yields `(len, None)`; a
    /// failed match yields `(0, None)`.
    pub fn find_longest_match(
        &self,
        input: &str,
        start: (usize, usize),
        filename: &str,
    ) -> (usize, Option<Token>) {
        if let Some(m) = COMMENT_PATTERN.find(input) {
            return (m.end(), None);
        }

        let mut best_len = 0;
        let mut best: Option<Token> = None;

        // literal patterns first; a terminal of equal length never beats a
        // literal because no terminal is a valid identifier/number prefix
        if let Some(m) = STRING_PATTERN.find(input) {
            let raw = m.as_str();
            let inner = &raw[1..raw.len() - 1];
            best_len = m.end();
            best = Some(Token::StringLiteral {
                value: inner.to_string(),
                position: self.span_for(start, m.end(), filename),
            });
        }

        if let Some(m) = FLOAT_PATTERN.find(input) {
            if m.end() > best_len {
                best_len = m.end();
                best = Some(Token::FloatingPoint {
                    value: m.as_str().parse().unwrap_or(0.0),
                    position: self.span_for(start, m.end(), filename),
                });
            }
        }

        if let Some(m) = INTEGER_PATTERN.find(input) {
            if m.end() > best_len {
                let text = m.as_str();
                let value = if let Some(hex) = text.strip_prefix("0x") {
                    i64::from_str_radix(hex, 16).unwrap_or(0)
                } else {
                    text.parse().unwrap_or(0)
                };
                best_len = m.end();
                best = Some(Token::Integer {
                    value,
                    position: self.span_for(start, m.end(), filename),
                });
            }
        }

        if let Some(m) = ID_PATTERN.find(input) {
            if m.end() > best_len {
                let word = m.as_str();
                let position = self.span_for(start, m.end(), filename);
                best_len = m.end();
                best = Some(match keyword(word, position.clone()) {
                    Some(token) => token,
                    None => Token::Id {
                        value: word.to_string(),
                        position,
                    },
                });
            }
        }

        for (terminal, ctor) in TERMINALS {
            if terminal.len() > best_len && input.starts_with(terminal) {
                best_len = terminal.len();
                best = Some(ctor(self.span_for(start, terminal.len(), filename)));
            }
        }

        (best_len, best)
    }

    fn span_for(&self, start: (usize, usize), len: usize, filename: &str) -> Span {
        Span::new(start, (start.0, start.1 + len), filename)
    }
}
