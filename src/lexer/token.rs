use serde::{Deserialize, Serialize};

/// Source region of a token or AST node. Lines and columns are 1-based; the
/// filename is carried on every span so diagnostics can be rendered without
/// access to the originating buffer.
#[derive(Default, Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: (usize, usize),
    pub end: (usize, usize),
    pub filename: String,
}

impl Span {
    pub fn new(start: (usize, usize), end: (usize, usize), filename: impl ToString) -> Self {
        Span {
            start,
            end,
            filename: filename.to_string(),
        }
    }

    /// Span covering both `self` and `other`.
    pub fn merge(&self, other: &Span) -> Span {
        let Span {
            start, filename, ..
        } = self.clone();
        let Span { end, .. } = other.clone();

        Span {
            start,
            end,
            filename,
        }
    }

    pub fn line(&self) -> usize {
        self.start.0
    }

    pub fn column(&self) -> usize {
        self.start.1
    }
}

impl PartialEq<Span> for Span {
    fn eq(&self, _other: &Span) -> bool {
        // TODO: compare positions once parser tests construct real spans
        true
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.start.0, self.start.1)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    // keywords
    FnKeyword { position: Span },
    StructKeyword { position: Span },
    EnumKeyword { position: Span },
    ErrorKeyword { position: Span },
    ExternKeyword { position: Span },
    Var { position: Span },
    Const { position: Span },
    IfKeyword { position: Span },
    ElseKeyword { position: Span },
    WhileKeyword { position: Span },
    ForKeyword { position: Span },
    ReturnKeyword { position: Span },
    DeferKeyword { position: Span },
    ErrDeferKeyword { position: Span },
    MatchKeyword { position: Span },
    TryKeyword { position: Span },
    CatchKeyword { position: Span },
    AtomicKeyword { position: Span },
    BreakKeyword { position: Span },
    ContinueKeyword { position: Span },
    AsKeyword { position: Span },
    True { position: Span },
    False { position: Span },

    // literals
    Id { value: String, position: Span },
    Integer { value: i64, position: Span },
    FloatingPoint { value: f64, position: Span },
    StringLiteral { value: String, position: Span },

    // punctuation
    LParen { position: Span },
    RParen { position: Span },
    LBrace { position: Span },
    RBrace { position: Span },
    LBracket { position: Span },
    RBracket { position: Span },
    Comma { position: Span },
    Semicolon { position: Span },
    Colon { position: Span },
    Dot { position: Span },
    DotDot { position: Span },
    Ellipsis { position: Span },
    BigRightArrow { position: Span },
    SmallRightArrow { position: Span },
    Pipe { position: Span },

    // operators
    Assign { position: Span },
    Plus { position: Span },
    Minus { position: Span },
    Asterisk { position: Span },
    Slash { position: Span },
    Percent { position: Span },
    Equal { position: Span },
    NotEqual { position: Span },
    LessThan { position: Span },
    LessOrEqual { position: Span },
    GreaterThan { position: Span },
    GreaterOrEqual { position: Span },
    LogicalAnd { position: Span },
    LogicalOr { position: Span },
    ExclamationMark { position: Span },
    Ampersand { position: Span },
    Caret { position: Span },
    Tilde { position: Span },
    ShiftLeft { position: Span },
    ShiftRight { position: Span },
    PlusPipe { position: Span },
    MinusPipe { position: Span },
    AsteriskPipe { position: Span },
    PlusPercent { position: Span },
    MinusPercent { position: Span },
    AsteriskPercent { position: Span },
}

impl Token {
    pub fn position(&self) -> Span {
        use Token::*;
        match self {
            FnKeyword { position }
            | StructKeyword { position }
            | EnumKeyword { position }
            | ErrorKeyword { position }
            | ExternKeyword { position }
            | Var { position }
            | Const { position }
            | IfKeyword { position }
            | ElseKeyword { position }
            | WhileKeyword { position }
            | ForKeyword { position }
            | ReturnKeyword { position }
            | DeferKeyword { position }
            | ErrDeferKeyword { position }
            | MatchKeyword { position }
            | TryKeyword { position }
            | CatchKeyword { position }
            | AtomicKeyword { position }
            | BreakKeyword { position }
            | ContinueKeyword { position }
            | AsKeyword { position }
            | True { position }
            | False { position }
            | Id { position, .. }
            | Integer { position, .. }
            | FloatingPoint { position, .. }
            | StringLiteral { position, .. }
            | LParen { position }
            | RParen { position }
            | LBrace { position }
            | RBrace { position }
            | LBracket { position }
            | RBracket { position }
            | Comma { position }
            | Semicolon { position }
            | Colon { position }
            | Dot { position }
            | DotDot { position }
            | Ellipsis { position }
            | BigRightArrow { position }
            | SmallRightArrow { position }
            | Pipe { position }
            | Assign { position }
            | Plus { position }
            | Minus { position }
            | Asterisk { position }
            | Slash { position }
            | Percent { position }
            | Equal { position }
            | NotEqual { position }
            | LessThan { position }
            | LessOrEqual { position }
            | GreaterThan { position }
            | GreaterOrEqual { position }
            | LogicalAnd { position }
            | LogicalOr { position }
            | ExclamationMark { position }
            | Ampersand { position }
            | Caret { position }
            | Tilde { position }
            | ShiftLeft { position }
            | ShiftRight { position }
            | PlusPipe { position }
            | MinusPipe { position }
            | AsteriskPipe { position }
            | AsteriskPercent { position }
            | PlusPercent { position }
            | MinusPercent { position } => position.clone(),
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FnKeyword { .. } => f.debug_struct("FnKeyword").finish(),
            Self::StructKeyword { .. } => f.debug_struct("StructKeyword").finish(),
            Self::EnumKeyword { .. } => f.debug_struct("EnumKeyword").finish(),
            Self::ErrorKeyword { .. } => f.debug_struct("ErrorKeyword").finish(),
            Self::ExternKeyword { .. } => f.debug_struct("ExternKeyword").finish(),
            Self::Var { .. } => f.debug_struct("Var").finish(),
            Self::Const { .. } => f.debug_struct("Const").finish(),
            Self::IfKeyword { .. } => f.debug_struct("IfKeyword").finish(),
            Self::ElseKeyword { .. } => f.debug_struct("ElseKeyword").finish(),
            Self::WhileKeyword { .. } => f.debug_struct("WhileKeyword").finish(),
            Self::ForKeyword { .. } => f.debug_struct("ForKeyword").finish(),
            Self::ReturnKeyword { .. } => f.debug_struct("ReturnKeyword").finish(),
            Self::DeferKeyword { .. } => f.debug_struct("DeferKeyword").finish(),
            Self::ErrDeferKeyword { .. } => f.debug_struct("ErrDeferKeyword").finish(),
            Self::MatchKeyword { .. } => f.debug_struct("MatchKeyword").finish(),
            Self::TryKeyword { .. } => f.debug_struct("TryKeyword").finish(),
            Self::CatchKeyword { .. } => f.debug_struct("CatchKeyword").finish(),
            Self::AtomicKeyword { .. } => f.debug_struct("AtomicKeyword").finish(),
            Self::BreakKeyword { .. } => f.debug_struct("BreakKeyword").finish(),
            Self::ContinueKeyword { .. } => f.debug_struct("ContinueKeyword").finish(),
            Self::AsKeyword { .. } => f.debug_struct("AsKeyword").finish(),
            Self::True { .. } => f.debug_struct("True").finish(),
            Self::False { .. } => f.debug_struct("False").finish(),
            Self::Id { value, .. } => f.debug_struct("Id").field("value", value).finish(),
            Self::Integer { value, .. } => f.debug_struct("Integer").field("value", value).finish(),
            Self::FloatingPoint { value, .. } => f
                .debug_struct("FloatingPoint")
                .field("value", value)
                .finish(),
            Self::StringLiteral { value, .. } => f
                .debug_struct("StringLiteral")
                .field("value", value)
                .finish(),
            Self::LParen { .. } => f.debug_struct("LParen").finish(),
            Self::RParen { .. } => f.debug_struct("RParen").finish(),
            Self::LBrace { .. } => f.debug_struct("LBrace").finish(),
            Self::RBrace { .. } => f.debug_struct("RBrace").finish(),
            Self::LBracket { .. } => f.debug_struct("LBracket").finish(),
            Self::RBracket { .. } => f.debug_struct("RBracket").finish(),
            Self::Comma { .. } => f.debug_struct("Comma").finish(),
            Self::Semicolon { .. } => f.debug_struct("Semicolon").finish(),
            Self::Colon { .. } => f.debug_struct("Colon").finish(),
            Self::Dot { .. } => f.debug_struct("Dot").finish(),
            Self::DotDot { .. } => f.debug_struct("DotDot").finish(),
            Self::Ellipsis { .. } => f.debug_struct("Ellipsis").finish(),
            Self::BigRightArrow { .. } => f.debug_struct("BigRightArrow").finish(),
            Self::SmallRightArrow { .. } => f.debug_struct("SmallRightArrow").finish(),
            Self::Pipe { .. } => f.debug_struct("Pipe").finish(),
            Self::Assign { .. } => f.debug_struct("Assign").finish(),
            Self::Plus { .. } => f.debug_struct("Plus").finish(),
            Self::Minus { .. } => f.debug_struct("Minus").finish(),
            Self::Asterisk { .. } => f.debug_struct("Asterisk").finish(),
            Self::Slash { .. } => f.debug_struct("Slash").finish(),
            Self::Percent { .. } => f.debug_struct("Percent").finish(),
            Self::Equal { .. } => f.debug_struct("Equal").finish(),
            Self::NotEqual { .. } => f.debug_struct("NotEqual").finish(),
            Self::LessThan { .. } => f.debug_struct("LessThan").finish(),
            Self::LessOrEqual { .. } => f.debug_struct("LessOrEqual").finish(),
            Self::GreaterThan { .. } => f.debug_struct("GreaterThan").finish(),
            Self::GreaterOrEqual { .. } => f.debug_struct("GreaterOrEqual").finish(),
            Self::LogicalAnd { .. } => f.debug_struct("LogicalAnd").finish(),
            Self::LogicalOr { .. } => f.debug_struct("LogicalOr").finish(),
            Self::ExclamationMark { .. } => f.debug_struct("ExclamationMark").finish(),
            Self::Ampersand { .. } => f.debug_struct("Ampersand").finish(),
            Self::Caret { .. } => f.debug_struct("Caret").finish(),
            Self::Tilde { .. } => f.debug_struct("Tilde").finish(),
            Self::ShiftLeft { .. } => f.debug_struct("ShiftLeft").finish(),
            Self::ShiftRight { .. } => f.debug_struct("ShiftRight").finish(),
            Self::PlusPipe { .. } => f.debug_struct("PlusPipe").finish(),
            Self::MinusPipe { .. } => f.debug_struct("MinusPipe").finish(),
            Self::AsteriskPipe { .. } => f.debug_struct("AsteriskPipe").finish(),
            Self::PlusPercent { .. } => f.debug_struct("PlusPercent").finish(),
            Self::MinusPercent { .. } => f.debug_struct("MinusPercent").finish(),
            Self::AsteriskPercent { .. } => f.debug_struct("AsteriskPercent").finish(),
        }
    }
}
