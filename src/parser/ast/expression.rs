use serde::{Deserialize, Serialize};

use crate::lexer::Span;

use super::{Block, TypeName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Num(Num),
    Bool(Bool),
    AstString(AstString),
    StringInterpolation(StringInterpolation),
    Id(Id),
    Unary(Box<UnaryExpression>),
    Binary(Box<BinaryExpression>),
    Assignment(Box<Assignment>),
    Call(Box<CallExpression>),
    MemberAccess(Box<MemberAccess>),
    ArrayAccess(Box<ArrayAccess>),
    StructInit(StructInitialisation),
    ArrayLiteral(ArrayLiteral),
    TupleLiteral(TupleLiteral),
    Match(Box<MatchExpression>),
    Catch(Box<CatchExpression>),
    Cast(Box<CastExpression>),
    Sizeof(Box<SizeofExpression>),
    Alignof(Box<AlignofExpression>),
    Len(Box<LenExpression>),
    Block(Block),
}

impl Expression {
    pub fn position(&self) -> Span {
        match self {
            Expression::Num(Num::Integer(_, position)) => position.clone(),
            Expression::Num(Num::FloatingPoint(_, position)) => position.clone(),
            Expression::Bool(Bool { position, .. }) => position.clone(),
            Expression::AstString(AstString { position, .. }) => position.clone(),
            Expression::StringInterpolation(StringInterpolation { position, .. }) => {
                position.clone()
            }
            Expression::Id(Id { position, .. }) => position.clone(),
            Expression::Unary(inner) => inner.position.clone(),
            Expression::Binary(inner) => inner.position.clone(),
            Expression::Assignment(inner) => inner.position.clone(),
            Expression::Call(inner) => inner.position.clone(),
            Expression::MemberAccess(inner) => inner.position.clone(),
            Expression::ArrayAccess(inner) => inner.position.clone(),
            Expression::StructInit(StructInitialisation { position, .. }) => position.clone(),
            Expression::ArrayLiteral(ArrayLiteral { position, .. }) => position.clone(),
            Expression::TupleLiteral(TupleLiteral { position, .. }) => position.clone(),
            Expression::Match(inner) => inner.position.clone(),
            Expression::Catch(inner) => inner.position.clone(),
            Expression::Cast(inner) => inner.position.clone(),
            Expression::Sizeof(inner) => inner.position.clone(),
            Expression::Alignof(inner) => inner.position.clone(),
            Expression::Len(inner) => inner.position.clone(),
            Expression::Block(block) => block.position.clone(),
        }
    }

    /// `error.Name` — the language-surface spelling of an error value.
    pub fn as_error_value(&self) -> Option<&str> {
        if let Expression::MemberAccess(access) = self {
            if let Expression::Id(Id { name, .. }) = &access.object {
                if name == "error" {
                    return Some(&access.field);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Num {
    Integer(i64, Span),
    FloatingPoint(f64, Span),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bool {
    pub value: bool,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstString {
    pub value: String,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Id {
    pub name: String,
    pub position: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Minus,
    Not,
    AddressOf,
    Deref,
    Try,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    pub operator: UnaryOperator,
    pub operand: Expression,
    pub position: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Substract,
    Multiply,
    Divide,
    Remainder,
    AddSaturating,
    SubstractSaturating,
    MultiplySaturating,
    AddWrapping,
    SubstractWrapping,
    MultiplyWrapping,
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    And,
    Or,
}

impl BinaryOperator {
    /// Binding strength, higher binds tighter. The levels follow the
    /// expression grammar: `||` < `&&` < equality < relational < additive <
    /// multiplicative.
    pub fn precedence(&self) -> usize {
        use BinaryOperator::*;
        match self {
            Or => 0,
            And => 1,
            Equals | NotEquals => 2,
            LessThan | LessOrEqual | GreaterThan | GreaterOrEqual => 3,
            Add | Substract | AddSaturating | SubstractSaturating | AddWrapping
            | SubstractWrapping => 4,
            Multiply | Divide | Remainder | MultiplySaturating | MultiplyWrapping => 5,
        }
    }

    pub fn is_comparison(&self) -> bool {
        use BinaryOperator::*;
        matches!(
            self,
            Equals | NotEquals | LessThan | LessOrEqual | GreaterThan | GreaterOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpression {
    pub left: Expression,
    pub right: Expression,
    pub operator: BinaryOperator,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub lvalue: Expression,
    pub rvalue: Expression,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpression {
    pub callee: Expression,
    pub type_args: Vec<TypeName>,
    pub args: Vec<Expression>,
    pub position: Span,
}

impl CallExpression {
    /// Name of the called function when the callee is a plain identifier.
    pub fn callee_name(&self) -> Option<&str> {
        match &self.callee {
            Expression::Id(Id { name, .. }) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccess {
    pub object: Expression,
    pub field: String,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayAccess {
    pub array: Expression,
    pub index: Expression,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructInitialisation {
    pub name: String,
    pub type_args: Vec<TypeName>,
    pub fields: Vec<StructFieldInitialisation>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructFieldInitialisation {
    pub name: String,
    pub value: Expression,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLiteral {
    pub elements: Vec<Expression>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleLiteral {
    pub elements: Vec<Expression>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExpression {
    pub scrutinee: Expression,
    pub arms: Vec<MatchArm>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expression,
    pub position: Span,
}

/// Patterns are primary expressions only; a bare identifier is a catch-all
/// binding, `else` the anonymous catch-all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Literal(Expression),
    Binding(String, Span),
    CatchAll(Span),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchExpression {
    pub expr: Expression,
    pub error_var: Option<String>,
    pub body: Expression,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastExpression {
    pub expr: Expression,
    pub target: TypeName,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizeofArg {
    Type(TypeName),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeofExpression {
    pub arg: SizeofArg,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignofExpression {
    pub target: TypeName,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenExpression {
    pub target: Expression,
    pub position: Span,
}

/// One `${expr[:spec]}` or literal text run inside an interpolated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterpSegment {
    Text(String),
    Expr {
        expr: Expression,
        format: Option<FormatSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatSpec {
    pub flags: String,
    pub width: Option<u32>,
    pub precision: Option<u32>,
    pub type_char: Option<char>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringInterpolation {
    pub segments: Vec<InterpSegment>,
    pub position: Span,
}

#[cfg(test)]
mod tests {
    use super::BinaryOperator::*;

    #[test]
    fn test_precedence_ordering() {
        assert!(Or.precedence() < And.precedence());
        assert!(And.precedence() < Equals.precedence());
        assert!(Equals.precedence() < LessThan.precedence());
        assert!(LessThan.precedence() < Add.precedence());
        assert!(Add.precedence() < Multiply.precedence());
        assert_eq!(Add.precedence(), AddSaturating.precedence());
        assert_eq!(Multiply.precedence(), MultiplyWrapping.precedence());
    }
}
