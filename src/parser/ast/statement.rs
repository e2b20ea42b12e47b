use serde::{Deserialize, Serialize};

use crate::lexer::Span;

use super::{Expression, TypeName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    VarDecl(VariableDeclaration),
    Return(ReturnStatement),
    If(IfStatement),
    While(WhileLoop),
    For(ForLoop),
    Defer(DeferStatement),
    ErrDefer(ErrDeferStatement),
    Break(Span),
    Continue(Span),
    Block(Block),
    Expression(Expression),
}

impl Statement {
    pub fn position(&self) -> Span {
        match self {
            Statement::VarDecl(decl) => decl.position.clone(),
            Statement::Return(ret) => ret.position.clone(),
            Statement::If(stmt) => stmt.position.clone(),
            Statement::While(stmt) => stmt.position.clone(),
            Statement::For(stmt) => stmt.position.clone(),
            Statement::Defer(stmt) => stmt.position.clone(),
            Statement::ErrDefer(stmt) => stmt.position.clone(),
            Statement::Break(position) | Statement::Continue(position) => position.clone(),
            Statement::Block(block) => block.position.clone(),
            Statement::Expression(expr) => expr.position(),
        }
    }
}

/// `var name[: T] [= init]` / `const name[: T] = init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    pub type_name: Option<TypeName>,
    pub init: Option<Expression>,
    pub is_mutable: bool,
    pub is_const: bool,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatement {
    pub expr: Option<Expression>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub position: Span,
}

impl Block {
    /// Trailing expression of the block, used as its value when the block
    /// appears in expression position (catch and match bodies).
    pub fn trailing_expression(&self) -> Option<&Expression> {
        match self.statements.last() {
            Some(Statement::Expression(expr)) => Some(expr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    pub condition: Expression,
    pub then_branch: Block,
    /// `Block` for a plain else, `If` for an else-if chain.
    pub else_branch: Option<Box<Statement>>,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileLoop {
    pub condition: Expression,
    pub body: Block,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForIterable {
    /// `for arr |x|`
    Value(Expression),
    /// `for a..b |i|`
    Range(Expression, Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    pub iterable: ForIterable,
    pub item_var: String,
    pub index_var: Option<String>,
    pub body: Block,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferStatement {
    pub body: Block,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrDeferStatement {
    pub body: Block,
    pub position: Span,
}
