use crate::lexer::Token;

use super::{
    ast::*, expect_identifier, expect_token, expression::parse_condition, parse_expression,
    parse_type, ParseError, ParseResult, ParseState,
};

pub(crate) fn parse_statement(tokens: &mut ParseState<Token>) -> ParseResult<Statement> {
    match tokens.peek() {
        Some(Token::Var { .. }) | Some(Token::Const { .. }) => {
            parse_var_decl(tokens).map(Statement::VarDecl)
        }
        Some(Token::ReturnKeyword { .. }) => parse_return(tokens),
        Some(Token::IfKeyword { .. }) => parse_if(tokens).map(Statement::If),
        Some(Token::WhileKeyword { .. }) => parse_while(tokens),
        Some(Token::ForKeyword { .. }) => parse_for(tokens),
        Some(Token::DeferKeyword { position }) => {
            tokens.next();
            let body = parse_block(tokens)?;
            Ok(Statement::Defer(DeferStatement { body, position }))
        }
        Some(Token::ErrDeferKeyword { position }) => {
            tokens.next();
            let body = parse_block(tokens)?;
            Ok(Statement::ErrDefer(ErrDeferStatement { body, position }))
        }
        Some(Token::BreakKeyword { position }) => {
            tokens.next();
            Ok(Statement::Break(position))
        }
        Some(Token::ContinueKeyword { position }) => {
            tokens.next();
            Ok(Statement::Continue(position))
        }
        Some(Token::LBrace { .. }) => parse_block(tokens).map(Statement::Block),
        Some(_) => parse_expression(tokens).map(Statement::Expression),
        None => Err(ParseError::eof("statement")),
    }
}

/// `var name[: T] [= init]` / `const name[: T] = init`
pub(crate) fn parse_var_decl(
    tokens: &mut ParseState<Token>,
) -> ParseResult<VariableDeclaration> {
    let (is_mutable, is_const) = match tokens.peek() {
        Some(Token::Var { .. }) => (true, false),
        Some(Token::Const { .. }) => (false, true),
        other => {
            return Err(ParseError::missing(
                "'var' or 'const'",
                other.map(|t| t.position()),
            ))
        }
    };
    tokens.next();

    let (name, position) = expect_identifier(tokens, "variable name")?;

    let mut type_name = None;
    if matches!(tokens.peek(), Some(Token::Colon { .. })) {
        tokens.next();
        type_name = Some(parse_type(tokens)?);
    }

    let mut init = None;
    if matches!(tokens.peek(), Some(Token::Assign { .. })) {
        tokens.next();
        init = Some(parse_expression(tokens)?);
    }

    Ok(VariableDeclaration {
        name,
        type_name,
        init,
        is_mutable,
        is_const,
        position,
    })
}

fn parse_return(tokens: &mut ParseState<Token>) -> ParseResult<Statement> {
    let position = expect_token(
        tokens,
        |t| matches!(t, Token::ReturnKeyword { .. }),
        "'return'",
    )?
    .position();

    let expr = match tokens.peek() {
        Some(Token::Semicolon { .. }) | Some(Token::RBrace { .. }) | None => None,
        _ => Some(parse_expression(tokens)?),
    };

    Ok(Statement::Return(ReturnStatement { expr, position }))
}

fn parse_if(tokens: &mut ParseState<Token>) -> ParseResult<IfStatement> {
    let position =
        expect_token(tokens, |t| matches!(t, Token::IfKeyword { .. }), "'if'")?.position();

    let condition = parse_condition(tokens)?;
    let then_branch = parse_branch(tokens)?;

    let mut else_branch = None;
    if matches!(tokens.peek(), Some(Token::ElseKeyword { .. })) {
        tokens.next();
        if matches!(tokens.peek(), Some(Token::IfKeyword { .. })) {
            else_branch = Some(Box::new(Statement::If(parse_if(tokens)?)));
        } else {
            else_branch = Some(Box::new(Statement::Block(parse_branch(tokens)?)));
        }
    }

    Ok(IfStatement {
        condition,
        then_branch,
        else_branch,
        position,
    })
}

/// Branch of an `if`: a block, or a single braceless statement which is
/// wrapped into one.
fn parse_branch(tokens: &mut ParseState<Token>) -> ParseResult<Block> {
    if matches!(tokens.peek(), Some(Token::LBrace { .. })) {
        return parse_block(tokens);
    }

    let stmt = parse_statement(tokens)?;
    let position = stmt.position();
    if matches!(tokens.peek(), Some(Token::Semicolon { .. })) {
        tokens.next();
    }
    Ok(Block {
        statements: vec![stmt],
        position,
    })
}

fn parse_while(tokens: &mut ParseState<Token>) -> ParseResult<Statement> {
    let position = expect_token(
        tokens,
        |t| matches!(t, Token::WhileKeyword { .. }),
        "'while'",
    )?
    .position();

    let condition = parse_condition(tokens)?;
    let body = parse_block(tokens)?;

    Ok(Statement::While(WhileLoop {
        condition,
        body,
        position,
    }))
}

/// `for iterable |item|`, `for iterable |item, index|`, `for a..b |i|`
fn parse_for(tokens: &mut ParseState<Token>) -> ParseResult<Statement> {
    let position =
        expect_token(tokens, |t| matches!(t, Token::ForKeyword { .. }), "'for'")?.position();

    let start = parse_condition(tokens)?;
    let iterable = if matches!(tokens.peek(), Some(Token::DotDot { .. })) {
        tokens.next();
        let end = parse_condition(tokens)?;
        ForIterable::Range(start, end)
    } else {
        ForIterable::Value(start)
    };

    expect_token(tokens, |t| matches!(t, Token::Pipe { .. }), "'|'")?;
    let (item_var, _) = expect_identifier(tokens, "loop variable")?;

    let mut index_var = None;
    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
        tokens.next();
        let (name, _) = expect_identifier(tokens, "index variable")?;
        index_var = Some(name);
    }
    expect_token(tokens, |t| matches!(t, Token::Pipe { .. }), "'|'")?;

    let body = parse_block(tokens)?;

    Ok(Statement::For(ForLoop {
        iterable,
        item_var,
        index_var,
        body,
        position,
    }))
}

/// `{ stmt* }` with recovery: a bad statement skips to the next `;` or `}`
/// and parsing continues, so one block reports every broken statement.
pub(crate) fn parse_block(tokens: &mut ParseState<Token>) -> ParseResult<Block> {
    let position =
        expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?.position();

    let mut statements = vec![];
    while !matches!(tokens.peek(), Some(Token::RBrace { .. }) | None) {
        match parse_statement(tokens) {
            Ok(stmt) => statements.push(stmt),
            Err(error) => {
                tokens.add_error(error);
                while !matches!(
                    tokens.peek(),
                    Some(Token::Semicolon { .. }) | Some(Token::RBrace { .. }) | None
                ) {
                    tokens.next();
                }
            }
        }

        if matches!(tokens.peek(), Some(Token::Semicolon { .. })) {
            tokens.next();
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;

    Ok(Block {
        statements,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Statement {
        let tokens = Lexer::new(source, "test.uya").lex().unwrap();
        let mut state = ParseState::new(tokens);
        parse_statement(&mut state).unwrap()
    }

    #[test]
    fn test_var_decl_with_type_and_init() {
        let Statement::VarDecl(decl) = parse("var x: [i32: 3] = [1, 2, 3]") else {
            panic!("expected var decl");
        };
        assert_eq!(decl.name, "x");
        assert!(decl.is_mutable);
        assert!(decl.type_name.is_some());
        assert!(decl.init.is_some());
    }

    #[test]
    fn test_if_with_struct_free_condition() {
        let Statement::If(stmt) = parse("if x { return 1; } else { return 2; }") else {
            panic!("expected if");
        };
        assert!(matches!(stmt.condition, Expression::Id(_)));
        assert!(stmt.else_branch.is_some());
    }

    #[test]
    fn test_else_if_chain() {
        let Statement::If(stmt) = parse("if a { } else if b { } else { }") else {
            panic!("expected if");
        };
        let Some(else_branch) = stmt.else_branch else {
            panic!("expected else branch");
        };
        assert!(matches!(*else_branch, Statement::If(_)));
    }

    #[test]
    fn test_for_over_array_with_index() {
        let Statement::For(stmt) = parse("for xs |x, i| { }") else {
            panic!("expected for");
        };
        assert!(matches!(stmt.iterable, ForIterable::Value(_)));
        assert_eq!(stmt.item_var, "x");
        assert_eq!(stmt.index_var.as_deref(), Some("i"));
    }

    #[test]
    fn test_for_over_range() {
        let Statement::For(stmt) = parse("for 0..10 |i| { }") else {
            panic!("expected for");
        };
        assert!(matches!(stmt.iterable, ForIterable::Range(_, _)));
        assert_eq!(stmt.item_var, "i");
    }

    #[test]
    fn test_defer_and_errdefer() {
        assert!(matches!(parse("defer { close(f); }"), Statement::Defer(_)));
        assert!(matches!(
            parse("errdefer { free(p); }"),
            Statement::ErrDefer(_)
        ));
    }

    #[test]
    fn test_block_recovers_from_bad_statement() {
        let tokens = Lexer::new("{ var = ; return 1; }", "test.uya").lex().unwrap();
        let mut state = ParseState::new(tokens);
        let block = parse_block(&mut state).unwrap();
        assert!(!state.errors.is_empty());
        assert_eq!(block.statements.len(), 1);
    }
}
