use crate::lexer::Token;

use super::{
    ast::*, expect_identifier, expect_token, interp, parse_block, parse_type,
    types::token_starts_type, ParseError, ParseResult, ParseState,
};

/// Full expression: precedence-climbed binary expression plus the assignment
/// and catch tails.
pub fn parse_expression(tokens: &mut ParseState<Token>) -> ParseResult<Expression> {
    parse_expression_inner(tokens, true)
}

/// Expression in a position where `ident {` must not become a struct literal
/// (if/while/for headers and match scrutinees).
pub(crate) fn parse_condition(tokens: &mut ParseState<Token>) -> ParseResult<Expression> {
    parse_expression_inner(tokens, false)
}

fn parse_expression_inner(
    tokens: &mut ParseState<Token>,
    allow_struct: bool,
) -> ParseResult<Expression> {
    let expr = parse_binary(tokens, 0, allow_struct)?;

    if let Some(Token::Assign { position }) = tokens.peek() {
        tokens.next();
        let rvalue = parse_expression_inner(tokens, allow_struct)?;
        return Ok(Expression::Assignment(Box::new(Assignment {
            lvalue: expr,
            rvalue,
            position,
        })));
    }

    parse_catch_tail(tokens, expr)
}

/// Entry point below the logical operators: parses everything from equality
/// upward, so the right operand of `&&`/`||` can never swallow another
/// logical operator.
pub fn parse_comparison_or_higher(
    tokens: &mut ParseState<Token>,
) -> ParseResult<Expression> {
    parse_binary(tokens, BinaryOperator::Equals.precedence(), true)
}

fn peek_binary_operator(tokens: &ParseState<Token>) -> Option<BinaryOperator> {
    let op = match tokens.peek()? {
        Token::LogicalOr { .. } => BinaryOperator::Or,
        Token::LogicalAnd { .. } => BinaryOperator::And,
        Token::Equal { .. } => BinaryOperator::Equals,
        Token::NotEqual { .. } => BinaryOperator::NotEquals,
        Token::LessThan { .. } => BinaryOperator::LessThan,
        Token::LessOrEqual { .. } => BinaryOperator::LessOrEqual,
        Token::GreaterThan { .. } => BinaryOperator::GreaterThan,
        Token::GreaterOrEqual { .. } => BinaryOperator::GreaterOrEqual,
        Token::Plus { .. } => BinaryOperator::Add,
        Token::Minus { .. } => BinaryOperator::Substract,
        Token::PlusPipe { .. } => BinaryOperator::AddSaturating,
        Token::MinusPipe { .. } => BinaryOperator::SubstractSaturating,
        Token::PlusPercent { .. } => BinaryOperator::AddWrapping,
        Token::MinusPercent { .. } => BinaryOperator::SubstractWrapping,
        Token::Asterisk { .. } => BinaryOperator::Multiply,
        Token::Slash { .. } => BinaryOperator::Divide,
        Token::Percent { .. } => BinaryOperator::Remainder,
        Token::AsteriskPipe { .. } => BinaryOperator::MultiplySaturating,
        Token::AsteriskPercent { .. } => BinaryOperator::MultiplyWrapping,
        _ => return None,
    };
    Some(op)
}

fn parse_binary(
    tokens: &mut ParseState<Token>,
    min_precedence: usize,
    allow_struct: bool,
) -> ParseResult<Expression> {
    let mut left = parse_unary(tokens, allow_struct)?;

    while let Some(operator) = peek_binary_operator(tokens) {
        if operator.precedence() < min_precedence {
            break;
        }
        let position = tokens.peek().map(|t| t.position()).unwrap_or_default();
        tokens.next();

        // left-associative: the right operand only takes strictly tighter
        // operators
        let right = parse_binary(tokens, operator.precedence() + 1, allow_struct)?;
        left = Expression::Binary(Box::new(BinaryExpression {
            left,
            right,
            operator,
            position,
        }));
    }

    Ok(left)
}

fn parse_unary(tokens: &mut ParseState<Token>, allow_struct: bool) -> ParseResult<Expression> {
    let Some(token) = tokens.peek() else {
        return Err(ParseError::eof("expression"));
    };

    let operator = match token {
        Token::TryKeyword { .. } => Some(UnaryOperator::Try),
        Token::Minus { .. } => Some(UnaryOperator::Minus),
        Token::ExclamationMark { .. } => Some(UnaryOperator::Not),
        Token::Ampersand { .. } => Some(UnaryOperator::AddressOf),
        Token::Asterisk { .. } => Some(UnaryOperator::Deref),
        _ => None,
    };

    if let Some(operator) = operator {
        let position = token.position();
        tokens.next();
        let operand = parse_unary(tokens, allow_struct)?;
        return Ok(Expression::Unary(Box::new(UnaryExpression {
            operator,
            operand,
            position,
        })));
    }

    parse_postfix(tokens, allow_struct)
}

fn parse_postfix(tokens: &mut ParseState<Token>, allow_struct: bool) -> ParseResult<Expression> {
    let mut expr = parse_primary(tokens, allow_struct)?;

    loop {
        match tokens.peek() {
            Some(Token::Dot { .. }) => {
                tokens.next();
                let (field, position) = match tokens.peek() {
                    Some(Token::Id { value, position }) => {
                        tokens.next();
                        (value, position)
                    }
                    // tuple field access: value.0
                    Some(Token::Integer { value, position }) => {
                        tokens.next();
                        (value.to_string(), position)
                    }
                    other => {
                        return Err(ParseError::missing(
                            "field name or tuple index",
                            other.map(|t| t.position()),
                        ))
                    }
                };
                expr = Expression::MemberAccess(Box::new(MemberAccess {
                    object: expr,
                    field,
                    position,
                }));
            }
            Some(Token::LBracket { position }) => {
                tokens.next();
                let start = parse_expression(tokens)?;
                if matches!(tokens.peek(), Some(Token::Colon { .. })) {
                    // arr[start:len] desugars to slice(arr, start, len)
                    tokens.next();
                    let len = parse_expression(tokens)?;
                    expect_token(tokens, |t| matches!(t, Token::RBracket { .. }), "']'")?;
                    expr = Expression::Call(Box::new(CallExpression {
                        callee: Expression::Id(Id {
                            name: "slice".into(),
                            position: position.clone(),
                        }),
                        type_args: vec![],
                        args: vec![expr, start, len],
                        position,
                    }));
                } else {
                    expect_token(tokens, |t| matches!(t, Token::RBracket { .. }), "']'")?;
                    expr = Expression::ArrayAccess(Box::new(ArrayAccess {
                        array: expr,
                        index: start,
                        position,
                    }));
                }
            }
            Some(Token::LParen { position }) => {
                tokens.next();
                let args = parse_call_args(tokens)?;
                expr = Expression::Call(Box::new(CallExpression {
                    callee: expr,
                    type_args: vec![],
                    args,
                    position,
                }));
            }
            Some(Token::LessThan { .. }) => {
                // possibly `callee<T, ...>(args)` — only commit when the
                // type-argument list closes and a call follows
                match try_parse_generic_call(tokens, &expr, allow_struct)? {
                    Some(generic) => expr = generic,
                    None => break,
                }
            }
            Some(Token::AsKeyword { position }) => {
                tokens.next();
                let target = parse_type(tokens)?;
                expr = Expression::Cast(Box::new(CastExpression {
                    expr,
                    target,
                    position,
                }));
            }
            _ => break,
        }
    }

    Ok(expr)
}

/// Speculatively parse `<T1, T2>` after a callee. Restores the token cursor
/// and yields `None` when the angle bracket turns out to be a comparison.
fn try_parse_generic_call(
    tokens: &mut ParseState<Token>,
    callee: &Expression,
    allow_struct: bool,
) -> ParseResult<Option<Expression>> {
    let snapshot = tokens.get_index();
    tokens.next(); // '<'

    let mut type_args = vec![];
    loop {
        match parse_type(tokens) {
            Ok(arg) => type_args.push(arg),
            Err(_) => {
                tokens.set_index(snapshot);
                return Ok(None);
            }
        }
        match tokens.peek() {
            Some(Token::Comma { .. }) => {
                tokens.next();
            }
            Some(Token::GreaterThan { .. }) => {
                tokens.next();
                break;
            }
            _ => {
                tokens.set_index(snapshot);
                return Ok(None);
            }
        }
    }

    match tokens.peek() {
        Some(Token::LParen { position }) => {
            tokens.next();
            let args = parse_call_args(tokens)?;
            Ok(Some(Expression::Call(Box::new(CallExpression {
                callee: callee.clone(),
                type_args,
                args,
                position,
            }))))
        }
        Some(Token::LBrace { .. }) if allow_struct => {
            if let Expression::Id(Id { name, position }) = callee {
                let mut init = parse_struct_init_body(tokens, name.clone(), position.clone())?;
                init.type_args = type_args;
                Ok(Some(Expression::StructInit(init)))
            } else {
                tokens.set_index(snapshot);
                Ok(None)
            }
        }
        _ => {
            tokens.set_index(snapshot);
            Ok(None)
        }
    }
}

fn parse_call_args(tokens: &mut ParseState<Token>) -> ParseResult<Vec<Expression>> {
    let mut args = vec![];
    if !matches!(tokens.peek(), Some(Token::RParen { .. })) {
        loop {
            args.push(parse_expression(tokens)?);
            if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                tokens.next();
            } else {
                break;
            }
        }
    }
    expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
    Ok(args)
}

fn parse_primary(tokens: &mut ParseState<Token>, allow_struct: bool) -> ParseResult<Expression> {
    let Some(token) = tokens.peek() else {
        return Err(ParseError::eof("expression"));
    };

    match token {
        Token::Integer { value, position } => {
            tokens.next();
            Ok(Expression::Num(Num::Integer(value, position)))
        }
        Token::FloatingPoint { value, position } => {
            tokens.next();
            Ok(Expression::Num(Num::FloatingPoint(value, position)))
        }
        Token::True { position } => {
            tokens.next();
            Ok(Expression::Bool(Bool {
                value: true,
                position,
            }))
        }
        Token::False { position } => {
            tokens.next();
            Ok(Expression::Bool(Bool {
                value: false,
                position,
            }))
        }
        Token::StringLiteral { value, position } => {
            tokens.next();
            if value.contains("${") {
                interp::parse_string_interpolation(&value, &position)
                    .map(Expression::StringInterpolation)
            } else {
                Ok(Expression::AstString(AstString { value, position }))
            }
        }
        // `error` is a keyword, but `error.Name` spells an error value
        Token::ErrorKeyword { position } => {
            tokens.next();
            Ok(Expression::Id(Id {
                name: "error".into(),
                position,
            }))
        }
        Token::Id { value, position } => {
            tokens.next();

            match value.as_str() {
                "sizeof" if matches!(tokens.peek(), Some(Token::LParen { .. })) => {
                    return parse_sizeof(tokens, position)
                }
                "alignof" if matches!(tokens.peek(), Some(Token::LParen { .. })) => {
                    tokens.next();
                    let target = parse_type(tokens)?;
                    expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
                    return Ok(Expression::Alignof(Box::new(AlignofExpression {
                        target,
                        position,
                    })));
                }
                "len" if matches!(tokens.peek(), Some(Token::LParen { .. })) => {
                    tokens.next();
                    let target = parse_expression(tokens)?;
                    expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
                    return Ok(Expression::Len(Box::new(LenExpression {
                        target,
                        position,
                    })));
                }
                _ => {}
            }

            if allow_struct && matches!(tokens.peek(), Some(Token::LBrace { .. })) {
                let init = parse_struct_init_body(tokens, value, position)?;
                return Ok(Expression::StructInit(init));
            }

            Ok(Expression::Id(Id {
                name: value,
                position,
            }))
        }
        Token::MatchKeyword { .. } => parse_match(tokens),
        Token::LBracket { position } => {
            tokens.next();
            let mut elements = vec![];
            if !matches!(tokens.peek(), Some(Token::RBracket { .. })) {
                loop {
                    elements.push(parse_expression(tokens)?);
                    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                        tokens.next();
                    } else {
                        break;
                    }
                }
            }
            expect_token(tokens, |t| matches!(t, Token::RBracket { .. }), "']'")?;
            Ok(Expression::ArrayLiteral(ArrayLiteral { elements, position }))
        }
        Token::LParen { position } => {
            tokens.next();
            let mut elements = vec![];
            let mut saw_comma = false;
            if !matches!(tokens.peek(), Some(Token::RParen { .. })) {
                loop {
                    elements.push(parse_expression(tokens)?);
                    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                        saw_comma = true;
                        tokens.next();
                        if matches!(tokens.peek(), Some(Token::RParen { .. })) {
                            break;
                        }
                    } else {
                        break;
                    }
                }
            }
            expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;

            // a single parenthesised expression is not a tuple
            if elements.len() == 1 && !saw_comma {
                Ok(elements.into_iter().next().unwrap())
            } else {
                Ok(Expression::TupleLiteral(TupleLiteral { elements, position }))
            }
        }
        other => Err(ParseError::unexpected(
            format!("expected an expression, got {other:?}"),
            Some(other.position()),
        )),
    }
}

/// `sizeof(T)` or `sizeof(expr)` — a type is tried first, an expression is
/// the fallback.
fn parse_sizeof(
    tokens: &mut ParseState<Token>,
    position: crate::lexer::Span,
) -> ParseResult<Expression> {
    tokens.next(); // '('

    let snapshot = tokens.get_index();
    if let Some(token) = tokens.peek() {
        if token_starts_type(&token) {
            if let Ok(ty) = parse_type(tokens) {
                if matches!(tokens.peek(), Some(Token::RParen { .. })) {
                    tokens.next();
                    return Ok(Expression::Sizeof(Box::new(SizeofExpression {
                        arg: SizeofArg::Type(ty),
                        position,
                    })));
                }
            }
            tokens.set_index(snapshot);
        }
    }

    let expr = parse_expression(tokens)?;
    expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
    Ok(Expression::Sizeof(Box::new(SizeofExpression {
        arg: SizeofArg::Expr(expr),
        position,
    })))
}

/// Field list of a struct literal; the leading `{` is still unconsumed.
fn parse_struct_init_body(
    tokens: &mut ParseState<Token>,
    name: String,
    position: crate::lexer::Span,
) -> ParseResult<StructInitialisation> {
    expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?;

    let mut fields = vec![];
    if !matches!(tokens.peek(), Some(Token::RBrace { .. })) {
        loop {
            let (field_name, field_position) = expect_identifier(tokens, "field name")?;
            expect_token(tokens, |t| matches!(t, Token::Colon { .. }), "':'")?;
            let value = parse_expression(tokens)?;
            fields.push(StructFieldInitialisation {
                name: field_name,
                value,
                position: field_position,
            });

            if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                tokens.next();
                if matches!(tokens.peek(), Some(Token::RBrace { .. })) {
                    break;
                }
            } else {
                break;
            }
        }
    }
    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;

    Ok(StructInitialisation {
        name,
        type_args: vec![],
        fields,
        position,
    })
}

/// `match scrutinee { pattern => body, ... }`. A bare identifier scrutinee is
/// taken as-is so `ident {` never becomes a struct literal here.
fn parse_match(tokens: &mut ParseState<Token>) -> ParseResult<Expression> {
    let position = expect_token(tokens, |t| matches!(t, Token::MatchKeyword { .. }), "'match'")?
        .position();

    let scrutinee = match (tokens.peek(), tokens.peek_second()) {
        (Some(Token::Id { value, position }), Some(Token::LBrace { .. })) => {
            tokens.next();
            Expression::Id(Id {
                name: value,
                position,
            })
        }
        _ => parse_condition(tokens)?,
    };

    expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?;

    let mut arms = vec![];
    while !matches!(tokens.peek(), Some(Token::RBrace { .. }) | None) {
        let pattern = parse_pattern(tokens)?;
        expect_token(tokens, |t| matches!(t, Token::BigRightArrow { .. }), "'=>'")?;

        let body = if matches!(tokens.peek(), Some(Token::LBrace { .. })) {
            Expression::Block(parse_block(tokens)?)
        } else {
            parse_expression(tokens)?
        };

        let arm_position = body.position();
        arms.push(MatchArm {
            pattern,
            body,
            position: arm_position,
        });

        if matches!(tokens.peek(), Some(Token::Comma { .. })) {
            tokens.next();
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;

    Ok(Expression::Match(Box::new(MatchExpression {
        scrutinee,
        arms,
        position,
    })))
}

/// Patterns are primary expressions only: literals, identifiers, tuple
/// literals, plus `else` as the anonymous catch-all.
fn parse_pattern(tokens: &mut ParseState<Token>) -> ParseResult<Pattern> {
    match tokens.peek() {
        Some(Token::ElseKeyword { position }) => {
            tokens.next();
            Ok(Pattern::CatchAll(position))
        }
        Some(Token::Id { value, position }) => {
            tokens.next();
            // member access in a pattern (enum variants: Color.Red)
            if matches!(tokens.peek(), Some(Token::Dot { .. })) {
                tokens.next();
                let (field, field_position) = expect_identifier(tokens, "variant name")?;
                return Ok(Pattern::Literal(Expression::MemberAccess(Box::new(
                    MemberAccess {
                        object: Expression::Id(Id {
                            name: value,
                            position,
                        }),
                        field,
                        position: field_position,
                    },
                ))));
            }
            Ok(Pattern::Binding(value, position))
        }
        Some(Token::Integer { value, position }) => {
            tokens.next();
            Ok(Pattern::Literal(Expression::Num(Num::Integer(
                value, position,
            ))))
        }
        Some(Token::Minus { position }) => {
            tokens.next();
            match tokens.peek() {
                Some(Token::Integer { value, .. }) => {
                    tokens.next();
                    Ok(Pattern::Literal(Expression::Num(Num::Integer(
                        -value, position,
                    ))))
                }
                other => Err(ParseError::unexpected(
                    format!("expected number after '-' in pattern, got {other:?}"),
                    other.map(|t| t.position()),
                )),
            }
        }
        Some(Token::StringLiteral { value, position }) => {
            tokens.next();
            Ok(Pattern::Literal(Expression::AstString(AstString {
                value,
                position,
            })))
        }
        Some(Token::True { position }) => {
            tokens.next();
            Ok(Pattern::Literal(Expression::Bool(Bool {
                value: true,
                position,
            })))
        }
        Some(Token::False { position }) => {
            tokens.next();
            Ok(Pattern::Literal(Expression::Bool(Bool {
                value: false,
                position,
            })))
        }
        Some(Token::LParen { .. }) => {
            let literal = parse_primary(tokens, false)?;
            Ok(Pattern::Literal(literal))
        }
        other => Err(ParseError::unexpected(
            format!("expected a pattern, got {other:?}"),
            other.map(|t| t.position()),
        )),
    }
}

/// `expr catch { body }`, `expr catch |err| { body }`, or `expr catch expr`.
fn parse_catch_tail(
    tokens: &mut ParseState<Token>,
    expr: Expression,
) -> ParseResult<Expression> {
    let Some(Token::CatchKeyword { position }) = tokens.peek() else {
        return Ok(expr);
    };
    tokens.next();

    let mut error_var = None;
    if matches!(tokens.peek(), Some(Token::Pipe { .. })) {
        tokens.next();
        let (name, _) = expect_identifier(tokens, "error variable")?;
        error_var = Some(name);
        expect_token(tokens, |t| matches!(t, Token::Pipe { .. }), "'|'")?;
    }

    let body = if matches!(tokens.peek(), Some(Token::LBrace { .. })) {
        Expression::Block(parse_block(tokens)?)
    } else {
        parse_binary(tokens, 0, true)?
    };

    Ok(Expression::Catch(Box::new(CatchExpression {
        expr,
        error_var,
        body,
        position,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Expression {
        let tokens = Lexer::new(source, "test.uya").lex().unwrap();
        let mut state = ParseState::new(tokens);
        parse_expression(&mut state).unwrap()
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse("1 + 2 * 3");
        let Expression::Binary(top) = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(top.operator, BinaryOperator::Add);
        let Expression::Binary(rhs) = top.right else {
            panic!("expected nested binary on the right");
        };
        assert_eq!(rhs.operator, BinaryOperator::Multiply);
    }

    #[test]
    fn test_logical_operators_bind_loosest() {
        let expr = parse("a + 1 < b && c == d || e");
        let Expression::Binary(top) = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(top.operator, BinaryOperator::Or);
        let Expression::Binary(lhs) = top.left else {
            panic!("expected && on the left of ||");
        };
        assert_eq!(lhs.operator, BinaryOperator::And);
    }

    #[test]
    fn test_postfix_chain_method_call() {
        let expr = parse("obj.method(1, 2)");
        let Expression::Call(call) = expr else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
        assert!(matches!(call.callee, Expression::MemberAccess(_)));
    }

    #[test]
    fn test_slice_desugars_to_call() {
        let expr = parse("arr[1:4]");
        let Expression::Call(call) = expr else {
            panic!("expected slice call");
        };
        assert_eq!(call.callee_name(), Some("slice"));
        assert_eq!(call.args.len(), 3);
    }

    #[test]
    fn test_generic_call_vs_comparison() {
        let generic = parse("id<i32>(42)");
        let Expression::Call(call) = generic else {
            panic!("expected generic call");
        };
        assert_eq!(call.type_args.len(), 1);

        // same shape without the call must stay a comparison chain
        let cmp = parse("a < b");
        assert!(matches!(
            cmp,
            Expression::Binary(ref b) if b.operator == BinaryOperator::LessThan
        ));
    }

    #[test]
    fn test_catch_with_bare_expression() {
        let expr = parse("div(10, 0) catch 0");
        let Expression::Catch(catch) = expr else {
            panic!("expected catch expression");
        };
        assert!(catch.error_var.is_none());
        assert!(matches!(catch.body, Expression::Num(_)));
    }

    #[test]
    fn test_catch_with_error_binding() {
        let expr = parse("open() catch |err| { 0 }");
        let Expression::Catch(catch) = expr else {
            panic!("expected catch expression");
        };
        assert_eq!(catch.error_var.as_deref(), Some("err"));
        assert!(matches!(catch.body, Expression::Block(_)));
    }

    #[test]
    fn test_error_value_spelling() {
        let expr = parse("error.DivZero");
        assert_eq!(expr.as_error_value(), Some("DivZero"));
    }

    #[test]
    fn test_match_scrutinee_is_not_struct_init() {
        let expr = parse("match x { 1 => 2, else => 3 }");
        let Expression::Match(m) = expr else {
            panic!("expected match");
        };
        assert!(matches!(m.scrutinee, Expression::Id(_)));
        assert_eq!(m.arms.len(), 2);
        assert!(matches!(m.arms[1].pattern, Pattern::CatchAll(_)));
    }

    #[test]
    fn test_struct_init_expression() {
        let expr = parse("P{x: 1, y: 2}");
        let Expression::StructInit(init) = expr else {
            panic!("expected struct init");
        };
        assert_eq!(init.name, "P");
        assert_eq!(init.fields.len(), 2);
    }

    #[test]
    fn test_tuple_vs_parenthesised() {
        assert!(matches!(parse("(1, 2)"), Expression::TupleLiteral(_)));
        assert!(matches!(parse("(1 + 2)"), Expression::Binary(_)));
    }

    #[test]
    fn test_assignment_to_subscript() {
        let expr = parse("a[0] = 99");
        let Expression::Assignment(assign) = expr else {
            panic!("expected assignment");
        };
        assert!(matches!(assign.lvalue, Expression::ArrayAccess(_)));
    }

    #[test]
    fn test_cast_postfix() {
        let expr = parse("x as i64");
        assert!(matches!(expr, Expression::Cast(_)));
    }

    #[test]
    fn test_try_prefix() {
        let expr = parse("try div(1, 2)");
        let Expression::Unary(unary) = expr else {
            panic!("expected unary");
        };
        assert_eq!(unary.operator, UnaryOperator::Try);
        assert!(matches!(unary.operand, Expression::Call(_)));
    }
}
