use crate::lexer::Token;

use super::{
    ast::{ArraySize, TypeName},
    expect_identifier, expect_token, ParseError, ParseErrorKind, ParseResult, ParseState,
};

/// Parse one type. The grammar is prefix-driven: `!T`, `*T`, `&T` / `&[T]`,
/// `atomic T`, `fn(..) R`, `[T: N]` / `[T]`, `(T1, T2, ...)`, or a named
/// type with optional `<...>` arguments.
pub(crate) fn parse_type(tokens: &mut ParseState<Token>) -> ParseResult<TypeName> {
    let Some(token) = tokens.peek() else {
        return Err(ParseError::eof("type"));
    };

    match token {
        Token::ExclamationMark { position } => {
            tokens.next();
            let payload = parse_type(tokens)?;
            Ok(TypeName::ErrorUnion {
                payload: Box::new(payload),
                position,
            })
        }
        Token::AtomicKeyword { position } => {
            tokens.next();
            let inner = parse_type(tokens)?;
            Ok(TypeName::Atomic {
                inner: Box::new(inner),
                position,
            })
        }
        Token::Asterisk { position } => {
            tokens.next();
            let inner = parse_type(tokens)?;
            Ok(TypeName::Pointer {
                inner: Box::new(inner),
                borrowed: false,
                position,
            })
        }
        Token::Ampersand { position } => {
            tokens.next();
            // `&[T]` is a slice, any other `&T` a borrowed pointer
            if let Some(Token::LBracket { .. }) = tokens.peek() {
                let element = parse_bracket_type(tokens)?;
                return Ok(match element {
                    BracketType::Slice(element) => TypeName::Slice {
                        element: Box::new(element),
                        position,
                    },
                    BracketType::Array(element, size) => TypeName::Array {
                        element: Box::new(element),
                        size,
                        position,
                    },
                });
            }
            let inner = parse_type(tokens)?;
            Ok(TypeName::Pointer {
                inner: Box::new(inner),
                borrowed: true,
                position,
            })
        }
        Token::FnKeyword { position } => {
            tokens.next();
            expect_token(tokens, |t| matches!(t, Token::LParen { .. }), "'('")?;

            let mut params = vec![];
            if !matches!(tokens.peek(), Some(Token::RParen { .. })) {
                loop {
                    params.push(parse_type(tokens)?);
                    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                        tokens.next();
                    } else {
                        break;
                    }
                }
            }
            expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;

            let return_type = parse_type(tokens)?;
            Ok(TypeName::Fn {
                params,
                return_type: Box::new(return_type),
                position,
            })
        }
        Token::LBracket { position } => {
            let element = parse_bracket_type(tokens)?;
            Ok(match element {
                BracketType::Slice(element) => TypeName::Slice {
                    element: Box::new(element),
                    position,
                },
                BracketType::Array(element, size) => TypeName::Array {
                    element: Box::new(element),
                    size,
                    position,
                },
            })
        }
        Token::LParen { position } => {
            tokens.next();
            let mut elements = vec![];
            if !matches!(tokens.peek(), Some(Token::RParen { .. })) {
                loop {
                    elements.push(parse_type(tokens)?);
                    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                        tokens.next();
                    } else {
                        break;
                    }
                }
            }
            expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
            Ok(TypeName::Tuple(elements, position))
        }
        Token::Id { .. } => {
            let (name, position) = expect_identifier(tokens, "type name")?;

            // `Container<i32>` — a '<' directly after a type name in type
            // position is always a type-argument list
            let mut type_args = vec![];
            if matches!(tokens.peek(), Some(Token::LessThan { .. })) {
                tokens.next();
                loop {
                    type_args.push(parse_type(tokens)?);
                    if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                        tokens.next();
                    } else {
                        break;
                    }
                }
                expect_token(tokens, |t| matches!(t, Token::GreaterThan { .. }), "'>'")?;
            }

            Ok(TypeName::Named {
                name,
                type_args,
                position,
            })
        }
        other => Err(ParseError {
            kind: ParseErrorKind::InvalidType,
            message: format!("expected a type, got {other:?}"),
            position: Some(other.position()),
        }),
    }
}

enum BracketType {
    Slice(TypeName),
    Array(TypeName, ArraySize),
}

/// `[T]` or `[T: N]`, with `N` a number literal or a named constant.
fn parse_bracket_type(tokens: &mut ParseState<Token>) -> ParseResult<BracketType> {
    expect_token(tokens, |t| matches!(t, Token::LBracket { .. }), "'['")?;
    let element = parse_type(tokens)?;

    if matches!(tokens.peek(), Some(Token::Colon { .. })) {
        tokens.next();
        let size = match tokens.peek() {
            Some(Token::Integer { value, .. }) => {
                tokens.next();
                ArraySize::Literal(value)
            }
            Some(Token::Id { value, .. }) => {
                tokens.next();
                ArraySize::Named(value)
            }
            other => {
                return Err(ParseError {
                    kind: ParseErrorKind::InvalidType,
                    message: format!("array size must be a constant expression, got {other:?}"),
                    position: other.map(|t| t.position()),
                })
            }
        };
        expect_token(tokens, |t| matches!(t, Token::RBracket { .. }), "']'")?;
        return Ok(BracketType::Array(element, size));
    }

    expect_token(tokens, |t| matches!(t, Token::RBracket { .. }), "']'")?;
    Ok(BracketType::Slice(element))
}

/// Whether a token can begin a type, used to recognise the arrow-free
/// return-type form `fn f() T { .. }` (tuple return types start with `(`).
pub(crate) fn token_starts_type(token: &Token) -> bool {
    matches!(
        token,
        Token::ExclamationMark { .. }
            | Token::Asterisk { .. }
            | Token::Ampersand { .. }
            | Token::AtomicKeyword { .. }
            | Token::FnKeyword { .. }
            | Token::LBracket { .. }
            | Token::LParen { .. }
            | Token::Id { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> TypeName {
        let tokens = Lexer::new(source, "test.uya").lex().unwrap();
        let mut state = ParseState::new(tokens);
        parse_type(&mut state).unwrap()
    }

    #[test]
    fn test_error_union_of_pointer() {
        let ty = parse("!*i32");
        assert_eq!(ty.to_string(), "!*i32");
        assert!(ty.is_error_union());
    }

    #[test]
    fn test_fixed_array() {
        let ty = parse("[i32: 3]");
        match ty {
            TypeName::Array { size, .. } => assert_eq!(size.literal(), Some(3)),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_slice_forms() {
        assert!(matches!(parse("[byte]"), TypeName::Slice { .. }));
        assert!(matches!(parse("&[byte]"), TypeName::Slice { .. }));
    }

    #[test]
    fn test_borrow_and_pointer_collapse() {
        let borrow = parse("&Point");
        let pointer = parse("*Point");
        assert!(matches!(borrow, TypeName::Pointer { borrowed: true, .. }));
        assert!(matches!(pointer, TypeName::Pointer { borrowed: false, .. }));
    }

    #[test]
    fn test_function_pointer() {
        let ty = parse("fn(i32, bool) void");
        assert_eq!(ty.to_string(), "fn(i32, bool) void");
    }

    #[test]
    fn test_generic_named_type() {
        let ty = parse("Container<i32>");
        match ty {
            TypeName::Named {
                name, type_args, ..
            } => {
                assert_eq!(name, "Container");
                assert_eq!(type_args.len(), 1);
            }
            other => panic!("expected named type, got {other:?}"),
        }
    }

    #[test]
    fn test_tuple_type() {
        let ty = parse("(i32, f64, bool)");
        assert!(matches!(ty, TypeName::Tuple(items, _) if items.len() == 3));
    }
}
