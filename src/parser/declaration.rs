use crate::lexer::Token;

use super::{
    ast::*, expect_identifier, expect_token, parse_block, parse_type, statement::parse_var_decl,
    types::token_starts_type, ParseError, ParseResult, ParseState,
};

pub(crate) fn parse_declaration(tokens: &mut ParseState<Token>) -> ParseResult<Declaration> {
    // `test "description" { ... }` — `test` is a plain identifier
    if let (Some(Token::Id { value, .. }), Some(Token::StringLiteral { .. })) =
        (tokens.peek(), tokens.peek_second())
    {
        if value == "test" {
            return parse_test_block(tokens).map(Declaration::TestBlock);
        }
    }

    match tokens.peek() {
        Some(Token::FnKeyword { .. }) => parse_fn_decl(tokens).map(Declaration::Function),
        Some(Token::ExternKeyword { .. }) => parse_extern_decl(tokens).map(Declaration::Extern),
        Some(Token::StructKeyword { .. }) => parse_struct_decl(tokens).map(Declaration::Struct),
        Some(Token::EnumKeyword { .. }) => parse_enum_decl(tokens).map(Declaration::Enum),
        Some(Token::ErrorKeyword { .. }) => parse_error_decl(tokens).map(Declaration::Error),
        Some(Token::Var { .. }) | Some(Token::Const { .. }) => {
            let decl = parse_var_decl(tokens)?;
            if matches!(tokens.peek(), Some(Token::Semicolon { .. })) {
                tokens.next();
            }
            Ok(Declaration::Global(decl))
        }
        Some(Token::Id { .. }) => parse_impl_or_method_block(tokens),
        other => Err(ParseError::unexpected(
            format!("expected a declaration, got {other:?}"),
            other.map(|t| t.position()),
        )),
    }
}

/// `<T, U>` type parameter list, if present.
fn parse_type_params(tokens: &mut ParseState<Token>) -> ParseResult<Vec<String>> {
    let mut type_params = vec![];
    if matches!(tokens.peek(), Some(Token::LessThan { .. })) {
        tokens.next();
        loop {
            let (name, _) = expect_identifier(tokens, "type parameter")?;
            type_params.push(name);
            match tokens.peek() {
                Some(Token::Comma { .. }) => {
                    tokens.next();
                }
                _ => break,
            }
        }
        expect_token(tokens, |t| matches!(t, Token::GreaterThan { .. }), "'>'")?;
    }
    Ok(type_params)
}

/// Parameter list between parentheses. A bare `self` gets the placeholder
/// type `Self`, replaced with a pointer to the enclosing struct at emission.
/// Returns `(params, is_varargs)`; `...` must come last.
fn parse_params(tokens: &mut ParseState<Token>) -> ParseResult<(Vec<Parameter>, bool)> {
    expect_token(tokens, |t| matches!(t, Token::LParen { .. }), "'('")?;

    let mut params = vec![];
    let mut is_varargs = false;

    if !matches!(tokens.peek(), Some(Token::RParen { .. })) {
        loop {
            if matches!(tokens.peek(), Some(Token::Ellipsis { .. })) {
                tokens.next();
                is_varargs = true;
                break;
            }

            let (name, position) = expect_identifier(tokens, "parameter name")?;
            let type_name = if matches!(tokens.peek(), Some(Token::Colon { .. })) {
                tokens.next();
                parse_type(tokens)?
            } else {
                TypeName::named("Self", position.clone())
            };
            params.push(Parameter {
                name,
                type_name,
                position,
            });

            if matches!(tokens.peek(), Some(Token::Comma { .. })) {
                tokens.next();
            } else {
                break;
            }
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RParen { .. }), "')'")?;
    Ok((params, is_varargs))
}

/// Return type in either form: `-> T`, a bare type before `{`/`;`, or
/// nothing (void).
fn parse_return_type(
    tokens: &mut ParseState<Token>,
    fallback: &crate::lexer::Span,
) -> ParseResult<TypeName> {
    match tokens.peek() {
        Some(Token::SmallRightArrow { .. }) => {
            tokens.next();
            parse_type(tokens)
        }
        Some(token) if token_starts_type(&token) => parse_type(tokens),
        _ => Ok(TypeName::void(fallback.clone())),
    }
}

pub(crate) fn parse_fn_decl(
    tokens: &mut ParseState<Token>,
) -> ParseResult<FunctionDeclaration> {
    let position =
        expect_token(tokens, |t| matches!(t, Token::FnKeyword { .. }), "'fn'")?.position();

    let (name, _) = expect_identifier(tokens, "function name")?;
    let type_params = parse_type_params(tokens)?;
    let (params, is_varargs) = parse_params(tokens)?;
    let return_type = parse_return_type(tokens, &position)?;
    let body = parse_block(tokens)?;

    Ok(FunctionDeclaration {
        name,
        type_params,
        params,
        return_type,
        body: Some(body),
        is_extern: false,
        is_varargs,
        position,
    })
}

/// `extern fn name(params) ret;` declares an import; with a body it defines
/// an exported function.
fn parse_extern_decl(tokens: &mut ParseState<Token>) -> ParseResult<FunctionDeclaration> {
    let position = expect_token(
        tokens,
        |t| matches!(t, Token::ExternKeyword { .. }),
        "'extern'",
    )?
    .position();
    expect_token(tokens, |t| matches!(t, Token::FnKeyword { .. }), "'fn'")?;

    let (name, _) = expect_identifier(tokens, "function name")?;
    let (params, is_varargs) = parse_params(tokens)?;
    let return_type = parse_return_type(tokens, &position)?;

    let body = match tokens.peek() {
        Some(Token::LBrace { .. }) => Some(parse_block(tokens)?),
        Some(Token::Semicolon { .. }) => {
            tokens.next();
            None
        }
        other => {
            return Err(ParseError::missing(
                "'{' or ';' after extern declaration",
                other.map(|t| t.position()),
            ))
        }
    };

    Ok(FunctionDeclaration {
        name,
        type_params: vec![],
        params,
        return_type,
        body,
        is_extern: true,
        is_varargs,
        position,
    })
}

fn parse_struct_decl(tokens: &mut ParseState<Token>) -> ParseResult<StructDeclaration> {
    let position = expect_token(
        tokens,
        |t| matches!(t, Token::StructKeyword { .. }),
        "'struct'",
    )?
    .position();

    let (name, _) = expect_identifier(tokens, "struct name")?;
    let type_params = parse_type_params(tokens)?;

    expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?;

    let mut fields = vec![];
    let mut methods = vec![];

    while !matches!(tokens.peek(), Some(Token::RBrace { .. }) | None) {
        if matches!(tokens.peek(), Some(Token::FnKeyword { .. })) {
            methods.push(parse_fn_decl(tokens)?);
            continue;
        }

        let (field_name, field_position) = expect_identifier(tokens, "field name")?;
        expect_token(tokens, |t| matches!(t, Token::Colon { .. }), "':'")?;
        let type_name = parse_type(tokens)?;
        fields.push(StructFieldDeclaration {
            name: field_name,
            type_name,
            position: field_position,
        });

        if matches!(tokens.peek(), Some(Token::Comma { .. })) {
            tokens.next();
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;

    Ok(StructDeclaration {
        name,
        type_params,
        fields,
        methods,
        position,
    })
}

/// `enum Name [: UnderlyingType] { Variant [= value], ... }`
fn parse_enum_decl(tokens: &mut ParseState<Token>) -> ParseResult<EnumDeclaration> {
    let position =
        expect_token(tokens, |t| matches!(t, Token::EnumKeyword { .. }), "'enum'")?.position();

    let (name, _) = expect_identifier(tokens, "enum name")?;

    let mut underlying_type = None;
    if matches!(tokens.peek(), Some(Token::Colon { .. })) {
        tokens.next();
        underlying_type = Some(parse_type(tokens)?);
    }

    expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?;

    let mut variants = vec![];
    while !matches!(tokens.peek(), Some(Token::RBrace { .. }) | None) {
        let (variant_name, variant_position) = expect_identifier(tokens, "variant name")?;

        let mut value = None;
        if matches!(tokens.peek(), Some(Token::Assign { .. })) {
            tokens.next();
            let negative = if matches!(tokens.peek(), Some(Token::Minus { .. })) {
                tokens.next();
                true
            } else {
                false
            };
            match tokens.peek() {
                Some(Token::Integer { value: v, .. }) => {
                    tokens.next();
                    value = Some(if negative { -v } else { v });
                }
                other => {
                    return Err(ParseError::missing(
                        "number after '='",
                        other.map(|t| t.position()),
                    ))
                }
            }
        }

        variants.push(EnumVariant {
            name: variant_name,
            value,
            position: variant_position,
        });

        match tokens.peek() {
            Some(Token::Comma { .. }) => {
                tokens.next();
            }
            Some(Token::RBrace { .. }) => break,
            other => {
                return Err(ParseError::missing(
                    "',' or '}'",
                    other.map(|t| t.position()),
                ))
            }
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;

    Ok(EnumDeclaration {
        name,
        underlying_type,
        variants,
        position,
    })
}

/// `error Name;`
fn parse_error_decl(tokens: &mut ParseState<Token>) -> ParseResult<ErrorDeclaration> {
    let position = expect_token(
        tokens,
        |t| matches!(t, Token::ErrorKeyword { .. }),
        "'error'",
    )?
    .position();

    let (name, _) = expect_identifier(tokens, "error name")?;
    expect_token(tokens, |t| matches!(t, Token::Semicolon { .. }), "';'")?;

    Ok(ErrorDeclaration { name, position })
}

/// Top-level identifier: `Name : Interface { fns }` is an impl declaration,
/// `Name { fns }` an external method block.
fn parse_impl_or_method_block(tokens: &mut ParseState<Token>) -> ParseResult<Declaration> {
    let (struct_name, position) = expect_identifier(tokens, "type name")?;

    match tokens.peek() {
        Some(Token::Colon { .. }) => {
            tokens.next();
            let (interface_name, _) = expect_identifier(tokens, "interface name")?;
            let methods = parse_method_list(tokens)?;
            Ok(Declaration::Impl(ImplDeclaration {
                struct_name,
                interface_name,
                methods,
                position,
            }))
        }
        Some(Token::LBrace { .. }) => {
            let methods = parse_method_list(tokens)?;
            Ok(Declaration::MethodBlock(MethodBlock {
                struct_name,
                methods,
                position,
            }))
        }
        other => Err(ParseError::unexpected(
            format!("expected ':' or '{{' after type name, got {other:?}"),
            other.map(|t| t.position()),
        )),
    }
}

fn parse_method_list(tokens: &mut ParseState<Token>) -> ParseResult<Vec<FunctionDeclaration>> {
    expect_token(tokens, |t| matches!(t, Token::LBrace { .. }), "'{'")?;

    let mut methods = vec![];
    while !matches!(tokens.peek(), Some(Token::RBrace { .. }) | None) {
        match parse_fn_decl(tokens) {
            Ok(method) => methods.push(method),
            Err(error) => {
                tokens.add_error(error);
                // skip one token and try the next method
                tokens.next();
            }
        }
    }

    expect_token(tokens, |t| matches!(t, Token::RBrace { .. }), "'}'")?;
    Ok(methods)
}

fn parse_test_block(tokens: &mut ParseState<Token>) -> ParseResult<TestBlock> {
    let (_, position) = expect_identifier(tokens, "'test'")?;

    let name = match tokens.peek() {
        Some(Token::StringLiteral { value, .. }) => {
            tokens.next();
            value
        }
        other => {
            return Err(ParseError::missing(
                "test description string",
                other.map(|t| t.position()),
            ))
        }
    };

    let body = parse_block(tokens)?;

    Ok(TestBlock {
        name,
        body,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Declaration {
        let tokens = Lexer::new(source, "test.uya").lex().unwrap();
        let mut state = ParseState::new(tokens);
        let decl = parse_declaration(&mut state).unwrap();
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        decl
    }

    #[test]
    fn test_fn_with_arrow_return_type() {
        let Declaration::Function(f) = parse("fn add(a: i32, b: i32) -> i32 { return a + b; }")
        else {
            panic!("expected function");
        };
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.return_type.to_string(), "i32");
    }

    #[test]
    fn test_fn_with_bare_return_type() {
        let Declaration::Function(f) = parse("fn answer() i32 { return 42; }") else {
            panic!("expected function");
        };
        assert_eq!(f.return_type.to_string(), "i32");
    }

    #[test]
    fn test_fn_error_union_return() {
        let Declaration::Function(f) =
            parse("fn div(a: i32, b: i32) !i32 { return a / b; }")
        else {
            panic!("expected function");
        };
        assert!(f.return_type.is_error_union());
    }

    #[test]
    fn test_fn_defaults_to_void() {
        let Declaration::Function(f) = parse("fn side_effect() { }") else {
            panic!("expected function");
        };
        assert!(f.return_type.is_void());
    }

    #[test]
    fn test_generic_fn_type_params() {
        let Declaration::Function(f) = parse("fn id<T>(x: T) T { return x; }") else {
            panic!("expected function");
        };
        assert_eq!(f.type_params, vec!["T".to_string()]);
        assert!(f.is_generic());
    }

    #[test]
    fn test_extern_without_body() {
        let Declaration::Extern(f) = parse("extern fn puts(s: *byte) i32;") else {
            panic!("expected extern");
        };
        assert!(f.is_extern);
        assert!(f.body.is_none());
    }

    #[test]
    fn test_extern_with_varargs() {
        let Declaration::Extern(f) = parse("extern fn printf(fmt: *byte, ...) i32;") else {
            panic!("expected extern");
        };
        assert!(f.is_varargs);
        assert_eq!(f.params.len(), 1);
    }

    #[test]
    fn test_exported_extern_has_body() {
        let Declaration::Extern(f) = parse("extern fn callback() i32 { return 7; }") else {
            panic!("expected extern");
        };
        assert!(f.body.is_some());
    }

    #[test]
    fn test_struct_with_inline_method() {
        let Declaration::Struct(s) = parse(
            "struct Point { x: i32, y: i32, fn norm(self) i32 { return self.x + self.y; } }",
        ) else {
            panic!("expected struct");
        };
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.methods.len(), 1);
        assert_eq!(s.methods[0].name, "norm");
    }

    #[test]
    fn test_generic_struct() {
        let Declaration::Struct(s) = parse("struct Pair<A, B> { first: A, second: B }") else {
            panic!("expected struct");
        };
        assert_eq!(s.type_params.len(), 2);
    }

    #[test]
    fn test_enum_with_underlying_type_and_values() {
        let Declaration::Enum(e) = parse("enum Status : u8 { Ok = 0, Error = 1, Retry }")
        else {
            panic!("expected enum");
        };
        assert!(e.underlying_type.is_some());
        assert_eq!(e.discriminant_of("Retry"), Some(2));
    }

    #[test]
    fn test_error_declaration() {
        let Declaration::Error(e) = parse("error DivZero;") else {
            panic!("expected error declaration");
        };
        assert_eq!(e.name, "DivZero");
    }

    #[test]
    fn test_impl_declaration() {
        let Declaration::Impl(i) =
            parse("Point : Printable { fn print(self) { } }")
        else {
            panic!("expected impl");
        };
        assert_eq!(i.struct_name, "Point");
        assert_eq!(i.interface_name, "Printable");
        assert_eq!(i.methods.len(), 1);
    }

    #[test]
    fn test_method_block() {
        let Declaration::MethodBlock(block) =
            parse("Point { fn flip(self) { } fn zero(self) { } }")
        else {
            panic!("expected method block");
        };
        assert_eq!(block.struct_name, "Point");
        assert_eq!(block.methods.len(), 2);
    }

    #[test]
    fn test_test_block() {
        let Declaration::TestBlock(t) = parse(r#"test "adds numbers" { var x = 1 + 2; }"#)
        else {
            panic!("expected test block");
        };
        assert_eq!(t.name, "adds numbers");
    }
}
