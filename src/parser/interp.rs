use crate::lexer::{Lexer, Span};

use super::{
    ast::{FormatSpec, InterpSegment, StringInterpolation},
    parse_expression, ParseError, ParseErrorKind, ParseResult, ParseState,
};

/// Parse the body of a string literal containing `${...}` interpolations.
/// Each interpolation is lexed and parsed by a temporary sub-parser; a
/// trailing `:spec` inside the braces is a printf-style format spec. Brace
/// depth is tracked so nested `{}` in the expression do not terminate the
/// interpolation early.
pub(crate) fn parse_string_interpolation(
    content: &str,
    position: &Span,
) -> ParseResult<StringInterpolation> {
    let bytes = content.as_bytes();
    let mut segments = vec![];
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if i > text_start {
                segments.push(InterpSegment::Text(content[text_start..i].to_string()));
            }

            let expr_start = i + 2;
            let mut depth = 1usize;
            let mut j = expr_start;
            let mut format_start = None;

            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    b':' if depth == 1 && format_start.is_none() => {
                        format_start = Some(j);
                    }
                    _ => {}
                }
                j += 1;
            }

            if j >= bytes.len() || depth != 0 {
                return Err(ParseError {
                    kind: ParseErrorKind::UnterminatedInterpolation,
                    message: "interpolation is missing its closing '}'".into(),
                    position: Some(position.clone()),
                });
            }

            let expr_end = format_start.unwrap_or(j);
            let expr_str = &content[expr_start..expr_end];

            let expr = sub_parse_expression(expr_str, position)?;

            let format = format_start.map(|start| parse_format_spec(&content[start..j]));

            segments.push(InterpSegment::Expr { expr, format });

            i = j + 1;
            text_start = i;
        } else if bytes[i] == b'\\' && i + 1 < bytes.len() {
            // keep escapes opaque; the backends re-emit them
            i += 2;
        } else {
            i += 1;
        }
    }

    if text_start < content.len() {
        segments.push(InterpSegment::Text(content[text_start..].to_string()));
    }

    Ok(StringInterpolation {
        segments,
        position: position.clone(),
    })
}

/// Lex and parse one interpolated expression with a temporary token stream.
fn sub_parse_expression(
    expr_str: &str,
    position: &Span,
) -> ParseResult<super::ast::Expression> {
    let tokens = Lexer::new(expr_str, &position.filename)
        .lex()
        .map_err(|e| ParseError {
            kind: ParseErrorKind::Unexpected,
            message: format!("failed to lex interpolated expression: {e}"),
            position: Some(position.clone()),
        })?;

    if tokens.is_empty() {
        return Err(ParseError {
            kind: ParseErrorKind::Unexpected,
            message: "empty interpolation".into(),
            position: Some(position.clone()),
        });
    }

    let mut state = ParseState::new(tokens);
    let expr = parse_expression(&mut state)?;
    if !state.is_at_end() {
        return Err(ParseError {
            kind: ParseErrorKind::Unexpected,
            message: format!("trailing tokens in interpolated expression {expr_str:?}"),
            position: Some(position.clone()),
        });
    }
    Ok(expr)
}

/// `":[flags][width][.precision][type]"` with flags drawn from `#0-+ `.
pub(crate) fn parse_format_spec(spec: &str) -> FormatSpec {
    let mut chars = spec.strip_prefix(':').unwrap_or(spec).chars().peekable();
    let mut out = FormatSpec::default();

    while let Some(&c) = chars.peek() {
        if "#0-+ ".contains(c) {
            out.flags.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let mut width = None;
    while let Some(&c) = chars.peek() {
        if let Some(digit) = c.to_digit(10) {
            width = Some(width.unwrap_or(0) * 10 + digit);
            chars.next();
        } else {
            break;
        }
    }
    out.width = width;

    if chars.peek() == Some(&'.') {
        chars.next();
        let mut precision = 0;
        while let Some(&c) = chars.peek() {
            if let Some(digit) = c.to_digit(10) {
                precision = precision * 10 + digit;
                chars.next();
            } else {
                break;
            }
        }
        out.precision = Some(precision);
    }

    out.type_char = chars.next();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Expression;

    #[test]
    fn test_plain_text_and_expr_segments() {
        let interp =
            parse_string_interpolation("count = ${n}, done", &Span::default()).unwrap();
        assert_eq!(interp.segments.len(), 3);
        assert!(matches!(&interp.segments[0], InterpSegment::Text(t) if t == "count = "));
        assert!(matches!(&interp.segments[1], InterpSegment::Expr { .. }));
        assert!(matches!(&interp.segments[2], InterpSegment::Text(t) if t == ", done"));
    }

    #[test]
    fn test_format_spec_fields() {
        let spec = parse_format_spec(":#06.2f");
        assert_eq!(spec.flags, "#0");
        assert_eq!(spec.width, Some(6));
        assert_eq!(spec.precision, Some(2));
        assert_eq!(spec.type_char, Some('f'));
    }

    #[test]
    fn test_spec_attached_to_expression() {
        let interp = parse_string_interpolation("${x:04d}", &Span::default()).unwrap();
        let InterpSegment::Expr { format, .. } = &interp.segments[0] else {
            panic!("expected expr segment");
        };
        let format = format.as_ref().unwrap();
        assert_eq!(format.width, Some(4));
        assert_eq!(format.type_char, Some('d'));
    }

    #[test]
    fn test_nested_braces_do_not_terminate() {
        let interp =
            parse_string_interpolation("${ match x { 1 => 2, else => 3 } }", &Span::default())
                .unwrap();
        assert_eq!(interp.segments.len(), 1);
        let InterpSegment::Expr { expr, .. } = &interp.segments[0] else {
            panic!("expected expr segment");
        };
        assert!(matches!(expr, Expression::Match(_)));
    }

    #[test]
    fn test_unterminated_interpolation_is_an_error() {
        let err = parse_string_interpolation("${x", &Span::default()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedInterpolation);
    }

    #[test]
    fn test_complex_expression_inside() {
        let interp =
            parse_string_interpolation("${a + b * 2}", &Span::default()).unwrap();
        let InterpSegment::Expr { expr, format } = &interp.segments[0] else {
            panic!("expected expr segment");
        };
        assert!(format.is_none());
        assert!(matches!(expr, Expression::Binary(_)));
    }
}
