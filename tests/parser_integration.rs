use uya_lib::lexer::Lexer;
use uya_lib::parser::ast::*;
use uya_lib::parser::parse_program;

fn parse(source: &str) -> Program {
    let tokens = Lexer::new(source, "test.uya").lex().expect("lexes");
    let (program, errors) = parse_program(tokens);
    assert!(errors.is_empty(), "{errors:?}");
    program
}

#[test]
fn parses_every_declaration_kind() {
    let program = parse(
        r#"
error OutOfMemory;

enum Status : u8 { Ok = 0, Failed, Retry = 10 }

struct Point {
    x: i32,
    y: i32,
    fn sum(self) i32 { return self.x + self.y; }
}

Point {
    fn flip(self) void {
        var t = self.x;
        self.x = self.y;
        self.y = t;
    }
}

Point : Printable {
    fn print(self) void { }
}

extern fn puts(s: *byte) i32;
extern fn exported() i32 { return 3; }

const LIMIT = 32;
var counter: i32 = 0;

fn pair<A, B>(a: A, b: B) (A, B) { return (a, b); }

test "points add up" {
    const p = Point{x: 1, y: 2};
}

fn main() !i32 {
    const p = Point{x: 1, y: 2};
    return p.sum();
}
"#,
    );

    assert!(program.find_error("OutOfMemory").is_some());
    assert!(program.find_enum("Status").is_some());
    assert!(program.find_struct("Point").is_some());
    assert!(program.method_block_for("Point").is_some());
    assert_eq!(program.impl_blocks_for("Point").len(), 1);
    assert!(program.find_function("puts").is_some());
    assert!(program.find_function("exported").is_some());
    assert_eq!(program.constant_value("LIMIT"), Some(32));
    assert!(program.find_function("pair").unwrap().is_generic());
    assert!(program.find_function("main").is_some());

    // method lookup consults inline methods, method blocks and impls
    assert!(program.find_method("Point", "sum").is_some());
    assert!(program.find_method("Point", "flip").is_some());
    assert!(program.find_method("Point", "print").is_some());
}

#[test]
fn spans_lie_within_the_source_and_grow_monotonically() {
    let source = "fn a() i32 { return 1; }\nfn b() i32 { return 2; }\nstruct S { x: i32 }\n";
    let program = parse(source);
    let line_count = source.lines().count();

    let mut last_line = 0;
    for decl in &program.declarations {
        let span = decl.position();
        assert!(span.line() >= 1 && span.line() <= line_count);
        assert!(span.column() >= 1);
        assert!(span.line() >= last_line, "declaration spans are nondecreasing");
        last_line = span.line();
    }
}

#[test]
fn enum_discriminants_follow_declaration_order() {
    let program = parse("enum E { A, B = 7, C, D = 3, E2 }");
    let e = program.find_enum("E").unwrap();
    assert_eq!(
        e.discriminants(),
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 7),
            ("C".to_string(), 8),
            ("D".to_string(), 3),
            ("E2".to_string(), 4),
        ]
    );
}

#[test]
fn both_return_type_forms_agree() {
    let arrow = parse("fn f() -> !i32 { return 1; }");
    let bare = parse("fn f() !i32 { return 1; }");
    assert_eq!(
        arrow.find_function("f").unwrap().return_type.to_string(),
        bare.find_function("f").unwrap().return_type.to_string(),
    );
}

#[test]
fn comparison_or_higher_keeps_logicals_flat() {
    // (a + 1 < b) && (c == d) — the && must sit at the top
    let tokens = Lexer::new("a + 1 < b && c == d", "t").lex().unwrap();
    let mut state = uya_lib::parser::ParseState::new(tokens);
    let expr = uya_lib::parser::parse_expression(&mut state).unwrap();
    let Expression::Binary(top) = expr else {
        panic!("expected binary expression");
    };
    assert_eq!(top.operator, BinaryOperator::And);
}

#[test]
fn recovery_reports_multiple_errors_in_one_pass() {
    let tokens = Lexer::new(
        "fn broken( { }\nstruct Bad { x }\nfn ok() i32 { return 1; }",
        "test.uya",
    )
    .lex()
    .unwrap();
    let (program, errors) = parse_program(tokens);
    assert!(errors.len() >= 2, "one pass reports several errors: {errors:?}");
    assert!(program.find_function("ok").is_some());
}

#[test]
fn interpolation_round_trips_format_specs() {
    let program = parse(r#"fn main() i32 { var s = "v=${x:#06.2f}|${y}"; return 0; }"#);
    let main = program.find_function("main").unwrap();
    let Some(body) = &main.body else {
        panic!("main has a body")
    };
    let Statement::VarDecl(decl) = &body.statements[0] else {
        panic!("expected var decl");
    };
    let Some(Expression::StringInterpolation(interp)) = &decl.init else {
        panic!("expected interpolation, got {:?}", decl.init);
    };

    let specs: Vec<Option<&FormatSpec>> = interp
        .segments
        .iter()
        .filter_map(|s| match s {
            InterpSegment::Expr { format, .. } => Some(format.as_ref()),
            _ => None,
        })
        .collect();
    assert_eq!(specs.len(), 2);
    let first = specs[0].expect("explicit spec");
    assert_eq!(first.flags, "#0");
    assert_eq!(first.width, Some(6));
    assert_eq!(first.precision, Some(2));
    assert_eq!(first.type_char, Some('f'));
    assert!(specs[1].is_none());
}
