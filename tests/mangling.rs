use uya_lib::lexer::Span;
use uya_lib::mono::{self, MonoEngine, MonoKind};
use uya_lib::parser::ast::TypeName;

fn named(name: &str) -> TypeName {
    TypeName::named(name, Span::default())
}

#[test]
fn mangled_names_are_byte_identical_across_requests() {
    let args = vec![
        named("i32"),
        TypeName::Pointer {
            inner: Box::new(named("Node")),
            borrowed: false,
            position: Span::default(),
        },
    ];

    let mut a = MonoEngine::new();
    let mut b = MonoEngine::new();
    let first = a.request(MonoKind::Struct, "Map", &args);
    let second = b.request(MonoKind::Struct, "Map", &args);
    assert_eq!(first, second);
    assert_eq!(first, "Map_i32_ptr_Node");
}

#[test]
fn each_pair_is_queued_exactly_once() {
    let mut engine = MonoEngine::new();
    for _ in 0..5 {
        engine.request(MonoKind::Function, "id", &[named("i32")]);
        engine.request(MonoKind::Function, "id", &[named("bool")]);
    }
    assert_eq!(engine.request_count(), 2);
}

#[test]
fn reverse_lookup_walks_multi_parameter_tails() {
    let known = |name: &str| matches!(name, "Pair" | "Container");
    assert_eq!(
        mono::generic_base_of("Container_i32", known),
        Some("Container")
    );
    assert_eq!(mono::generic_base_of("Pair_i32_i64", known), Some("Pair"));
    assert_eq!(mono::generic_base_of("Pair_ptr_Node_i64", known), Some("Pair"));
    assert_eq!(mono::generic_base_of("unrelated_name", known), None);
}

#[test]
fn substitution_preserves_ffi_and_size_attributes() {
    use uya_lib::parser::ast::ArraySize;

    let ty = TypeName::Array {
        element: Box::new(TypeName::Pointer {
            inner: Box::new(named("T")),
            borrowed: true,
            position: Span::default(),
        }),
        size: ArraySize::Named("LIMIT".into()),
        position: Span::default(),
    };

    let out = mono::substitute_in(&ty, &["T".to_string()], &[named("u64")]);
    let TypeName::Array { element, size, .. } = out else {
        panic!("structure preserved");
    };
    assert_eq!(size, ArraySize::Named("LIMIT".into()));
    let TypeName::Pointer { borrowed, inner, .. } = *element else {
        panic!("pointer preserved");
    };
    assert!(borrowed, "borrow attribute preserved");
    assert_eq!(inner.to_string(), "u64");
}
