use serde::{Deserialize, Serialize};

use crate::lexer::Span;

/// Compile-time size of a fixed array type. The parser resolves identifier
/// sizes against top-level constants in a finalisation pass; a `Named` size
/// that survives to a backend is a resolution error there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArraySize {
    Literal(i64),
    Named(String),
}

impl ArraySize {
    pub fn literal(&self) -> Option<i64> {
        match self {
            ArraySize::Literal(n) => Some(*n),
            ArraySize::Named(_) => None,
        }
    }
}

/// Parsed (unresolved) type syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeName {
    /// `i32`, `bool`, `Point`, `Container<i32>`
    Named {
        name: String,
        type_args: Vec<TypeName>,
        position: Span,
    },
    /// `*T` and `&T`. Both lower identically; `borrowed` records which sigil
    /// was written for front-end checks that may want the distinction.
    Pointer {
        inner: Box<TypeName>,
        borrowed: bool,
        position: Span,
    },
    /// `[T: N]`
    Array {
        element: Box<TypeName>,
        size: ArraySize,
        position: Span,
    },
    /// `[T]` / `&[T]`
    Slice {
        element: Box<TypeName>,
        position: Span,
    },
    /// `(T1, T2, ...)`
    Tuple(Vec<TypeName>, Span),
    /// `fn(T1, T2) R`
    Fn {
        params: Vec<TypeName>,
        return_type: Box<TypeName>,
        position: Span,
    },
    /// `!T`
    ErrorUnion {
        payload: Box<TypeName>,
        position: Span,
    },
    /// `atomic T`
    Atomic {
        inner: Box<TypeName>,
        position: Span,
    },
}

impl TypeName {
    pub fn named(name: impl ToString, position: Span) -> Self {
        TypeName::Named {
            name: name.to_string(),
            type_args: vec![],
            position,
        }
    }

    pub fn void(position: Span) -> Self {
        TypeName::named("void", position)
    }

    pub fn position(&self) -> Span {
        match self {
            TypeName::Named { position, .. }
            | TypeName::Pointer { position, .. }
            | TypeName::Array { position, .. }
            | TypeName::Slice { position, .. }
            | TypeName::Tuple(_, position)
            | TypeName::Fn { position, .. }
            | TypeName::ErrorUnion { position, .. }
            | TypeName::Atomic { position, .. } => position.clone(),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeName::Named { name, .. } if name == "void")
    }

    pub fn is_error_union(&self) -> bool {
        matches!(self, TypeName::ErrorUnion { .. })
    }

    /// Payload of `!T`, or the type itself when it is not an error union.
    pub fn error_union_payload(&self) -> &TypeName {
        match self {
            TypeName::ErrorUnion { payload, .. } => payload,
            other => other,
        }
    }

    /// Base types known to the Language surface.
    pub fn is_base_type_name(name: &str) -> bool {
        matches!(
            name,
            "i8" | "i16"
                | "i32"
                | "i64"
                | "u8"
                | "u16"
                | "u32"
                | "u64"
                | "f32"
                | "f64"
                | "bool"
                | "byte"
                | "usize"
                | "void"
        )
    }

    pub fn is_unsigned_name(name: &str) -> bool {
        matches!(name, "u8" | "u16" | "u32" | "u64" | "usize" | "byte")
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeName::Named {
                name, type_args, ..
            } => {
                if type_args.is_empty() {
                    write!(f, "{name}")
                } else {
                    let args = type_args
                        .iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "{name}<{args}>")
                }
            }
            TypeName::Pointer {
                inner, borrowed, ..
            } => {
                if *borrowed {
                    write!(f, "&{inner}")
                } else {
                    write!(f, "*{inner}")
                }
            }
            TypeName::Array { element, size, .. } => match size {
                ArraySize::Literal(n) => write!(f, "[{element}: {n}]"),
                ArraySize::Named(name) => write!(f, "[{element}: {name}]"),
            },
            TypeName::Slice { element, .. } => write!(f, "[{element}]"),
            TypeName::Tuple(items, _) => {
                let items = items
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({items})")
            }
            TypeName::Fn {
                params,
                return_type,
                ..
            } => {
                let params = params
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "fn({params}) {return_type}")
            }
            TypeName::ErrorUnion { payload, .. } => write!(f, "!{payload}"),
            TypeName::Atomic { inner, .. } => write!(f, "atomic {inner}"),
        }
    }
}
