use serde::{Deserialize, Serialize};

use crate::lexer::Span;

use super::{Block, Expression, Num, TypeName, VariableDeclaration};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    Function(FunctionDeclaration),
    Extern(FunctionDeclaration),
    Struct(StructDeclaration),
    Enum(EnumDeclaration),
    Error(ErrorDeclaration),
    Impl(ImplDeclaration),
    MethodBlock(MethodBlock),
    TestBlock(TestBlock),
    Global(VariableDeclaration),
}

impl Declaration {
    pub fn position(&self) -> Span {
        match self {
            Declaration::Function(decl) | Declaration::Extern(decl) => decl.position.clone(),
            Declaration::Struct(decl) => decl.position.clone(),
            Declaration::Enum(decl) => decl.position.clone(),
            Declaration::Error(decl) => decl.position.clone(),
            Declaration::Impl(decl) => decl.position.clone(),
            Declaration::MethodBlock(decl) => decl.position.clone(),
            Declaration::TestBlock(decl) => decl.position.clone(),
            Declaration::Global(decl) => decl.position.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Parameter>,
    pub return_type: TypeName,
    /// `None` declares an external function; `Some` defines one (an extern
    /// declaration with a body is exported).
    pub body: Option<Block>,
    pub is_extern: bool,
    pub is_varargs: bool,
    pub position: Span,
}

impl FunctionDeclaration {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: TypeName,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDeclaration {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<StructFieldDeclaration>,
    pub methods: Vec<FunctionDeclaration>,
    pub position: Span,
}

impl StructDeclaration {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&StructFieldDeclaration> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructFieldDeclaration {
    pub name: String,
    pub type_name: TypeName,
    pub position: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDeclaration {
    pub name: String,
    pub underlying_type: Option<TypeName>,
    pub variants: Vec<EnumVariant>,
    pub position: Span,
}

impl EnumDeclaration {
    /// Discriminants in declaration order: explicit values are kept, an
    /// unspecified value is previous + 1, counting from zero.
    pub fn discriminants(&self) -> Vec<(String, i64)> {
        let mut next = 0;
        self.variants
            .iter()
            .map(|variant| {
                let value = variant.value.unwrap_or(next);
                next = value + 1;
                (variant.name.clone(), value)
            })
            .collect()
    }

    pub fn discriminant_of(&self, variant_name: &str) -> Option<i64> {
        self.discriminants()
            .into_iter()
            .find(|(name, _)| name == variant_name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    pub value: Option<i64>,
    pub position: Span,
}

/// `error Name;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDeclaration {
    pub name: String,
    pub position: Span,
}

/// `StructName : InterfaceName { methods }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplDeclaration {
    pub struct_name: String,
    pub interface_name: String,
    pub methods: Vec<FunctionDeclaration>,
    pub position: Span,
}

/// `StructName { methods }` — an external method block for a struct declared
/// elsewhere. At most one per struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodBlock {
    pub struct_name: String,
    pub methods: Vec<FunctionDeclaration>,
    pub position: Span,
}

/// `test "description" { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBlock {
    pub name: String,
    pub body: Block,
    pub position: Span,
}

/// Top-level owner of a compilation unit's AST. All other nodes are owned
/// transitively through `declarations`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

impl Program {
    pub fn find_struct(&self, name: &str) -> Option<&StructDeclaration> {
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::Struct(s) if s.name == name => Some(s),
            _ => None,
        })
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDeclaration> {
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::Enum(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::Function(f) | Declaration::Extern(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn find_error(&self, name: &str) -> Option<&ErrorDeclaration> {
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::Error(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn method_block_for(&self, struct_name: &str) -> Option<&MethodBlock> {
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::MethodBlock(block) if block.struct_name == struct_name => Some(block),
            _ => None,
        })
    }

    pub fn impl_blocks_for(&self, struct_name: &str) -> Vec<&ImplDeclaration> {
        self.declarations
            .iter()
            .filter_map(|decl| match decl {
                Declaration::Impl(block) if block.struct_name == struct_name => Some(block),
                _ => None,
            })
            .collect()
    }

    /// Method lookup order: inline struct methods, the struct's external
    /// method block, then any impl blocks.
    pub fn find_method(&self, struct_name: &str, method: &str) -> Option<&FunctionDeclaration> {
        if let Some(decl) = self.find_struct(struct_name) {
            if let Some(m) = decl.methods.iter().find(|m| m.name == method) {
                return Some(m);
            }
        }
        if let Some(block) = self.method_block_for(struct_name) {
            if let Some(m) = block.methods.iter().find(|m| m.name == method) {
                return Some(m);
            }
        }
        for block in self.impl_blocks_for(struct_name) {
            if let Some(m) = block.methods.iter().find(|m| m.name == method) {
                return Some(m);
            }
        }
        None
    }

    /// Value of a top-level integer constant, used to resolve named array
    /// sizes. Follows one level of constant-to-constant reference.
    pub fn constant_value(&self, name: &str) -> Option<i64> {
        self.constant_value_inner(name, 0)
    }

    fn constant_value_inner(&self, name: &str, depth: usize) -> Option<i64> {
        if depth > 8 {
            return None;
        }
        self.declarations.iter().find_map(|decl| match decl {
            Declaration::Global(var) if var.name == name => match &var.init {
                Some(Expression::Num(Num::Integer(value, _))) => Some(*value),
                Some(Expression::Id(id)) => self.constant_value_inner(&id.name, depth + 1),
                _ => None,
            },
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;

    fn variant(name: &str, value: Option<i64>) -> EnumVariant {
        EnumVariant {
            name: name.into(),
            value,
            position: Span::default(),
        }
    }

    #[test]
    fn test_implicit_discriminants_count_from_zero() {
        let decl = EnumDeclaration {
            name: "Color".into(),
            underlying_type: None,
            variants: vec![variant("Red", None), variant("Green", None), variant("Blue", None)],
            position: Span::default(),
        };

        assert_eq!(
            decl.discriminants(),
            vec![
                ("Red".to_string(), 0),
                ("Green".to_string(), 1),
                ("Blue".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_mixed_discriminants_resume_after_explicit() {
        let decl = EnumDeclaration {
            name: "Status".into(),
            underlying_type: None,
            variants: vec![
                variant("Ok", None),
                variant("NotFound", Some(404)),
                variant("Next", None),
            ],
            position: Span::default(),
        };

        assert_eq!(
            decl.discriminants(),
            vec![
                ("Ok".to_string(), 0),
                ("NotFound".to_string(), 404),
                ("Next".to_string(), 405)
            ]
        );
    }
}
