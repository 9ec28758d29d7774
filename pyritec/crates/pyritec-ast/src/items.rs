//! Top-level item definitions.

use crate::{Block, Expr, Ident, NodeId, Path, TypeExpr};
use pyritec_util::{Span, Symbol};

/// Top-level item in a translation unit
#[derive(Debug, Clone)]
pub enum Item {
    /// Function definition (including `extern` declarations)
    Fn(FnItem),
    /// Structure definition
    Struct(StructItem),
    /// Enumeration definition
    Enum(EnumItem),
    /// Trait definition
    Trait(TraitItem),
    /// Implementation block
    Impl(ImplItem),
    /// Constant definition
    Const(ConstItem),
    /// Opaque FFI handle type
    Opaque(OpaqueItem),
    /// Module import
    Use(UseItem),
}

impl Item {
    /// The item's source span
    pub fn span(&self) -> Span {
        match self {
            Item::Fn(i) => i.span,
            Item::Struct(i) => i.span,
            Item::Enum(i) => i.span,
            Item::Trait(i) => i.span,
            Item::Impl(i) => i.span,
            Item::Const(i) => i.span,
            Item::Opaque(i) => i.span,
            Item::Use(i) => i.span,
        }
    }

    /// The declared name, if the item introduces one
    pub fn name(&self) -> Option<Ident> {
        match self {
            Item::Fn(i) => Some(i.name),
            Item::Struct(i) => Some(i.name),
            Item::Enum(i) => Some(i.name),
            Item::Trait(i) => Some(i.name),
            Item::Const(i) => Some(i.name),
            Item::Opaque(i) => Some(i.name),
            Item::Impl(_) | Item::Use(_) => None,
        }
    }
}

/// Function item
#[derive(Debug, Clone)]
pub struct FnItem {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    /// Compile-time parameters: const ints/bools and parameter closures
    pub const_params: Vec<ConstParam>,
    /// Explicit receiver for methods inside impl/trait blocks
    pub self_param: Option<SelfKind>,
    pub params: Vec<Param>,
    pub ret_type: Option<TypeExpr>,
    pub where_clause: Vec<WhereBound>,
    /// Absent for `extern` declarations
    pub body: Option<Block>,
    pub is_extern: bool,
    pub extern_abi: Option<Symbol>,
    pub span: Span,
}

/// How a method takes its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfKind {
    /// `self` - by value
    Value,
    /// `&self`
    Ref,
    /// `&mut self`
    RefMut,
}

/// Generic type parameter with optional trait bounds
#[derive(Debug, Clone)]
pub struct GenericParam {
    pub name: Ident,
    pub bounds: Vec<Path>,
}

/// Compile-time parameter: `const N: i64` or a parameter closure `f: fn(i64) -> i64`
#[derive(Debug, Clone)]
pub struct ConstParam {
    pub name: Ident,
    pub ty: TypeExpr,
}

/// A single where bound, `T: Trait1 + Trait2`
#[derive(Debug, Clone)]
pub struct WhereBound {
    pub ty: TypeExpr,
    pub traits: Vec<Path>,
}

/// Function parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub id: NodeId,
    pub name: Ident,
    pub ty: TypeExpr,
    pub mutable: bool,
}

/// Structure item
#[derive(Debug, Clone)]
pub struct StructItem {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub const_params: Vec<ConstParam>,
    /// Declaration order is the layout order
    pub fields: Vec<Field>,
    pub attributes: Vec<Symbol>,
    pub span: Span,
}

/// Field definition
#[derive(Debug, Clone)]
pub struct Field {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Enum item
#[derive(Debug, Clone)]
pub struct EnumItem {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub variants: Vec<Variant>,
    pub span: Span,
}

/// Enum variant; `fields` is `None` for unit variants
#[derive(Debug, Clone)]
pub struct Variant {
    pub name: Ident,
    pub fields: Option<Vec<TypeExpr>>,
    pub span: Span,
}

/// Trait item
#[derive(Debug, Clone)]
pub struct TraitItem {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub where_clause: Vec<WhereBound>,
    /// Required method signatures (bodies are not allowed in traits)
    pub methods: Vec<FnSig>,
    /// Declared associated types: `type Item`
    pub assoc_types: Vec<Ident>,
    pub span: Span,
}

/// Function signature without a body
#[derive(Debug, Clone)]
pub struct FnSig {
    pub name: Ident,
    pub generics: Vec<GenericParam>,
    pub self_param: Option<SelfKind>,
    pub params: Vec<Param>,
    pub ret_type: Option<TypeExpr>,
    pub span: Span,
}

/// Implementation block: `impl Type` or `impl Trait for Type`
#[derive(Debug, Clone)]
pub struct ImplItem {
    pub id: NodeId,
    pub generics: Vec<GenericParam>,
    pub trait_ref: Option<Path>,
    pub self_ty: TypeExpr,
    pub methods: Vec<FnItem>,
    /// Associated type bindings: `type Item = i64`
    pub assoc_types: Vec<AssocTypeBinding>,
    pub span: Span,
}

/// `type Name = Ty` inside an impl
#[derive(Debug, Clone)]
pub struct AssocTypeBinding {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Constant definition
#[derive(Debug, Clone)]
pub struct ConstItem {
    pub id: NodeId,
    pub name: Ident,
    pub ty: TypeExpr,
    pub value: Expr,
    pub span: Span,
}

/// Opaque FFI handle: a nominal type with no known structure
#[derive(Debug, Clone)]
pub struct OpaqueItem {
    pub id: NodeId,
    pub name: Ident,
    pub span: Span,
}

/// Module import: `use std::collections::list`
#[derive(Debug, Clone)]
pub struct UseItem {
    pub id: NodeId,
    pub path: Vec<Symbol>,
    pub span: Span,
}
