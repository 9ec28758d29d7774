//! Semantic types and the interning pool.
//!
//! ============================================================================
//! TYPE REPRESENTATION
//! ============================================================================
//!
//! Types are interned: each structurally distinct [`TyKind`] is stored exactly
//! once in the [`TyPool`] and referred to by a [`TyId`]. Type equality is then
//! an integer comparison, and the invariant
//!
//! ```text
//! type_of(a) = type_of(b)  <=>  id(type_of(a)) = id(type_of(b))
//! ```
//!
//! holds by construction. The pool is append-only within a pipeline run and
//! hands out ids in first-interning order, so identical inputs produce
//! identical id assignments across runs.
//!
//! Generic instantiations carry *both* type arguments and compile-time
//! arguments: `Array[T, 3]` and `Array[T, 4]` intern to different ids.
//! Lifetimes are symbolic labels on reference types; two references share a
//! lifetime exactly when their labels unify.

use crate::symbols::{DefId, SymbolKind, SymbolTable};
use indexmap::IndexSet;
use pyritec_util::{define_idx, Symbol};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

define_idx!(TyId);
define_idx!(TyVid);

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Built-in integer types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntTy {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntTy {
    /// Bit width
    pub fn bits(self) -> u32 {
        match self {
            IntTy::I8 | IntTy::U8 => 8,
            IntTy::I16 | IntTy::U16 => 16,
            IntTy::I32 | IntTy::U32 => 32,
            IntTy::I64 | IntTy::U64 => 64,
        }
    }

    /// True for the signed half of the family
    pub fn is_signed(self) -> bool {
        matches!(self, IntTy::I8 | IntTy::I16 | IntTy::I32 | IntTy::I64)
    }

    /// Source-level name
    pub fn name(self) -> &'static str {
        match self {
            IntTy::I8 => "i8",
            IntTy::I16 => "i16",
            IntTy::I32 => "i32",
            IntTy::I64 => "i64",
            IntTy::U8 => "u8",
            IntTy::U16 => "u16",
            IntTy::U32 => "u32",
            IntTy::U64 => "u64",
        }
    }

    /// Inclusive value range as (min, max)
    pub fn range(self) -> (i128, i128) {
        let bits = self.bits();
        if self.is_signed() {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }
}

/// Built-in float types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatTy {
    F32,
    F64,
}

impl FloatTy {
    pub fn name(self) -> &'static str {
        match self {
            FloatTy::F32 => "f32",
            FloatTy::F64 => "f64",
        }
    }
}

/// A compile-time argument value
///
/// `Param` keeps a compile-time parameter symbolic inside the generic body
/// it belongs to; call sites resolve it to a concrete value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstValue {
    Int(i64),
    Bool(bool),
    Param(DefId),
}

/// A type in the semantic type system
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
    /// Error type, installed on tainted nodes for recovery
    Error,
    /// `void` - no value
    Void,
    /// `none` - the unit of optionals
    None,
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `string` - heap string
    Str,
    /// Fixed-width integer
    Int(IntTy),
    /// Float
    Float(FloatTy),
    /// `[T; N]`; the size may stay symbolic inside a generic body
    Array(TyId, ConstValue),
    /// `[T]`
    Slice(TyId),
    /// `&T` / `&mut T`, optionally labeled with a symbolic lifetime
    Ref {
        inner: TyId,
        mutable: bool,
        lifetime: Option<Symbol>,
    },
    /// `*const T` / `*mut T`
    Ptr { inner: TyId, mutable: bool },
    /// `(A, B, C)`
    Tuple(Vec<TyId>),
    /// `fn(A, B) -> C`, optionally with an extern ABI
    Fn {
        params: Vec<TyId>,
        ret: TyId,
        extern_abi: Option<Symbol>,
    },
    /// Nominal type without arguments (struct, enum, trait object position)
    Adt(DefId),
    /// Instantiated nominal: base plus type and compile-time arguments
    Generic {
        base: DefId,
        ty_args: Vec<TyId>,
        const_args: Vec<ConstValue>,
    },
    /// A generic type parameter in scope
    Param(DefId),
    /// `Self` inside impl/trait blocks
    SelfType,
    /// Associated type projection `Trait::Name`
    Assoc { trait_def: DefId, name: Symbol },
    /// Opaque FFI handle
    Opaque(DefId),
    /// Inference variable
    Var(TyVid),
}

/// The interning pool plus pre-interned common types
pub struct TyPool {
    kinds: FxIndexSet<TyKind>,
    /// Pre-interned common types
    pub common: CommonTypes,
}

/// Ids of the types every stage needs constantly
#[derive(Clone, Copy)]
pub struct CommonTypes {
    pub error: TyId,
    pub void: TyId,
    pub none: TyId,
    pub bool_: TyId,
    pub char_: TyId,
    pub str_: TyId,
    pub i32_: TyId,
    pub i64_: TyId,
    pub f64_: TyId,
}

impl TyPool {
    /// Create a pool with the common types pre-interned
    pub fn new() -> Self {
        let mut kinds = FxIndexSet::default();
        let mut intern = |k: TyKind| TyId(kinds.insert_full(k).0 as u32);
        let common = CommonTypes {
            error: intern(TyKind::Error),
            void: intern(TyKind::Void),
            none: intern(TyKind::None),
            bool_: intern(TyKind::Bool),
            char_: intern(TyKind::Char),
            str_: intern(TyKind::Str),
            i32_: intern(TyKind::Int(IntTy::I32)),
            i64_: intern(TyKind::Int(IntTy::I64)),
            f64_: intern(TyKind::Float(FloatTy::F64)),
        };
        Self { kinds, common }
    }

    /// Intern a kind, returning its stable id
    pub fn intern(&mut self, kind: TyKind) -> TyId {
        TyId(self.kinds.insert_full(kind).0 as u32)
    }

    /// Look up the kind behind an id
    ///
    /// # Panics
    ///
    /// Panics on an id that was never handed out by this pool; that is an
    /// internal invariant violation.
    pub fn kind(&self, id: TyId) -> &TyKind {
        self.kinds
            .get_index(id.0 as usize)
            .expect("TyId not present in the interning pool")
    }

    /// Number of interned types
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True if nothing beyond the common types has been interned
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Convenience: intern an unlabeled reference
    pub fn mk_ref(&mut self, inner: TyId, mutable: bool) -> TyId {
        self.intern(TyKind::Ref {
            inner,
            mutable,
            lifetime: None,
        })
    }

    /// Convenience: intern a function type
    pub fn mk_fn(&mut self, params: Vec<TyId>, ret: TyId) -> TyId {
        self.intern(TyKind::Fn {
            params,
            ret,
            extern_abi: None,
        })
    }

    /// True if values of the type copy rather than move
    ///
    /// Derived from structure: primitives, shared references, raw pointers,
    /// and function values copy; aggregates copy when every component does;
    /// heap types and nominals move, except structs carrying the `copy`
    /// attribute. `Error` and inference variables are treated as copy so a
    /// tainted node never produces cascade move errors.
    pub fn is_copy(&self, id: TyId, symbols: &SymbolTable) -> bool {
        match self.kind(id) {
            TyKind::Error
            | TyKind::Void
            | TyKind::None
            | TyKind::Bool
            | TyKind::Char
            | TyKind::Int(_)
            | TyKind::Float(_)
            | TyKind::Var(_) => true,
            TyKind::Ref { mutable, .. } => !mutable,
            TyKind::Ptr { .. } | TyKind::Fn { .. } => true,
            TyKind::Str | TyKind::Slice(_) => false,
            TyKind::Array(elem, _) => self.is_copy(*elem, symbols),
            TyKind::Tuple(elems) => elems.iter().all(|e| self.is_copy(*e, symbols)),
            TyKind::Adt(def) | TyKind::Generic { base: def, .. } => {
                match &symbols.symbol(*def).kind {
                    SymbolKind::Struct(s) => s.attributes.iter().any(|a| a.eq_str("copy")),
                    _ => false,
                }
            }
            TyKind::Param(_) | TyKind::SelfType | TyKind::Assoc { .. } | TyKind::Opaque(_) => false,
        }
    }

    /// Render a type for diagnostics
    pub fn display(&self, id: TyId, symbols: &SymbolTable) -> String {
        match self.kind(id) {
            TyKind::Error => "{error}".to_owned(),
            TyKind::Void => "void".to_owned(),
            TyKind::None => "none".to_owned(),
            TyKind::Bool => "bool".to_owned(),
            TyKind::Char => "char".to_owned(),
            TyKind::Str => "string".to_owned(),
            TyKind::Int(i) => i.name().to_owned(),
            TyKind::Float(f) => f.name().to_owned(),
            TyKind::Array(elem, n) => {
                let size = match n {
                    ConstValue::Int(v) => v.to_string(),
                    ConstValue::Bool(b) => b.to_string(),
                    ConstValue::Param(def) => symbols.symbol(*def).name.as_str().to_owned(),
                };
                format!("[{}; {}]", self.display(*elem, symbols), size)
            }
            TyKind::Slice(elem) => format!("[{}]", self.display(*elem, symbols)),
            TyKind::Ref {
                inner,
                mutable,
                lifetime,
            } => {
                let label = lifetime.map(|l| format!("'{l} ")).unwrap_or_default();
                let m = if *mutable { "mut " } else { "" };
                format!("&{}{}{}", label, m, self.display(*inner, symbols))
            }
            TyKind::Ptr { inner, mutable } => {
                let m = if *mutable { "mut" } else { "const" };
                format!("*{} {}", m, self.display(*inner, symbols))
            }
            TyKind::Tuple(elems) => {
                let inner: Vec<_> = elems.iter().map(|e| self.display(*e, symbols)).collect();
                format!("({})", inner.join(", "))
            }
            TyKind::Fn { params, ret, .. } => {
                let ps: Vec<_> = params.iter().map(|p| self.display(*p, symbols)).collect();
                format!("fn({}) -> {}", ps.join(", "), self.display(*ret, symbols))
            }
            TyKind::Adt(def) | TyKind::Opaque(def) => symbols.symbol(*def).name.as_str().to_owned(),
            TyKind::Generic {
                base,
                ty_args,
                const_args,
            } => {
                let mut args: Vec<String> =
                    ty_args.iter().map(|a| self.display(*a, symbols)).collect();
                args.extend(const_args.iter().map(|c| match c {
                    ConstValue::Int(n) => n.to_string(),
                    ConstValue::Bool(b) => b.to_string(),
                    ConstValue::Param(def) => symbols.symbol(*def).name.as_str().to_owned(),
                }));
                format!("{}[{}]", symbols.symbol(*base).name, args.join(", "))
            }
            TyKind::Param(def) => symbols.symbol(*def).name.as_str().to_owned(),
            TyKind::SelfType => "Self".to_owned(),
            TyKind::Assoc { trait_def, name } => {
                format!("{}::{}", symbols.symbol(*trait_def).name, name)
            }
            TyKind::Var(vid) => format!("?{}", vid.0),
        }
    }
}

impl Default for TyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_structure() {
        let mut pool = TyPool::new();
        let a = pool.intern(TyKind::Tuple(vec![pool.common.i32_, pool.common.bool_]));
        let b = pool.intern(TyKind::Tuple(vec![pool.common.i32_, pool.common.bool_]));
        assert_eq!(a, b);

        let c = pool.intern(TyKind::Tuple(vec![pool.common.bool_, pool.common.i32_]));
        assert_ne!(a, c);
    }

    #[test]
    fn test_interning_id_kind_roundtrip() {
        let mut pool = TyPool::new();
        let id = pool.intern(TyKind::Array(pool.common.i32_, ConstValue::Int(5)));
        assert_eq!(
            pool.kind(id),
            &TyKind::Array(pool.common.i32_, ConstValue::Int(5))
        );
    }

    #[test]
    fn test_array_sizes_distinguish_types() {
        let mut pool = TyPool::new();
        let a = pool.intern(TyKind::Array(pool.common.i32_, ConstValue::Int(3)));
        let b = pool.intern(TyKind::Array(pool.common.i32_, ConstValue::Int(4)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_const_args_distinguish_generics() {
        let mut pool = TyPool::new();
        let base = crate::symbols::DefId(0);
        let a = pool.intern(TyKind::Generic {
            base,
            ty_args: vec![pool.common.i32_],
            const_args: vec![ConstValue::Int(3)],
        });
        let b = pool.intern(TyKind::Generic {
            base,
            ty_args: vec![pool.common.i32_],
            const_args: vec![ConstValue::Int(4)],
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_common_types_are_interned_once() {
        let mut pool = TyPool::new();
        assert_eq!(pool.intern(TyKind::Bool), pool.common.bool_);
        assert_eq!(pool.intern(TyKind::Int(IntTy::I32)), pool.common.i32_);
    }

    #[test]
    fn test_int_ranges() {
        assert_eq!(IntTy::I8.range(), (-128, 127));
        assert_eq!(IntTy::U8.range(), (0, 255));
        assert_eq!(IntTy::I32.range(), (i32::MIN as i128, i32::MAX as i128));
    }

    #[test]
    fn test_copy_semantics_for_primitives_and_refs() {
        let mut pool = TyPool::new();
        let symbols = SymbolTable::new();
        assert!(pool.is_copy(pool.common.i32_, &symbols));
        assert!(pool.is_copy(pool.common.bool_, &symbols));
        assert!(!pool.is_copy(pool.common.str_, &symbols));

        let shared = pool.mk_ref(pool.common.str_, false);
        let excl = pool.mk_ref(pool.common.str_, true);
        assert!(pool.is_copy(shared, &symbols));
        assert!(!pool.is_copy(excl, &symbols));
    }

    #[test]
    fn test_display() {
        let mut pool = TyPool::new();
        let symbols = SymbolTable::new();
        let r = pool.mk_ref(pool.common.str_, true);
        assert_eq!(pool.display(r, &symbols), "&mut string");

        let arr = pool.intern(TyKind::Array(pool.common.i32_, ConstValue::Int(4)));
        assert_eq!(pool.display(arr, &symbols), "[i32; 4]");
    }
}
