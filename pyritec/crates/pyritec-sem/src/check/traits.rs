//! Trait resolution: method lookup, bounds, associated types.
//!
//! Method lookup on `x.m(...)` with `x: T`:
//!
//! 1. Search `T`'s inherent impls.
//! 2. Otherwise search every trait implemented for `T`; exactly one trait
//!    supplying `m` wins, more than one is an ambiguity error suggesting
//!    `<T as U>::m` qualification.
//!
//! Auto-referencing is one step: a method expecting `&self` on a by-value
//! receiver synthesizes a shared borrow; `&mut self` likewise where an
//! exclusive borrow is legal. Deref is also one step: a `&T` receiver can
//! call `T`'s methods.
//!
//! Associated types project through the impl's bindings and substitute
//! before any signature comparison.

use crate::symbols::{DefId, ImplId, SymbolKind, SymbolTable};
use crate::ty::{TyId, TyKind, TyPool};
use pyritec_util::{FxHashMap, Symbol};

/// Outcome of method lookup
#[derive(Debug)]
pub enum MethodLookup {
    /// Found in an inherent impl
    Inherent { fn_def: DefId, impl_id: ImplId },
    /// Found through exactly one trait impl
    FromTrait {
        fn_def: DefId,
        impl_id: ImplId,
        trait_def: DefId,
    },
    /// Supplied by more than one trait; needs explicit qualification
    Ambiguous { traits: Vec<DefId> },
    /// No impl supplies the method
    NotFound,
}

/// The nominal base definition behind a receiver type, derefing one step
pub fn receiver_base(pool: &TyPool, ty: TyId) -> Option<DefId> {
    match pool.kind(ty) {
        TyKind::Adt(def) | TyKind::Opaque(def) | TyKind::Generic { base: def, .. } => Some(*def),
        TyKind::Ref { inner, .. } => match pool.kind(*inner) {
            TyKind::Adt(def) | TyKind::Opaque(def) | TyKind::Generic { base: def, .. } => {
                Some(*def)
            }
            _ => None,
        },
        _ => None,
    }
}

/// Look a method up on a receiver type
pub fn lookup_method(
    symbols: &SymbolTable,
    pool: &TyPool,
    receiver: TyId,
    name: Symbol,
) -> MethodLookup {
    let Some(base) = receiver_base(pool, receiver) else {
        return MethodLookup::NotFound;
    };

    // Inherent impls first
    for &impl_id in symbols.impls_for(base) {
        let imp = &symbols.impls[impl_id];
        if imp.trait_def.is_none() {
            if let Some(&fn_def) = imp.methods.get(&name) {
                return MethodLookup::Inherent { fn_def, impl_id };
            }
        }
    }

    // Then trait impls; ambiguity across traits is an error
    let mut hits: Vec<(DefId, ImplId, DefId)> = Vec::new();
    for &impl_id in symbols.impls_for(base) {
        let imp = &symbols.impls[impl_id];
        if let Some(trait_def) = imp.trait_def {
            if let Some(&fn_def) = imp.methods.get(&name) {
                hits.push((fn_def, impl_id, trait_def));
            }
        }
    }
    match hits.len() {
        0 => MethodLookup::NotFound,
        1 => {
            let (fn_def, impl_id, trait_def) = hits[0];
            MethodLookup::FromTrait {
                fn_def,
                impl_id,
                trait_def,
            }
        }
        _ => MethodLookup::Ambiguous {
            traits: hits.into_iter().map(|(_, _, t)| t).collect(),
        },
    }
}

/// True if the type satisfies `ty: trait_def`
///
/// Nominal types satisfy a trait through a linked impl; generic parameters
/// through their declared bounds.
pub fn type_implements(symbols: &SymbolTable, pool: &TyPool, ty: TyId, trait_def: DefId) -> bool {
    match pool.kind(ty) {
        TyKind::Error | TyKind::Var(_) => true,
        TyKind::Param(def) => match &symbols.symbol(*def).kind {
            SymbolKind::TypeParam { bounds } => bounds.contains(&trait_def),
            _ => false,
        },
        TyKind::Adt(base) | TyKind::Opaque(base) | TyKind::Generic { base, .. } => symbols
            .impls_for(*base)
            .iter()
            .any(|&impl_id| symbols.impls[impl_id].trait_def == Some(trait_def)),
        _ => false,
    }
}

/// Resolve `Trait::Name` against a concrete self type
pub fn resolve_assoc(
    symbols: &SymbolTable,
    pool: &TyPool,
    self_ty: TyId,
    trait_def: DefId,
    name: Symbol,
) -> Option<TyId> {
    let base = receiver_base(pool, self_ty)?;
    for &impl_id in symbols.impls_for(base) {
        let imp = &symbols.impls[impl_id];
        if imp.trait_def == Some(trait_def) {
            if let Some(&bound) = imp.assoc_bindings.get(&name) {
                return Some(bound);
            }
        }
    }
    None
}

/// Substitute `Self`, generic parameters, and associated-type projections
///
/// `self_ty` replaces `SelfType`; `param_map` replaces `Param` occurrences;
/// `Assoc` projections resolve through `self_ty`'s impls when possible.
pub fn substitute(
    pool: &mut TyPool,
    symbols: &SymbolTable,
    ty: TyId,
    self_ty: Option<TyId>,
    param_map: &FxHashMap<DefId, TyId>,
) -> TyId {
    match pool.kind(ty).clone() {
        TyKind::SelfType => self_ty.unwrap_or(ty),
        TyKind::Param(def) => param_map.get(&def).copied().unwrap_or(ty),
        TyKind::Assoc { trait_def, name } => match self_ty
            .and_then(|st| resolve_assoc(symbols, pool, st, trait_def, name))
        {
            Some(resolved) => resolved,
            None => ty,
        },
        TyKind::Array(elem, n) => {
            let elem = substitute(pool, symbols, elem, self_ty, param_map);
            pool.intern(TyKind::Array(elem, n))
        }
        TyKind::Slice(elem) => {
            let elem = substitute(pool, symbols, elem, self_ty, param_map);
            pool.intern(TyKind::Slice(elem))
        }
        TyKind::Ref {
            inner,
            mutable,
            lifetime,
        } => {
            let inner = substitute(pool, symbols, inner, self_ty, param_map);
            pool.intern(TyKind::Ref {
                inner,
                mutable,
                lifetime,
            })
        }
        TyKind::Ptr { inner, mutable } => {
            let inner = substitute(pool, symbols, inner, self_ty, param_map);
            pool.intern(TyKind::Ptr { inner, mutable })
        }
        TyKind::Tuple(elems) => {
            let elems = elems
                .iter()
                .map(|e| substitute(pool, symbols, *e, self_ty, param_map))
                .collect();
            pool.intern(TyKind::Tuple(elems))
        }
        TyKind::Fn {
            params,
            ret,
            extern_abi,
        } => {
            let params = params
                .iter()
                .map(|p| substitute(pool, symbols, *p, self_ty, param_map))
                .collect();
            let ret = substitute(pool, symbols, ret, self_ty, param_map);
            pool.intern(TyKind::Fn {
                params,
                ret,
                extern_abi,
            })
        }
        TyKind::Generic {
            base,
            ty_args,
            const_args,
        } => {
            let ty_args = ty_args
                .iter()
                .map(|a| substitute(pool, symbols, *a, self_ty, param_map))
                .collect();
            pool.intern(TyKind::Generic {
                base,
                ty_args,
                const_args,
            })
        }
        _ => ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{ImplData, Namespace, StructDef, SymbolData, TraitDef};
    use pyritec_util::{Span, Symbol};

    fn setup() -> (SymbolTable, TyPool, DefId, TyId) {
        let mut symbols = SymbolTable::new();
        let mut pool = TyPool::new();
        let root = symbols.root_scope();
        let data = symbols
            .declare(
                root,
                Namespace::Type,
                SymbolData {
                    name: Symbol::intern("Data"),
                    span: Span::DUMMY,
                    kind: SymbolKind::Struct(StructDef::default()),
                },
            )
            .unwrap();
        let data_ty = pool.intern(TyKind::Adt(data));
        (symbols, pool, data, data_ty)
    }

    fn method_sym(symbols: &mut SymbolTable, name: &str) -> DefId {
        symbols.add_symbol(SymbolData {
            name: Symbol::intern(name),
            span: Span::DUMMY,
            kind: SymbolKind::Function(Default::default()),
        })
    }

    fn trait_sym(symbols: &mut SymbolTable, name: &str) -> DefId {
        let root = symbols.root_scope();
        symbols
            .declare(
                root,
                Namespace::Type,
                SymbolData {
                    name: Symbol::intern(name),
                    span: Span::DUMMY,
                    kind: SymbolKind::Trait(TraitDef::default()),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_inherent_method_wins() {
        let (mut symbols, pool, data, data_ty) = setup();
        let m = Symbol::intern("get");
        let inherent_fn = method_sym(&mut symbols, "get");
        let trait_fn = method_sym(&mut symbols, "get");
        let tr = trait_sym(&mut symbols, "Getter");

        let mut inherent = FxHashMap::default();
        inherent.insert(m, inherent_fn);
        symbols.add_impl(ImplData {
            target: data,
            self_ty: None,
            trait_def: None,
            methods: inherent,
            assoc_bindings: FxHashMap::default(),
            span: Span::DUMMY,
        });
        let mut from_trait = FxHashMap::default();
        from_trait.insert(m, trait_fn);
        symbols.add_impl(ImplData {
            target: data,
            self_ty: None,
            trait_def: Some(tr),
            methods: from_trait,
            assoc_bindings: FxHashMap::default(),
            span: Span::DUMMY,
        });

        match lookup_method(&symbols, &pool, data_ty, m) {
            MethodLookup::Inherent { fn_def, .. } => assert_eq!(fn_def, inherent_fn),
            other => panic!("expected inherent method, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_across_traits() {
        let (mut symbols, pool, data, data_ty) = setup();
        let m = Symbol::intern("next");
        for trait_name in ["Iterator", "Cursor"] {
            let tr = trait_sym(&mut symbols, trait_name);
            let f = method_sym(&mut symbols, "next");
            let mut methods = FxHashMap::default();
            methods.insert(m, f);
            symbols.add_impl(ImplData {
                target: data,
                self_ty: None,
                trait_def: Some(tr),
                methods,
                assoc_bindings: FxHashMap::default(),
                span: Span::DUMMY,
            });
        }

        match lookup_method(&symbols, &pool, data_ty, m) {
            MethodLookup::Ambiguous { traits } => assert_eq!(traits.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_through_reference_receiver() {
        let (mut symbols, mut pool, data, data_ty) = setup();
        let m = Symbol::intern("len");
        let f = method_sym(&mut symbols, "len");
        let mut methods = FxHashMap::default();
        methods.insert(m, f);
        symbols.add_impl(ImplData {
            target: data,
            self_ty: None,
            trait_def: None,
            methods,
            assoc_bindings: FxHashMap::default(),
            span: Span::DUMMY,
        });

        let recv = pool.mk_ref(data_ty, false);
        assert!(matches!(
            lookup_method(&symbols, &pool, recv, m),
            MethodLookup::Inherent { .. }
        ));
    }

    #[test]
    fn test_type_implements_through_impl_and_bound() {
        let (mut symbols, mut pool, data, data_ty) = setup();
        let tr = trait_sym(&mut symbols, "Closeable");
        symbols.add_impl(ImplData {
            target: data,
            self_ty: None,
            trait_def: Some(tr),
            methods: FxHashMap::default(),
            assoc_bindings: FxHashMap::default(),
            span: Span::DUMMY,
        });
        assert!(type_implements(&symbols, &pool, data_ty, tr));
        assert!(!type_implements(&symbols, &pool, pool.common.i32_, tr));

        // Generic parameter with the bound
        let param = symbols.add_symbol(SymbolData {
            name: Symbol::intern("T"),
            span: Span::DUMMY,
            kind: SymbolKind::TypeParam { bounds: vec![tr] },
        });
        let param_ty = pool.intern(TyKind::Param(param));
        assert!(type_implements(&symbols, &pool, param_ty, tr));
    }

    #[test]
    fn test_assoc_projection_resolves_through_impl() {
        let (mut symbols, mut pool, data, data_ty) = setup();
        let tr = trait_sym(&mut symbols, "Iterator");
        let item = Symbol::intern("Item");
        let mut bindings = FxHashMap::default();
        bindings.insert(item, pool.common.i64_);
        symbols.add_impl(ImplData {
            target: data,
            self_ty: None,
            trait_def: Some(tr),
            methods: FxHashMap::default(),
            assoc_bindings: bindings,
            span: Span::DUMMY,
        });

        assert_eq!(
            resolve_assoc(&symbols, &pool, data_ty, tr, item),
            Some(pool.common.i64_)
        );

        // Substitution rewrites the projection inside a composite
        let proj = pool.intern(TyKind::Assoc {
            trait_def: tr,
            name: item,
        });
        let slice = pool.intern(TyKind::Slice(proj));
        let out = substitute(&mut pool, &symbols, slice, Some(data_ty), &FxHashMap::default());
        assert_eq!(pool.kind(out), &TyKind::Slice(pool.common.i64_));
    }

    #[test]
    fn test_substitute_self_and_params() {
        let (mut symbols, mut pool, _, data_ty) = setup();
        let t_param = symbols.add_symbol(SymbolData {
            name: Symbol::intern("T"),
            span: Span::DUMMY,
            kind: SymbolKind::TypeParam { bounds: vec![] },
        });
        let param_ty = pool.intern(TyKind::Param(t_param));
        let self_ty = pool.intern(TyKind::SelfType);
        let tuple = pool.intern(TyKind::Tuple(vec![self_ty, param_ty]));

        let mut map = FxHashMap::default();
        map.insert(t_param, pool.common.bool_);
        let out = substitute(&mut pool, &symbols, tuple, Some(data_ty), &map);
        assert_eq!(pool.kind(out), &TyKind::Tuple(vec![data_ty, pool.common.bool_]));
    }
}
