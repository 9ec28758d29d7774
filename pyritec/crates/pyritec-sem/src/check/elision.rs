//! Lifetime elision for function signatures.
//!
//! One rule, matching the language reference: when a signature has exactly
//! one reference-typed input and a reference return type, the input's
//! lifetime propagates to the return, materialized as the symbolic label
//! `'a`. With zero or several reference inputs nothing is elided; the return
//! keeps its declared label or stays unlabeled, and an actual escape
//! surfaces later in borrow checking rather than at the signature.

use crate::ty::{TyId, TyKind, TyPool};
use pyritec_util::Symbol;

/// Apply the elision rule to a lowered signature
///
/// Returns the possibly relabeled `(params, ret)`.
pub fn apply_elision(pool: &mut TyPool, params: Vec<TyId>, ret: TyId) -> (Vec<TyId>, TyId) {
    let ref_params: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(pool.kind(**p), TyKind::Ref { .. }))
        .map(|(i, _)| i)
        .collect();

    let ret_is_unlabeled_ref = matches!(
        pool.kind(ret),
        TyKind::Ref { lifetime: None, .. }
    );

    if ref_params.len() != 1 || !ret_is_unlabeled_ref {
        return (params, ret);
    }

    let label = Symbol::intern("a");
    let mut params = params;
    let idx = ref_params[0];
    params[idx] = relabel(pool, params[idx], label);
    let ret = relabel(pool, ret, label);
    (params, ret)
}

fn relabel(pool: &mut TyPool, ty: TyId, label: Symbol) -> TyId {
    match pool.kind(ty).clone() {
        TyKind::Ref {
            inner,
            mutable,
            lifetime: None,
        } => pool.intern(TyKind::Ref {
            inner,
            mutable,
            lifetime: Some(label),
        }),
        _ => ty,
    }
}
