//! Unification engine for type inference.
//!
//! Hindley-Milner style: expressions produce expected/actual type pairs and
//! [`InferCtxt::unify`] solves them against a substitution table. Inference
//! variables carry a literal class so `let x = 5` can stay polymorphic until
//! the end of the enclosing body, then default (`i32` for integer literals,
//! `f64` for float literals).
//!
//! Reference compatibility is one-directional: a shared-borrow expectation
//! accepts an exclusive borrow (`&mut T` where `&T` is wanted), never the
//! reverse. The error type unifies with everything so tainted nodes never
//! cascade.

use crate::ty::{TyId, TyKind, TyPool, TyVid};
use pyritec_util::IndexVec;
use thiserror::Error;

/// What a fresh inference variable is allowed to become
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarClass {
    /// Any type
    General,
    /// Born from an integer literal; defaults to `i32`
    IntLit,
    /// Born from a float literal; defaults to `f64`
    FloatLit,
}

/// Unification failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnifyError {
    /// The two types have incompatible structure
    #[error("type mismatch")]
    Mismatch,
    /// Binding the variable would build an infinite type
    #[error("occurs check failed: infinite type")]
    Occurs,
}

/// The inference context: substitutions plus literal classes
#[derive(Default)]
pub struct InferCtxt {
    substitutions: IndexVec<TyVid, Option<TyId>>,
    classes: IndexVec<TyVid, VarClass>,
}

impl InferCtxt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh inference variable
    pub fn new_var(&mut self, pool: &mut TyPool, class: VarClass) -> TyId {
        let vid = self.substitutions.push(None);
        self.classes.push(class);
        pool.intern(TyKind::Var(vid))
    }

    /// Follow the substitution chain one level at a time
    pub fn shallow_resolve(&self, pool: &TyPool, ty: TyId) -> TyId {
        let mut current = ty;
        loop {
            match pool.kind(current) {
                TyKind::Var(vid) => match self.substitutions.get(*vid).and_then(|s| *s) {
                    Some(next) => current = next,
                    None => return current,
                },
                _ => return current,
            }
        }
    }

    /// Fully resolve a type, rebuilding composites with solved variables
    pub fn resolve(&self, pool: &mut TyPool, ty: TyId) -> TyId {
        let ty = self.shallow_resolve(pool, ty);
        match pool.kind(ty).clone() {
            TyKind::Array(elem, n) => {
                let elem = self.resolve(pool, elem);
                pool.intern(TyKind::Array(elem, n))
            }
            TyKind::Slice(elem) => {
                let elem = self.resolve(pool, elem);
                pool.intern(TyKind::Slice(elem))
            }
            TyKind::Ref {
                inner,
                mutable,
                lifetime,
            } => {
                let inner = self.resolve(pool, inner);
                pool.intern(TyKind::Ref {
                    inner,
                    mutable,
                    lifetime,
                })
            }
            TyKind::Ptr { inner, mutable } => {
                let inner = self.resolve(pool, inner);
                pool.intern(TyKind::Ptr { inner, mutable })
            }
            TyKind::Tuple(elems) => {
                let elems = elems.iter().map(|e| self.resolve(pool, *e)).collect();
                pool.intern(TyKind::Tuple(elems))
            }
            TyKind::Fn {
                params,
                ret,
                extern_abi,
            } => {
                let params = params.iter().map(|p| self.resolve(pool, *p)).collect();
                let ret = self.resolve(pool, ret);
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
                let ty_args = ty_args.iter().map(|a| self.resolve(pool, *a)).collect();
                pool.intern(TyKind::Generic {
                    base,
                    ty_args,
                    const_args,
                })
            }
            _ => ty,
        }
    }

    /// True if the (shallow-resolved) type is still an unsolved variable
    pub fn is_unsolved_var(&self, pool: &TyPool, ty: TyId) -> bool {
        matches!(pool.kind(self.shallow_resolve(pool, ty)), TyKind::Var(_))
    }

    /// Unify expected against actual
    pub fn unify(&mut self, pool: &mut TyPool, expected: TyId, actual: TyId) -> Result<(), UnifyError> {
        let expected = self.shallow_resolve(pool, expected);
        let actual = self.shallow_resolve(pool, actual);
        if expected == actual {
            return Ok(());
        }

        let ek = pool.kind(expected).clone();
        let ak = pool.kind(actual).clone();

        match (&ek, &ak) {
            // Error absorbs everything: tainted nodes never cascade
            (TyKind::Error, _) | (_, TyKind::Error) => Ok(()),

            (TyKind::Var(v), _) => self.bind(pool, *v, actual),
            (_, TyKind::Var(v)) => self.bind(pool, *v, expected),

            (
                TyKind::Ref {
                    inner: ei,
                    mutable: em,
                    lifetime: el,
                },
                TyKind::Ref {
                    inner: ai,
                    mutable: am,
                    lifetime: al,
                },
            ) => {
                // `&mut T` is accepted where `&T` is expected; not the reverse
                if *em && !*am {
                    return Err(UnifyError::Mismatch);
                }
                if let (Some(e), Some(a)) = (el, al) {
                    if e != a {
                        return Err(UnifyError::Mismatch);
                    }
                }
                self.unify(pool, *ei, *ai)
            }

            (TyKind::Ptr { inner: ei, mutable: em }, TyKind::Ptr { inner: ai, mutable: am }) => {
                if em != am {
                    return Err(UnifyError::Mismatch);
                }
                self.unify(pool, *ei, *ai)
            }

            (TyKind::Array(ee, en), TyKind::Array(ae, an)) => {
                if en != an {
                    return Err(UnifyError::Mismatch);
                }
                self.unify(pool, *ee, *ae)
            }

            (TyKind::Slice(ee), TyKind::Slice(ae)) => self.unify(pool, *ee, *ae),

            (TyKind::Tuple(es), TyKind::Tuple(as_)) => {
                if es.len() != as_.len() {
                    return Err(UnifyError::Mismatch);
                }
                for (e, a) in es.iter().zip(as_.iter()) {
                    self.unify(pool, *e, *a)?;
                }
                Ok(())
            }

            (
                TyKind::Fn {
                    params: ep,
                    ret: er,
                    ..
                },
                TyKind::Fn {
                    params: ap,
                    ret: ar,
                    ..
                },
            ) => {
                if ep.len() != ap.len() {
                    return Err(UnifyError::Mismatch);
                }
                self.unify(pool, *er, *ar)?;
                for (e, a) in ep.iter().zip(ap.iter()) {
                    self.unify(pool, *e, *a)?;
                }
                Ok(())
            }

            (
                TyKind::Generic {
                    base: eb,
                    ty_args: et,
                    const_args: ec,
                },
                TyKind::Generic {
                    base: ab,
                    ty_args: at,
                    const_args: ac,
                },
            ) => {
                if eb != ab || et.len() != at.len() || ec != ac {
                    return Err(UnifyError::Mismatch);
                }
                for (e, a) in et.iter().zip(at.iter()) {
                    self.unify(pool, *e, *a)?;
                }
                Ok(())
            }

            // Remaining kinds unify only with themselves, which the id
            // comparison above already covered
            _ => Err(UnifyError::Mismatch),
        }
    }

    /// Bind a variable, preserving literal classes and running the occurs check
    fn bind(&mut self, pool: &TyPool, vid: TyVid, target: TyId) -> Result<(), UnifyError> {
        if let TyKind::Var(w) = pool.kind(target) {
            let w = *w;
            if w == vid {
                return Ok(());
            }
            // Keep the more constrained class alive
            let (vc, wc) = (self.classes[vid], self.classes[w]);
            if vc != VarClass::General && wc == VarClass::General {
                self.classes[w] = vc;
            }
            self.substitutions[vid] = Some(target);
            return Ok(());
        }

        if self.occurs(pool, vid, target) {
            return Err(UnifyError::Occurs);
        }
        match self.classes[vid] {
            VarClass::General => {}
            VarClass::IntLit => {
                if !matches!(pool.kind(target), TyKind::Int(_) | TyKind::Error) {
                    return Err(UnifyError::Mismatch);
                }
            }
            VarClass::FloatLit => {
                if !matches!(pool.kind(target), TyKind::Float(_) | TyKind::Error) {
                    return Err(UnifyError::Mismatch);
                }
            }
        }
        self.substitutions[vid] = Some(target);
        Ok(())
    }

    /// Occurs check, iterative to survive deeply nested types
    fn occurs(&self, pool: &TyPool, vid: TyVid, ty: TyId) -> bool {
        let mut stack = vec![ty];
        while let Some(current) = stack.pop() {
            match pool.kind(current) {
                TyKind::Var(w) => {
                    if *w == vid {
                        return true;
                    }
                    if let Some(Some(next)) = self.substitutions.get(*w) {
                        stack.push(*next);
                    }
                }
                TyKind::Array(elem, _) | TyKind::Slice(elem) => stack.push(*elem),
                TyKind::Ref { inner, .. } | TyKind::Ptr { inner, .. } => stack.push(*inner),
                TyKind::Tuple(elems) => stack.extend(elems.iter().copied()),
                TyKind::Fn { params, ret, .. } => {
                    stack.extend(params.iter().copied());
                    stack.push(*ret);
                }
                TyKind::Generic { ty_args, .. } => stack.extend(ty_args.iter().copied()),
                _ => {}
            }
        }
        false
    }

    /// Default leftover literal variables: integers to `i32`, floats to `f64`
    pub fn default_literals(&mut self, pool: &TyPool) {
        for vid in self.substitutions.indices().collect::<Vec<_>>() {
            if self.substitutions[vid].is_some() {
                continue;
            }
            match self.classes[vid] {
                VarClass::IntLit => self.substitutions[vid] = Some(pool.common.i32_),
                VarClass::FloatLit => self.substitutions[vid] = Some(pool.common.f64_),
                VarClass::General => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_identical_primitives() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let i32_ty = pool.common.i32_;
        let bool_ty = pool.common.bool_;
        assert!(infcx.unify(&mut pool, i32_ty, i32_ty).is_ok());
        assert_eq!(
            infcx.unify(&mut pool, i32_ty, bool_ty),
            Err(UnifyError::Mismatch)
        );
    }

    #[test]
    fn test_var_binds_and_resolves() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let v = infcx.new_var(&mut pool, VarClass::General);
        let str_ty = pool.common.str_;
        infcx.unify(&mut pool, v, str_ty).unwrap();
        assert_eq!(infcx.resolve(&mut pool, v), pool.common.str_);
    }

    #[test]
    fn test_occurs_check_rejects_infinite_type() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let v = infcx.new_var(&mut pool, VarClass::General);
        let tuple = pool.intern(TyKind::Tuple(vec![v, pool.common.bool_]));
        assert_eq!(infcx.unify(&mut pool, v, tuple), Err(UnifyError::Occurs));
    }

    #[test]
    fn test_exclusive_accepted_for_shared_expectation() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let shared = pool.mk_ref(pool.common.str_, false);
        let exclusive = pool.mk_ref(pool.common.str_, true);
        // Expected &T, actual &mut T: fine
        assert!(infcx.unify(&mut pool, shared, exclusive).is_ok());
        // Expected &mut T, actual &T: rejected
        assert_eq!(
            infcx.unify(&mut pool, exclusive, shared),
            Err(UnifyError::Mismatch)
        );
    }

    #[test]
    fn test_lifetime_labels_must_match_when_both_present() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let a = pool.intern(TyKind::Ref {
            inner: pool.common.str_,
            mutable: false,
            lifetime: Some(pyritec_util::Symbol::intern("a")),
        });
        let b = pool.intern(TyKind::Ref {
            inner: pool.common.str_,
            mutable: false,
            lifetime: Some(pyritec_util::Symbol::intern("b")),
        });
        let unlabeled = pool.mk_ref(pool.common.str_, false);
        assert_eq!(infcx.unify(&mut pool, a, b), Err(UnifyError::Mismatch));
        assert!(infcx.unify(&mut pool, a, unlabeled).is_ok());
    }

    #[test]
    fn test_int_literal_defaults_to_i32() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let lit = infcx.new_var(&mut pool, VarClass::IntLit);
        infcx.default_literals(&pool);
        assert_eq!(infcx.resolve(&mut pool, lit), pool.common.i32_);
    }

    #[test]
    fn test_float_literal_defaults_to_f64() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let lit = infcx.new_var(&mut pool, VarClass::FloatLit);
        infcx.default_literals(&pool);
        assert_eq!(infcx.resolve(&mut pool, lit), pool.common.f64_);
    }

    #[test]
    fn test_int_literal_rejects_bool() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let lit = infcx.new_var(&mut pool, VarClass::IntLit);
        let bool_ty = pool.common.bool_;
        assert_eq!(
            infcx.unify(&mut pool, lit, bool_ty),
            Err(UnifyError::Mismatch)
        );
    }

    #[test]
    fn test_int_literal_accepts_i64() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let lit = infcx.new_var(&mut pool, VarClass::IntLit);
        let i64_ty = pool.common.i64_;
        infcx.unify(&mut pool, lit, i64_ty).unwrap();
        assert_eq!(infcx.resolve(&mut pool, lit), pool.common.i64_);
    }

    #[test]
    fn test_error_absorbs_everything() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let error_ty = pool.common.error;
        let bool_ty = pool.common.bool_;
        let str_ty = pool.common.str_;
        assert!(infcx.unify(&mut pool, error_ty, bool_ty).is_ok());
        assert!(infcx.unify(&mut pool, str_ty, error_ty).is_ok());
    }

    #[test]
    fn test_fn_types_unify_structurally() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let f1 = pool.mk_fn(vec![pool.common.i32_], pool.common.bool_);
        let v = infcx.new_var(&mut pool, VarClass::General);
        let f2 = pool.mk_fn(vec![v], pool.common.bool_);
        infcx.unify(&mut pool, f1, f2).unwrap();
        assert_eq!(infcx.resolve(&mut pool, v), pool.common.i32_);
    }

    #[test]
    fn test_class_survives_var_var_binding() {
        let mut pool = TyPool::new();
        let mut infcx = InferCtxt::new();
        let lit = infcx.new_var(&mut pool, VarClass::IntLit);
        let general = infcx.new_var(&mut pool, VarClass::General);
        infcx.unify(&mut pool, lit, general).unwrap();
        infcx.default_literals(&pool);
        assert_eq!(infcx.resolve(&mut pool, general), pool.common.i32_);
    }
}
