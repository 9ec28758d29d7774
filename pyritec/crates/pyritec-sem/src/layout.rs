//! Memory layout estimation and hover badges.
//!
//! Estimates, per type, how many bytes live on the stack and whether the type
//! owns heap storage or may allocate. The numbers feed the cost analysis and
//! are exported for host tooling (the LSP renders them as hover badges).
//! These are estimates on a 64-bit target, not ABI-authoritative layout.

use crate::symbols::{SymbolKind, SymbolTable};
use crate::ty::{TyId, TyKind, TyPool};
use pyritec_util::symbol::sym;

/// Estimated `(stack bytes, heap bytes)` for a type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryLayout {
    pub stack_bytes: u64,
    pub heap_bytes: u64,
}

/// True if values of the type own heap storage
pub fn is_heap_allocated(ty: TyId, pool: &TyPool, symbols: &SymbolTable) -> bool {
    match pool.kind(ty) {
        TyKind::Str => true,
        // Container instantiations own heap storage; references to them do not
        TyKind::Generic { base, .. } => {
            let name = symbols.symbol(*base).name;
            name == sym::LIST || name == sym::MAP || name == sym::SET || name == sym::STRING
        }
        TyKind::Array(elem, _) => is_heap_allocated(*elem, pool, symbols),
        TyKind::Tuple(elems) => elems.iter().any(|e| is_heap_allocated(*e, pool, symbols)),
        TyKind::Adt(def) => match &symbols.symbol(*def).kind {
            SymbolKind::Struct(s) => s
                .fields
                .values()
                .any(|f| is_heap_allocated(*f, pool, symbols)),
            _ => false,
        },
        _ => false,
    }
}

/// True if operations on the type may allocate (growable containers, strings)
pub fn may_allocate(ty: TyId, pool: &TyPool, symbols: &SymbolTable) -> bool {
    match pool.kind(ty) {
        TyKind::Str => true,
        TyKind::Generic { base, .. } => {
            let name = symbols.symbol(*base).name;
            name == sym::LIST || name == sym::MAP || name == sym::SET || name == sym::STRING
        }
        _ => false,
    }
}

/// Estimate the layout of a type
pub fn layout_of(ty: TyId, pool: &TyPool, symbols: &SymbolTable) -> MemoryLayout {
    match pool.kind(ty) {
        TyKind::Error | TyKind::Void | TyKind::None | TyKind::Var(_) => MemoryLayout::default(),
        TyKind::Bool => MemoryLayout {
            stack_bytes: 1,
            heap_bytes: 0,
        },
        // Unicode code point
        TyKind::Char => MemoryLayout {
            stack_bytes: 4,
            heap_bytes: 0,
        },
        TyKind::Int(int) => MemoryLayout {
            stack_bytes: (int.bits() / 8) as u64,
            heap_bytes: 0,
        },
        TyKind::Float(f) => MemoryLayout {
            stack_bytes: match f {
                crate::ty::FloatTy::F32 => 4,
                crate::ty::FloatTy::F64 => 8,
            },
            heap_bytes: 0,
        },
        // { ptr, len } handle; the payload size varies at runtime
        TyKind::Str | TyKind::Slice(_) => MemoryLayout {
            stack_bytes: 16,
            heap_bytes: 0,
        },
        TyKind::Ref { .. } | TyKind::Ptr { .. } | TyKind::Fn { .. } => MemoryLayout {
            stack_bytes: 8,
            heap_bytes: 0,
        },
        TyKind::Array(elem, n) => {
            let count = match n {
                crate::ty::ConstValue::Int(v) => (*v).max(0) as u64,
                _ => 0,
            };
            let elem_layout = layout_of(*elem, pool, symbols);
            MemoryLayout {
                stack_bytes: elem_layout.stack_bytes * count,
                heap_bytes: elem_layout.heap_bytes * count,
            }
        }
        TyKind::Tuple(elems) => {
            let mut layout = MemoryLayout::default();
            for e in elems {
                let el = layout_of(*e, pool, symbols);
                layout.stack_bytes += el.stack_bytes;
                layout.heap_bytes += el.heap_bytes;
            }
            layout
        }
        TyKind::Adt(def) | TyKind::Opaque(def) => match &symbols.symbol(*def).kind {
            SymbolKind::Struct(s) => {
                let mut layout = MemoryLayout::default();
                for &field_ty in s.fields.values() {
                    let fl = layout_of(field_ty, pool, symbols);
                    layout.stack_bytes += fl.stack_bytes;
                    layout.heap_bytes += fl.heap_bytes;
                }
                layout
            }
            SymbolKind::Enum(e) => {
                // Tag plus the widest variant payload
                let mut widest = 0u64;
                for fields in e.variants.values().flatten() {
                    let payload: u64 = fields
                        .iter()
                        .map(|f| layout_of(*f, pool, symbols).stack_bytes)
                        .sum();
                    widest = widest.max(payload);
                }
                MemoryLayout {
                    stack_bytes: 8 + widest,
                    heap_bytes: 0,
                }
            }
            // Opaque handles are pointer-sized
            _ => MemoryLayout {
                stack_bytes: 8,
                heap_bytes: 0,
            },
        },
        // Container handle: { ptr, len, cap } plus a default payload estimate
        TyKind::Generic { base, .. } => {
            let name = symbols.symbol(*base).name;
            if name == sym::LIST || name == sym::SET {
                MemoryLayout {
                    stack_bytes: 24,
                    heap_bytes: 24,
                }
            } else if name == sym::MAP {
                MemoryLayout {
                    stack_bytes: 24,
                    heap_bytes: 64,
                }
            } else {
                MemoryLayout {
                    stack_bytes: 8,
                    heap_bytes: 0,
                }
            }
        }
        TyKind::Param(_) | TyKind::SelfType | TyKind::Assoc { .. } => MemoryLayout {
            stack_bytes: 8,
            heap_bytes: 0,
        },
    }
}

/// Hover badges for a type: `[Stack]`/`[Heap]`, `[Copy]`/`[Move]`, `[MayAlloc]`
pub fn type_badges(ty: TyId, pool: &TyPool, symbols: &SymbolTable) -> Vec<&'static str> {
    let mut badges = Vec::new();
    if is_heap_allocated(ty, pool, symbols) {
        badges.push("[Heap]");
    } else {
        badges.push("[Stack]");
    }
    if pool.is_copy(ty, symbols) {
        badges.push("[Copy]");
    } else {
        badges.push("[Move]");
    }
    if may_allocate(ty, pool, symbols) {
        badges.push("[MayAlloc]");
    }
    badges
}
