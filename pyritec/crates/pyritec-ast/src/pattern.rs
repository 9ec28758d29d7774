//! Pattern definitions.

use crate::{Ident, Literal, NodeId};
use pyritec_util::Span;

/// A pattern in a match arm or destructuring let
#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: NodeId,
    pub span: Span,
    pub kind: PatternKind,
}

/// Pattern kinds
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// `_`
    Wildcard,
    /// A fresh binding
    Binding { name: Ident, mutable: bool },
    /// Literal pattern
    Literal(Literal),
    /// Tuple destructuring
    Tuple(Vec<Pattern>),
    /// Struct destructuring `Point { x, y }`
    Struct {
        name: Ident,
        fields: Vec<(Ident, Pattern)>,
    },
    /// Enum variant pattern `Shape.Circle(r)`
    EnumVariant {
        enum_name: Ident,
        variant: Ident,
        fields: Vec<Pattern>,
    },
}

impl Pattern {
    /// Collect every binding the pattern introduces, in source order
    pub fn bindings(&self) -> Vec<Ident> {
        let mut out = Vec::new();
        self.collect_bindings(&mut out);
        out
    }

    fn collect_bindings(&self, out: &mut Vec<Ident>) {
        match &self.kind {
            PatternKind::Wildcard | PatternKind::Literal(_) => {}
            PatternKind::Binding { name, .. } => out.push(*name),
            PatternKind::Tuple(pats) => {
                for p in pats {
                    p.collect_bindings(out);
                }
            }
            PatternKind::Struct { fields, .. } => {
                for (_, p) in fields {
                    p.collect_bindings(out);
                }
            }
            PatternKind::EnumVariant { fields, .. } => {
                for p in fields {
                    p.collect_bindings(out);
                }
            }
        }
    }
}
