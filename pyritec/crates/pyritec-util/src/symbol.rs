//! Symbol - Global string interning.
//!
//! ============================================================================
//! STRING INTERNING
//! ============================================================================
//!
//! Every name the middle-end touches (bindings, fields, methods, traits,
//! lifetime labels) is interned once and referred to by a 4-byte [`Symbol`].
//! Interning collapses name equality to an integer comparison, which matters
//! because the resolver, the trait solver, and the borrow checker all compare
//! names in hot loops.
//!
//! The table is global and thread-safe (`DashMap` keyed with `ahash`), and
//! interned strings are intentionally leaked to obtain `'static` lifetime:
//! the table lives as long as the process, and interned strings are never
//! removed.
//!
//! Names the pipeline itself compares against (`close`, `Closeable`,
//! `Result`, `Ok`, `Err`, ...) are pre-interned at fixed indices so stage
//! code can use `sym::CLOSE` instead of re-interning.
//!
//! # Examples
//!
//! ```
//! use pyritec_util::symbol::Symbol;
//!
//! let a = Symbol::intern("data");
//! let b = Symbol::intern("data");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "data");
//! ```

use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

/// An interned string
///
/// `Symbol` is an index into the global string table. Comparison and hashing
/// are O(1); retrieval of the underlying string is a map lookup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    index: u32,
}

static_assertions::assert_eq_size!(Symbol, u32);

/// Pre-defined symbols the middle-end compares against
///
/// The order here must match `KNOWN_STRINGS` below.
pub mod sym {
    use super::Symbol;

    /// `self` receiver name
    pub const SELF_LOWER: Symbol = Symbol { index: 0 };
    /// `Self` type name
    pub const SELF_UPPER: Symbol = Symbol { index: 1 };
    /// `close` - the method a `with` initializer's type must provide
    pub const CLOSE: Symbol = Symbol { index: 2 };
    /// `Closeable` - the trait shape backing `with`
    pub const CLOSEABLE: Symbol = Symbol { index: 3 };
    /// `Result` - the enum `try` operates on
    pub const RESULT: Symbol = Symbol { index: 4 };
    /// `Ok` variant
    pub const OK: Symbol = Symbol { index: 5 };
    /// `Err` variant
    pub const ERR: Symbol = Symbol { index: 6 };
    /// `Option`
    pub const OPTION: Symbol = Symbol { index: 7 };
    /// `Some` variant
    pub const SOME: Symbol = Symbol { index: 8 };
    /// `None` variant
    pub const NONE: Symbol = Symbol { index: 9 };
    /// `drop`
    pub const DROP: Symbol = Symbol { index: 10 };
    /// `clone`
    pub const CLONE: Symbol = Symbol { index: 11 };
    /// `new`
    pub const NEW: Symbol = Symbol { index: 12 };
    /// `main`
    pub const MAIN: Symbol = Symbol { index: 13 };
    /// `String` - heap string type name
    pub const STRING: Symbol = Symbol { index: 14 };
    /// `List` - growable array container
    pub const LIST: Symbol = Symbol { index: 15 };
    /// `Map` - hash map container
    pub const MAP: Symbol = Symbol { index: 16 };
    /// `Set` - hash set container
    pub const SET: Symbol = Symbol { index: 17 };
    /// `std` - root of the standard library module path
    pub const STD: Symbol = Symbol { index: 18 };
    /// `Item` - the conventional iterator associated type
    pub const ITEM: Symbol = Symbol { index: 19 };
}

const KNOWN_STRINGS: &[&str] = &[
    "self", "Self", "close", "Closeable", "Result", "Ok", "Err", "Option", "Some", "None",
    "drop", "clone", "new", "main", "String", "List", "Map", "Set", "std", "Item",
];

/// Global string table
///
/// Initialized on first use; known symbols are pre-interned so their indices
/// match the constants in [`sym`].
static STRING_TABLE: LazyLock<StringTable> = LazyLock::new(StringTable::new);

struct StringTable {
    /// string -> index
    map: DashMap<&'static str, u32, RandomState>,
    /// index -> string (reverse lookup for `as_str`)
    strings: DashMap<u32, &'static str, RandomState>,
    /// next index to hand out
    next_index: AtomicU32,
}

impl StringTable {
    fn new() -> Self {
        let table = Self {
            map: DashMap::with_capacity_and_hasher(256, RandomState::new()),
            strings: DashMap::with_capacity_and_hasher(256, RandomState::new()),
            next_index: AtomicU32::new(KNOWN_STRINGS.len() as u32),
        };
        for (index, s) in KNOWN_STRINGS.iter().copied().enumerate() {
            table.map.insert(s, index as u32);
            table.strings.insert(index as u32, s);
        }
        table
    }

    fn intern(&self, string: &str) -> u32 {
        if let Some(existing) = self.map.get(string) {
            return *existing;
        }
        // Leak to get a 'static str; the table lives for the whole process.
        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        match self.map.entry(leaked) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let index = self.next_index.fetch_add(1, Ordering::SeqCst);
                assert!(index != u32::MAX, "symbol table overflow");
                e.insert(index);
                self.strings.insert(index, leaked);
                index
            }
        }
    }

    fn resolve(&self, index: u32) -> &'static str {
        self.strings
            .get(&index)
            .map(|s| *s)
            .unwrap_or("<unknown symbol>")
    }
}

impl Symbol {
    /// Intern a string, returning its symbol
    ///
    /// Interning the same string twice returns the same symbol.
    #[inline]
    pub fn intern(string: &str) -> Symbol {
        Symbol {
            index: STRING_TABLE.intern(string),
        }
    }

    /// Get the interned string
    pub fn as_str(self) -> &'static str {
        STRING_TABLE.resolve(self.index)
    }

    /// Raw table index
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.index
    }

    /// True for pre-interned known symbols
    pub fn is_known(self) -> bool {
        (self.index as usize) < KNOWN_STRINGS.len()
    }

    /// Compare against a plain string without interning it
    pub fn eq_str(self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
