//! Canonical object-name universe (C1).
//!
//! Every participant in the points-to relation gets a byte-identical string
//! identity so that two references to the same memory location always
//! compare equal. The identity is built here; the frontend only supplies
//! raw ingredients (mangled names, location hashes).

use std::fmt;
use std::hash::{Hash, Hasher};

/// A declaration's unique symbol, as handed to us by the frontend. For
/// constructors/destructors the frontend hands back several of these (one
/// per mangled variant); every one of them names the same function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub String);

impl DeclId {
    pub fn new(mangled: impl Into<String>) -> Self {
        DeclId(mangled.into())
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity for any addressable entity.
///
/// Variants after `Decl` compose a parent function identity with a
/// discriminator, mirroring the source AST's scoping: a call site, `this`,
/// a `new`-expression, a materialized temporary, and so on all belong to
/// exactly one enclosing function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectName {
    /// A declaration: function, variable, field, parameter.
    Decl(DeclId),
    /// A call expression, disambiguated by the hash of its source range
    /// (and, for macro-expanded calls, the macro-argument spelling
    /// location — see `CallSiteKey`).
    CallSite {
        parent: Box<ObjectName>,
        key: CallSiteKey,
    },
    /// The implicit `this` of a non-static member function.
    This { parent: Box<ObjectName> },
    /// A `new`-expression, identified by source location.
    New {
        parent: Box<ObjectName>,
        loc_hash: u64,
    },
    /// A materialize-temporary-expression.
    MaterializedTemporary {
        parent: Box<ObjectName>,
        loc_hash: u64,
    },
    /// The symbolic object bound by `return` statements of a function.
    SymbolicReturn { parent: Box<ObjectName> },
    /// An unnamed parameter, identified by its ordinal index.
    UnnamedParam { parent: Box<ObjectName>, index: u32 },
    /// An unnamed field of a struct/class, identified by its ordinal index.
    UnnamedField { parent: Box<ObjectName>, index: u32 },
    /// An unnamed union, identified by source location.
    UnnamedUnion {
        parent: Box<ObjectName>,
        loc_hash: u64,
    },
    /// A member access `base.field` / `base->field` (deref level of the
    /// base is carried by the base's `ObjectRef`, not here).
    Member {
        base: Box<ObjectRef>,
        field: DeclId,
    },
}

/// Disambiguates a call-expression identity. Two calls at the same source
/// offset only happen through macro expansion; the macro-argument spelling
/// location breaks the tie, as the spec's token-paste note requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteKey {
    pub loc_hash: u64,
    pub macro_arg_spelling: Option<u64>,
}

impl ObjectName {
    /// The canonical string identity. Two `ObjectName`s that name the same
    /// memory produce byte-identical strings (the invariant in §3).
    pub fn canonical_id(&self) -> String {
        match self {
            ObjectName::Decl(id) => id.0.clone(),
            ObjectName::CallSite { parent, key } => match key.macro_arg_spelling {
                Some(arg) => format!(
                    "{}@CALL#{:016x}#{:016x}",
                    parent.canonical_id(),
                    key.loc_hash,
                    arg
                ),
                None => format!("{}@CALL#{:016x}", parent.canonical_id(), key.loc_hash),
            },
            ObjectName::This { parent } => format!("{}@THIS", parent.canonical_id()),
            ObjectName::New { parent, loc_hash } => {
                format!("{}@NEW#{:016x}", parent.canonical_id(), loc_hash)
            }
            ObjectName::MaterializedTemporary { parent, loc_hash } => {
                format!("{}@MTE#{:016x}", parent.canonical_id(), loc_hash)
            }
            ObjectName::SymbolicReturn { parent } => {
                format!("{}@SRETURN", parent.canonical_id())
            }
            ObjectName::UnnamedParam { parent, index } => {
                format!("{}@UNNAMED_PARAM#{}", parent.canonical_id(), index)
            }
            ObjectName::UnnamedField { parent, index } => {
                format!("{}@UNNAMED_FIELD#{}", parent.canonical_id(), index)
            }
            ObjectName::UnnamedUnion { parent, loc_hash } => {
                format!("{}@UNNAMED_UNION#{:016x}", parent.canonical_id(), loc_hash)
            }
            ObjectName::Member { base, field } => {
                format!("{}.{}", base.canonical_id(), field.0)
            }
        }
    }

    pub fn parent_fn(&self) -> Option<&ObjectName> {
        match self {
            ObjectName::Decl(_) => None,
            ObjectName::CallSite { parent, .. }
            | ObjectName::This { parent }
            | ObjectName::New { parent, .. }
            | ObjectName::MaterializedTemporary { parent, .. }
            | ObjectName::SymbolicReturn { parent }
            | ObjectName::UnnamedParam { parent, .. }
            | ObjectName::UnnamedField { parent, .. }
            | ObjectName::UnnamedUnion { parent, .. } => Some(parent),
            ObjectName::Member { base, .. } => base.name.parent_fn(),
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_id())
    }
}

/// An object name annotated with a deref level: `0` is the object itself,
/// positive levels are `*`, `**`, …, negative levels are `&`, `&&`, ….
/// The pair `(base, level)` is the hash/equality/ordering key throughout
/// the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub name: ObjectName,
    pub deref_level: i32,
}

impl ObjectRef {
    pub fn new(name: ObjectName, deref_level: i32) -> Self {
        ObjectRef { name, deref_level }
    }

    pub fn object(name: ObjectName) -> Self {
        ObjectRef {
            name,
            deref_level: 0,
        }
    }

    pub fn canonical_id(&self) -> String {
        if self.deref_level == 0 {
            self.name.canonical_id()
        } else {
            format!("{}@L{}", self.name.canonical_id(), self.deref_level)
        }
    }

    /// The object one dereference step closer to the pointee (level + 1),
    /// or one address-of step further from it (level - 1).
    pub fn at_level(&self, deref_level: i32) -> Self {
        ObjectRef {
            name: self.name.clone(),
            deref_level,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_id())
    }
}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.deref_level.hash(state);
    }
}

/// Lex order on base id, then numeric level, per §4.1.
impl PartialOrd for ObjectRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .canonical_id()
            .cmp(&other.name.canonical_id())
            .then(self.deref_level.cmp(&other.deref_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str) -> ObjectName {
        ObjectName::Decl(DeclId::new(name))
    }

    #[test]
    fn canonical_ids_are_deterministic() {
        let a = decl("_Z1fi");
        let b = decl("_Z1fi");
        assert_eq!(a.canonical_id(), b.canonical_id());
    }

    #[test]
    fn this_and_symbolic_return_are_distinct() {
        let parent = decl("_ZN1A3fooEv");
        let this = ObjectName::This {
            parent: Box::new(parent.clone()),
        };
        let ret = ObjectName::SymbolicReturn {
            parent: Box::new(parent),
        };
        assert_ne!(this.canonical_id(), ret.canonical_id());
        assert!(this.canonical_id().ends_with("@THIS"));
        assert!(ret.canonical_id().ends_with("@SRETURN"));
    }

    #[test]
    fn deref_level_changes_the_key() {
        let base = ObjectRef::object(decl("x"));
        let deref = base.at_level(1);
        let addr_of = base.at_level(-1);
        assert_ne!(base.canonical_id(), deref.canonical_id());
        assert_ne!(base.canonical_id(), addr_of.canonical_id());
        assert_ne!(deref.canonical_id(), addr_of.canonical_id());
    }

    #[test]
    fn member_access_includes_base_and_field() {
        let base = ObjectRef::object(decl("a"));
        let member = ObjectName::Member {
            base: Box::new(base),
            field: DeclId::new("f"),
        };
        assert_eq!(member.canonical_id(), "a.f");
    }

    #[test]
    fn ordering_is_by_base_then_level() {
        let x0 = ObjectRef::object(decl("x"));
        let x1 = x0.at_level(1);
        let y0 = ObjectRef::object(decl("y"));
        assert!(x0 < x1);
        assert!(x1 < y0);
    }
}
