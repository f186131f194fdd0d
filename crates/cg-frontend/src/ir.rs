//! The AST shape the core consumes (§6 "frontend interface"): every query
//! the core needs, materialized up front instead of walked lazily, so the
//! core never borrows into a concrete parser's tree.

use cg_core::DeclId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub begin: u32,
    pub end: u32,
    /// Set when this location is inside a macro expansion: the spelling
    /// offset of the macro argument token, used to disambiguate call
    /// sites that share an expansion location (§3 "CallSite").
    pub macro_arg_spelling: Option<u32>,
}

impl SourceLoc {
    pub fn loc_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.begin.hash(&mut hasher);
        self.end.hash(&mut hasher);
        hasher.finish()
    }

    pub fn macro_arg_hash(&self) -> Option<u64> {
        self.macro_arg_spelling.map(|offset| {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            offset.hash(&mut hasher);
            hasher.finish()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Method,
    Constructor,
    Destructor,
    Variable,
    Field,
    Param,
    Typedef,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub id: DeclId,
    pub kind: DeclKind,
    /// All mangled-name spellings for this decl; constructors/destructors
    /// produce more than one (complete/base/deleting object variants).
    pub mangled_names: Vec<String>,
    pub params: Vec<DeclId>,
    pub variadic: bool,
    pub body: Vec<Expr>,
    /// Methods this one `override`s (by mangled name of the base method).
    pub overrides: Vec<String>,
    pub parent_record: Option<String>,
    pub implicit: bool,
    pub template_dependent: bool,
    pub origin_file: String,
    pub from_system_include: bool,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Call,
    Construct,
    New,
    Delete,
    This,
    Member,
    DeclRef,
    UnaryOp,
    BinaryOp,
    Subscript,
    MaterializeTemp,
    BindTemp,
    DefaultInit,
    DefaultArg,
}

#[derive(Debug, Clone, Default)]
pub struct Expr {
    pub kind_slot: Option<ExprKind>,
    pub sub_exprs: Vec<Expr>,
    pub operator: Option<String>,
    /// For `Member`: the field's name. For `DeclRef`/direct `Call`: the
    /// referenced/called decl's mangled name, when resolvable at this
    /// syntactic level (a tree-sitter frontend cannot always resolve
    /// overload sets or cross-TU decls; `None` means "resolve via the
    /// object-name/equivalence machinery instead").
    pub member_field: Option<String>,
    pub referenced_decl: Option<String>,
    pub called_decl: Option<String>,
    pub loc: SourceLoc,
}

impl Expr {
    pub fn kind(&self) -> ExprKind {
        self.kind_slot.expect("Expr constructed without a kind")
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub path: String,
    pub decls: Vec<Decl>,
}
