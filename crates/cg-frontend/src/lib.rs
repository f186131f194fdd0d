//! The frontend boundary: a trait describing everything the core needs to
//! query from a translation-unit AST (§6), plus one concrete adapter over
//! tree-sitter. The core's collector is generic over any `AstVisitor`.

pub mod error;
pub mod ir;
pub mod treesitter;

use std::path::Path;

pub use error::{FrontendError, Result};
pub use ir::{Decl, DeclKind, Expr, ExprKind, SourceLoc, TranslationUnit};
pub use treesitter::TreeSitterCxxFrontend;

/// Any compatible source of a C/C++-shaped AST satisfies this trait; the
/// collector (C4) is written against it, not against tree-sitter directly.
pub trait AstVisitor {
    fn parse(&self, path: &Path, source: &str) -> Result<TranslationUnit>;
}
