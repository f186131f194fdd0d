use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("failed to set tree-sitter language for {path}: {source}")]
    LanguageSetup {
        path: String,
        #[source]
        source: tree_sitter::LanguageError,
    },

    #[error("tree-sitter failed to produce a parse tree for {path}")]
    ParseFailed { path: String },

    #[error("source is not valid UTF-8: {path}")]
    InvalidUtf8 { path: String },

    /// §7 `FrontendMissingFacility`: the AST source can't answer a query
    /// the core requires (e.g. no mangled name for a decl). Fatal.
    #[error("frontend cannot answer required query '{query}' for {context}")]
    MissingFacility { query: &'static str, context: String },
}

pub type Result<T> = std::result::Result<T, FrontendError>;
