//! Graph data model, object-name universe, metadata registry, and JSON
//! container for a whole-program static call graph.

pub mod error;
pub mod graph;
pub mod io;
pub mod metadata;
pub mod model;
pub mod object_name;

pub use error::{CoreError, Result};
pub use graph::{default_registry, Graph, IdScheme};
pub use metadata::{IdRemap, IdentityRemap, MetadataMap, MetadataRegistry, MetadataValue, OpaqueMetadata};
pub use model::{EdgeId, GraphEdge, GraphNode, NodeId};
pub use object_name::{CallSiteKey, DeclId, ObjectName, ObjectRef};
