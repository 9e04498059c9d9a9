//! C10 Hybrid Search, C11 Structural Query, and C12 Context Assembler
//! (§4.10–§4.12): everything that reads the persisted graph for search,
//! traversal, and chat-context construction.

pub mod context;
pub mod hybrid;
pub mod structural;
pub mod types;

pub use context::{ContextBlock, assemble_context};
pub use hybrid::{HybridSearchOptions, hybrid_search, semantic_search};
pub use types::{NodeResult, SearchResult, clamp_depth, clamp_limit};
