//! Project symbol index: a symbol table keyed by `(uri, start, name)` with
//! per-kind and per-file secondary indexes and a membership filter in front
//! of exact-name lookups.

pub mod membership;
pub mod query;
pub mod snapshot;
pub mod symbol_index;

pub use membership::MembershipFilter;
pub use query::{MatchKind, SymbolMatch, SymbolQuery};
pub use snapshot::IndexSnapshot;
pub use symbol_index::{
    FileChange, FileChangeType, IndexResult, IndexStats, SymbolIndex, UpdateResult,
};
