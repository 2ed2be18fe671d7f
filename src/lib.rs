//! codemux supervises per-language code-intelligence backends, keeps a
//! project-wide symbol index built from their answers, and layers semantic
//! analysis (dependency graphs, pattern detection, insights) on top.
//!
//! [`CodeIntelligence`] is the usual entry point; the supervisor, index and
//! analyzer are also usable on their own.

pub mod analysis;
pub mod backend_registry;
pub mod batch;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod health_monitor;
pub mod incremental;
pub mod index;
pub mod language_detector;
pub mod logging;
pub mod lsp_process;
pub mod metrics;
pub mod pool;
pub mod semantic_cache;
pub mod supervisor;
pub mod symbols;
pub mod transport;

pub use analysis::{AnalysisContext, AnalysisResult, SemanticAnalyzer};
pub use backend_registry::{BackendConfig, BackendRegistry, Capability};
pub use config::Config;
pub use connection::{BackendConnection, ConnectionStatus};
pub use engine::CodeIntelligence;
pub use error::{FileError, Result, SupervisorError};
pub use events::SupervisorEvent;
pub use index::{FileChange, FileChangeType, IndexResult, SymbolIndex, SymbolQuery};
pub use language_detector::{Language, LanguageDetector};
pub use supervisor::BackendSupervisor;
pub use symbols::{Location, Position, Range, SymbolKind, SymbolRecord};
pub use transport::{BackendLauncher, BackendTransport, TransportError};
