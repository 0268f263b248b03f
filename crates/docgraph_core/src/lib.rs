//! Reference-graph cascade consistency engine.
//!
//! Authors own documents; documents cite each other. Deleting an author
//! removes every reference edge among the documents transitively affected by
//! that deletion, in one all-or-nothing unit, driven by messages carried
//! over a durable queue.

pub mod cascade;
pub mod config;
pub mod db;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod repo;
pub mod service;

pub use cascade::{
    collect_affected, prune_edges_within, CascadeCoordinator, CascadeError, CascadeErrorKind,
    CascadeReport, PruneJournal,
};
pub use config::{AppConfig, ConfigError, LoggingConfig, MessagingConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LoggingError,
};
pub use messaging::{
    AuthorSnapshot, CascadeConsumer, CascadeProducer, ConsumerWorker, DeliveryOutcome,
    MessageChannel, MessageId, MessagingError, RetryDecision, SqliteMessageQueue, Topic,
};
pub use model::author::{Author, AuthorId, AuthorValidationError};
pub use model::document::{Document, DocumentDraft, DocumentId, DocumentValidationError};
pub use repo::cascade_store::SqliteCascadeStore;
pub use repo::memory_repo::MemoryStore;
pub use repo::query::{AuthorListQuery, DocumentListQuery, Page, SortDirection};
pub use repo::{AuthorStore, CascadeStore, DocumentStore, RepoError, RepoResult, TransactionMode};
pub use service::{AuthorService, DocumentService, ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
