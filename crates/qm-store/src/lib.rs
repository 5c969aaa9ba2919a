pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod state;

pub use error::StoreError;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::Repository;
pub use state::{AuditEvent, ReleaseReason};
