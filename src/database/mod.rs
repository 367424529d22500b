pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use manager::{ConnectionRegistry, ConnectionState, DatabaseError, TenantConnector, TenantHandle, TenantLease};
pub use store::{DocumentStore, UpdateOutcome};
