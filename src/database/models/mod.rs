pub mod schema;

pub use schema::{SchemaDescriptor, SchemaRow};
