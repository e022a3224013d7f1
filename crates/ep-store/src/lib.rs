//! Persistence Layer (C4): connection pool, versioned migrations,
//! transaction helper, and one repository module per entity.

pub mod error;
pub mod migrations;
pub mod repo;
mod store;

pub use error::StoreError;
pub use store::StoreHandle;
