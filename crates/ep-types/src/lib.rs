//! Shared domain types for the mail control plane: persisted entities, trace
//! DTOs, search criteria and runtime configuration. Kept dependency-light so
//! every other crate in the workspace can depend on it without pulling in
//! an async runtime or a store driver.

pub mod config;
pub mod model;
pub mod recipients;
pub mod search;
pub mod trace;

pub use model::*;
pub use recipients::{marshal_recipients, unmarshal_recipients, RecipientListError};
pub use search::*;
pub use trace::*;
