//! Shared types for the port-call sync core: domain models, the REST status
//! contract, the realtime socket protocol and the error taxonomy.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
