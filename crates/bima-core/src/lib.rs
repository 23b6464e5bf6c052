//! Bima Core - Domain model, lifecycle rules and repository contracts for
//! the vehicle compliance platform

pub mod authz;
pub mod compliance;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod models;
pub mod tenant;
pub mod traits;

pub use error::*;
pub use ids::*;
pub use lifecycle::*;
pub use models::*;
pub use tenant::ActiveTenant;
pub use traits::*;
