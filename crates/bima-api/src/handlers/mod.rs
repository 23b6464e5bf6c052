//! API handlers
//!
//! Thin layer: parse and validate input, resolve the actor and the active
//! tenant, call the engine or repositories, map domain errors to HTTP.

pub mod audit;
pub mod auth;
pub mod customers;
pub mod dynamic_fields;
pub mod health;
pub mod notifications;
pub mod permits;
pub mod policies;
pub mod reports;
pub mod tenants;
pub mod users;
pub mod vehicles;

pub use health::{health_check, liveness, readiness};

use std::str::FromStr;

use crate::dto::{bad_request, ErrorResponse};

/// Parse a path/query id, mapping garbage to a 400 instead of a 500.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ErrorResponse>
where
    T: FromStr,
{
    raw.parse()
        .map_err(|_| bad_request(&format!("Invalid {what} id")))
}
