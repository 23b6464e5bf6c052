//! Bima DB - PostgreSQL persistence for the vehicle compliance platform
//!
//! This crate is the sole gateway to storage. Repositories compose the
//! tenant predicate into every query on business tables, and every mutation
//! writes its audit entry and history snapshot on the same transaction via
//! [`recorder`].

pub mod pool;
pub mod recorder;
pub mod repositories;

pub use pool::{create_pool, run_migrations, DatabaseConfig};

use bima_core::BimaError;

/// Map a sqlx error onto the domain error, surfacing unique-violation
/// details so callers can translate specific constraints (the single-active
/// indexes map to `Overlap` in the engine).
pub fn db_err(e: sqlx::Error) -> BimaError {
    BimaError::database(e.to_string())
}

/// The constraint name behind a unique violation, if this is one.
pub(crate) fn unique_violation(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            db.constraint().map(|c| c.to_string())
        }
        _ => None,
    }
}
