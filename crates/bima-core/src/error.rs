//! Error types for the Bima platform
//!
//! The variants mirror the stable error kinds of the compliance domain:
//! guard failures in the lifecycle engine surface as domain errors and the
//! HTTP layer maps them onto status codes. Infrastructure failures are kept
//! separate so callers can distinguish retriable conditions.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BimaError {
    /// Repository operation attempted without an active tenant, or tenant
    /// resolution failed (suspended tenant, super admin without an explicit
    /// tenant choice).
    #[error("No active tenant bound to this operation: {message}")]
    TenantUnbound { message: String },

    /// Role-based authorization failure.
    #[error("Forbidden: {operation}")]
    Forbidden { operation: String },

    /// Entity does not exist or is outside the active tenant. Cross-tenant
    /// lookups deliberately collapse into this variant so that record ids
    /// cannot be enumerated across tenants.
    #[error("Not found: {entity_kind} {id}")]
    NotFound { entity_kind: String, id: String },

    /// Input violates schema, range or format rules.
    #[error("Validation failed on {field}: {detail}")]
    Validation { field: String, detail: String },

    /// Edit attempted on an active, cancelled or expired record.
    #[error("Record is immutable in its current state")]
    Immutable,

    /// Activation would produce a second active policy for the vehicle, or a
    /// second active permit of the same type.
    #[error("Activation conflicts with an existing active record")]
    Overlap,

    /// Activation attempted on a policy whose verified payments do not cover
    /// the premium.
    #[error("Policy is not fully paid: {paid} of {required}")]
    PaymentIncomplete { paid: String, required: String },

    /// Requested state change is not allowed from the current state.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Actor account is locked after repeated failed logins.
    #[error("Account locked until {until}")]
    Locked { until: String },

    /// Concurrent modification detected.
    #[error("Conflicting concurrent modification")]
    Conflict,

    /// Authentication failure (bad credentials, expired session).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Database-level failure; retriable by the caller or the next
    /// reconciler cycle.
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BimaError {
    pub fn tenant_unbound(message: impl Into<String>) -> Self {
        Self::TenantUnbound {
            message: message.into(),
        }
    }

    pub fn forbidden(operation: impl Into<String>) -> Self {
        Self::Forbidden {
            operation: operation.into(),
        }
    }

    pub fn not_found(entity_kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity_kind: entity_kind.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for failures that a retry (or the next reconciler cycle) may
    /// resolve without operator intervention.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, BimaError>;
