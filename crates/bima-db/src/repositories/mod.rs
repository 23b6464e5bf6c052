//! PostgreSQL repository implementations
//!
//! One file per aggregate. Every query on tenant-scoped tables binds the
//! active tenant id; rows outside the scope are indistinguishable from
//! missing rows (`NotFound`).

mod audit;
mod customer;
mod dynamic_fields;
mod history;
mod notification;
mod payment;
mod permit;
mod policy;
mod reports;
mod session;
mod tenant;
mod user;
mod vehicle;

pub use audit::PgAuditRepository;
pub use customer::PgCustomerRepository;
pub use dynamic_fields::PgDynamicFieldRepository;
pub use history::PgHistoryRepository;
pub use notification::PgNotificationRepository;
pub use payment::PgPaymentRepository;
pub use permit::PgPermitRepository;
pub use policy::PgPolicyRepository;
pub use reports::PgReportRepository;
pub use session::PgSessionRepository;
pub use tenant::PgTenantRepository;
pub use user::PgUserRepository;
pub use vehicle::PgVehicleRepository;

use bima_core::{BimaError, Result};

/// Decode a TEXT enum column, failing loudly on values the code does not
/// know (schema drift, not user input).
pub(crate) fn parse_enum<T>(
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
    column: &str,
) -> Result<T> {
    parse(raw).ok_or_else(|| {
        BimaError::database(format!("unexpected value '{raw}' in column {column}"))
    })
}
