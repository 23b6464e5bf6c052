//! Bima Engine - lifecycle transitions, compliance computation, payments
//! and the background reconciler
//!
//! Handlers and the worker task talk to this crate; it composes the
//! repositories in `bima-db` under the transaction and guard discipline the
//! domain requires.

pub mod compliance;
pub mod lifecycle;
pub mod notify;
pub mod payments;
pub mod reconciler;

pub use compliance::{ComplianceService, VehicleComplianceSnapshot};
pub use lifecycle::{LifecycleEngine, PermitPatch, PolicyPatch};
pub use notify::NotificationService;
pub use payments::PaymentService;
pub use reconciler::{CycleStats, Reconciler};
