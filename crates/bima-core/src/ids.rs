//! Strongly-typed identifiers for domain entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate strongly-typed ID wrappers around UUIDs
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Platform-level IDs
define_id!(TenantId);
define_id!(UserId);
define_id!(SessionId);

// Fleet aggregates
define_id!(CustomerId);
define_id!(VehicleId);
define_id!(OwnershipId);

// Compliance records
define_id!(PolicyId);
define_id!(PermitId);
define_id!(PaymentId);

// Dynamic fields
define_id!(FieldDefinitionId);
define_id!(FieldValueId);

// Audit trail
define_id!(AuditEntryId);
define_id!(HistoryRecordId);
define_id!(NotificationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_is_unique() {
        let id1 = VehicleId::new();
        let id2 = VehicleId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_display_roundtrip() {
        let id = PolicyId::new();
        let s = id.to_string();
        let parsed: PolicyId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_v7_ids_sort_by_creation() {
        // now_v7 embeds a millisecond timestamp, so ids created in sequence
        // sort in creation order (useful for stable pagination keys)
        let first = AuditEntryId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = AuditEntryId::new();
        assert!(first < second);
    }
}
