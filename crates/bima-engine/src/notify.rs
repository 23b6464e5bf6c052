//! Notification service
//!
//! Computes recipients from roles and appends rows to the in-app buffer.
//! Nothing is delivered from here; email/SMS adapters drain the buffer
//! outside the core.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{instrument, warn};

use bima_core::{
    ActiveTenant, EntityKind, Notification, NotificationId, NotificationKind,
    NotificationPriority, NotificationRepository, Result, UserRepository, UserRole,
};
use bima_db::repositories::{PgNotificationRepository, PgUserRepository};

pub struct NotificationService {
    users: Arc<PgUserRepository>,
    notifications: Arc<PgNotificationRepository>,
}

impl NotificationService {
    pub fn new(
        users: Arc<PgUserRepository>,
        notifications: Arc<PgNotificationRepository>,
    ) -> Self {
        Self {
            users,
            notifications,
        }
    }

    /// Enqueue one notification per user holding any of the given roles.
    /// Returns the number of rows actually inserted (cycle-keyed rows that
    /// already exist count zero).
    #[instrument(skip(self, scope, payload))]
    pub async fn notify_roles(
        &self,
        scope: &ActiveTenant,
        roles: &[UserRole],
        kind: NotificationKind,
        priority: NotificationPriority,
        title: &str,
        payload: serde_json::Value,
        entity_id: Option<uuid::Uuid>,
        cycle_date: Option<NaiveDate>,
    ) -> Result<u64> {
        let recipients = self.users.list_by_roles(scope, roles).await?;
        let now = Utc::now();
        let rows: Vec<Notification> = recipients
            .iter()
            .map(|user| Notification {
                id: NotificationId::new(),
                tenant_id: scope.id(),
                user_id: user.id,
                kind,
                priority,
                title: title.to_string(),
                payload: payload.clone(),
                entity_id,
                cycle_date,
                created_at: now,
                read_at: None,
            })
            .collect();

        self.notifications.enqueue(scope, &rows).await
    }

    /// Cancellation notice to admins and managers. Failures are logged, not
    /// propagated: the transition has already committed.
    pub async fn notify_cancellation(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        title: &str,
    ) {
        let payload = serde_json::json!({ "entity_kind": entity_kind.as_str() });
        if let Err(e) = self
            .notify_roles(
                scope,
                &[UserRole::Admin, UserRole::Manager],
                NotificationKind::Cancellation,
                NotificationPriority::High,
                title,
                payload,
                Some(entity_id),
                None,
            )
            .await
        {
            warn!(error = %e, "Failed to enqueue cancellation notification");
        }
    }

    /// Expiry reminder keyed on the cycle date so a re-run of the same
    /// sweep enqueues nothing new.
    pub async fn notify_expiry(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        label: &str,
        end_date: NaiveDate,
        cycle_date: NaiveDate,
    ) -> Result<u64> {
        let payload = serde_json::json!({
            "entity_kind": entity_kind.as_str(),
            "end_date": end_date,
        });
        self.notify_roles(
            scope,
            &[UserRole::Admin, UserRole::Manager],
            NotificationKind::ExpiryReminder,
            NotificationPriority::Medium,
            &format!("{label} expires on {end_date}"),
            payload,
            Some(entity_id),
            Some(cycle_date),
        )
        .await
    }
}
