//! Vehicle & ownership repository implementation

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, CustomerId, EntityKind, Ownership, OwnershipId, Page, Result, UserId,
    Vehicle, VehicleFilter, VehicleId, VehicleRepository, VehicleStatus, VehicleType,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of VehicleRepository
pub struct PgVehicleRepository {
    pool: PgPool,
}

const COLUMNS: &str = "v.id, v.tenant_id, v.registration_plate, v.chassis_number, \
     v.engine_number, v.vehicle_type, v.usage_category, v.status, \
     v.created_at, v.updated_at, v.deleted_at";

const OWNERSHIP_COLUMNS: &str =
    "o.id, o.tenant_id, o.vehicle_id, o.customer_id, o.from_ts, o.to_ts, o.created_at";

impl PgVehicleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn map_row(row: &PgRow) -> Result<Vehicle> {
        let vehicle_type: String = row.get("vehicle_type");
        let status: String = row.get("status");
        Ok(Vehicle {
            id: VehicleId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            registration_plate: row.get("registration_plate"),
            chassis_number: row.get("chassis_number"),
            engine_number: row.get("engine_number"),
            vehicle_type: VehicleType::parse_str(&vehicle_type),
            usage_category: row.get("usage_category"),
            status: parse_enum(&status, VehicleStatus::parse_str, "vehicles.status")?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn map_ownership(row: &PgRow) -> Ownership {
        Ownership {
            id: OwnershipId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            vehicle_id: VehicleId::from_uuid(row.get("vehicle_id")),
            customer_id: CustomerId::from_uuid(row.get("customer_id")),
            from_ts: row.get("from_ts"),
            to_ts: row.get("to_ts"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl VehicleRepository for PgVehicleRepository {
    #[instrument(skip(self, scope, vehicle))]
    async fn save_new(
        &self,
        scope: &ActiveTenant,
        vehicle: &Vehicle,
        actor: UserId,
    ) -> Result<Vehicle> {
        let mut stored = vehicle.clone();
        stored.tenant_id = scope.id();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO vehicles
                (id, tenant_id, registration_plate, chassis_number, engine_number,
                 vehicle_type, usage_category, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(&stored.registration_plate)
        .bind(&stored.chassis_number)
        .bind(&stored.engine_number)
        .bind(stored.vehicle_type.as_str())
        .bind(&stored.usage_category)
        .bind(stored.status.as_str())
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_vehicles_plate_per_tenant") => BimaError::validation(
                "registration_plate",
                "a vehicle with this plate already exists",
            ),
            _ => db_err(e),
        })?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Vehicle,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: &ActiveTenant, id: VehicleId) -> Result<Vehicle> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM vehicles v
             WHERE v.id = $1 AND v.tenant_id = $2 AND v.deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("vehicle", id)),
        }
    }

    #[instrument(skip(self, scope))]
    async fn find_by_plate(&self, scope: &ActiveTenant, plate: &str) -> Result<Option<Vehicle>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM vehicles v
             WHERE v.registration_plate = $1 AND v.tenant_id = $2 AND v.deleted_at IS NULL"
        ))
        .bind(plate)
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    #[instrument(skip(self, scope, filter))]
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &VehicleFilter,
        page: Page,
    ) -> Result<Vec<Vehicle>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM vehicles v WHERE v.tenant_id = "
        ));
        builder.push_bind(*scope.id().as_uuid());
        builder.push(" AND v.deleted_at IS NULL");

        if let Some(status) = filter.status {
            builder.push(" AND v.status = ").push_bind(status.as_str());
        }
        if let Some(vehicle_type) = &filter.vehicle_type {
            builder
                .push(" AND v.vehicle_type = ")
                .push_bind(vehicle_type.as_str().to_string());
        }
        if let Some(plate) = &filter.plate_query {
            builder
                .push(" AND v.registration_plate ILIKE ")
                .push_bind(format!("%{plate}%"));
        }
        if let Some(owner) = filter.owner {
            builder.push(
                " AND EXISTS (SELECT 1 FROM ownerships o \
                 WHERE o.vehicle_id = v.id AND o.to_ts IS NULL AND o.customer_id = ",
            );
            builder.push_bind(*owner.as_uuid());
            builder.push(")");
        }

        builder.push(" ORDER BY v.registration_plate LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, scope, vehicle))]
    async fn update(
        &self,
        scope: &ActiveTenant,
        vehicle: &Vehicle,
        actor: UserId,
    ) -> Result<Vehicle> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM vehicles v
             WHERE v.id = $1 AND v.tenant_id = $2 AND v.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(vehicle.id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("vehicle", vehicle.id))?;
        let before = Self::map_row(&before)?;

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE vehicles
            SET registration_plate = $1, chassis_number = $2, engine_number = $3,
                vehicle_type = $4, usage_category = $5, status = $6, updated_at = $7
            WHERE id = $8 AND tenant_id = $9
            "#,
        )
        .bind(&vehicle.registration_plate)
        .bind(&vehicle.chassis_number)
        .bind(&vehicle.engine_number)
        .bind(vehicle.vehicle_type.as_str())
        .bind(&vehicle.usage_category)
        .bind(vehicle.status.as_str())
        .bind(updated_at)
        .bind(vehicle.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_vehicles_plate_per_tenant") => BimaError::validation(
                "registration_plate",
                "a vehicle with this plate already exists",
            ),
            _ => db_err(e),
        })?;

        let mut updated = vehicle.clone();
        updated.tenant_id = scope.id();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::Vehicle,
                *vehicle.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self, scope))]
    async fn soft_delete(&self, scope: &ActiveTenant, id: VehicleId, actor: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM vehicles v
             WHERE v.id = $1 AND v.tenant_id = $2 AND v.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("vehicle", id))?;
        let before = Self::map_row(&before)?;

        sqlx::query(
            "UPDATE vehicles SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND tenant_id = $3",
        )
        .bind(Utc::now())
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::soft_deleted(
                actor,
                EntityKind::Vehicle,
                *id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, scope))]
    async fn current_ownership(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Option<Ownership>> {
        let row = sqlx::query(&format!(
            "SELECT {OWNERSHIP_COLUMNS} FROM ownerships o
             WHERE o.vehicle_id = $1 AND o.tenant_id = $2 AND o.to_ts IS NULL"
        ))
        .bind(vehicle_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::map_ownership))
    }

    #[instrument(skip(self, scope))]
    async fn ownership_history(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Vec<Ownership>> {
        let rows = sqlx::query(&format!(
            "SELECT {OWNERSHIP_COLUMNS} FROM ownerships o
             WHERE o.vehicle_id = $1 AND o.tenant_id = $2
             ORDER BY o.from_ts DESC"
        ))
        .bind(vehicle_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(Self::map_ownership).collect())
    }

    #[instrument(skip(self, scope))]
    async fn transfer_ownership(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
        new_owner: CustomerId,
        actor: UserId,
    ) -> Result<Ownership> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Both ends of the transfer must live in this tenant
        let vehicle_exists = sqlx::query(
            "SELECT 1 FROM vehicles WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(vehicle_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if vehicle_exists.is_none() {
            return Err(BimaError::not_found("vehicle", vehicle_id));
        }

        let customer_exists = sqlx::query(
            "SELECT 1 FROM customers WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(new_owner.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if customer_exists.is_none() {
            return Err(BimaError::not_found("customer", new_owner));
        }

        let now = Utc::now();

        let previous = sqlx::query(&format!(
            "SELECT {OWNERSHIP_COLUMNS} FROM ownerships o
             WHERE o.vehicle_id = $1 AND o.tenant_id = $2 AND o.to_ts IS NULL FOR UPDATE"
        ))
        .bind(vehicle_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(previous) = &previous {
            let mut closed = Self::map_ownership(previous);
            sqlx::query("UPDATE ownerships SET to_ts = $1 WHERE id = $2")
                .bind(now)
                .bind(closed.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

            let before = serde_json::to_value(&closed).unwrap_or_default();
            closed.to_ts = Some(now);
            recorder::record(
                &mut tx,
                scope.id(),
                Change::updated(
                    actor,
                    EntityKind::Ownership,
                    *closed.id.as_uuid(),
                    before,
                    serde_json::to_value(&closed).unwrap_or_default(),
                ),
            )
            .await?;
        }

        let ownership = Ownership {
            id: OwnershipId::new(),
            tenant_id: scope.id(),
            vehicle_id,
            customer_id: new_owner,
            from_ts: now,
            to_ts: None,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO ownerships (id, tenant_id, vehicle_id, customer_id, from_ts, to_ts, created_at)
            VALUES ($1, $2, $3, $4, $5, NULL, $6)
            "#,
        )
        .bind(ownership.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(vehicle_id.as_uuid())
        .bind(new_owner.as_uuid())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Ownership,
                *ownership.id.as_uuid(),
                serde_json::to_value(&ownership).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(ownership)
    }
}
