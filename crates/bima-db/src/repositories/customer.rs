//! Customer repository implementation

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, Customer, CustomerFilter, CustomerId, CustomerKind,
    CustomerRepository, EntityKind, FieldValueData, Page, Result, UserId,
};

use crate::db_err;
use crate::recorder::{self, Change};

use super::parse_enum;

/// PostgreSQL implementation of CustomerRepository
pub struct PgCustomerRepository {
    pool: PgPool,
}

const COLUMNS: &str =
    "c.id, c.tenant_id, c.kind, c.display_name, c.contact_email, c.contact_phone, \
     c.created_at, c.updated_at, c.deleted_at";

impl PgCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Customer> {
        let kind: String = row.get("kind");
        Ok(Customer {
            id: CustomerId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            kind: parse_enum(&kind, CustomerKind::parse_str, "customers.kind")?,
            display_name: row.get("display_name"),
            contact_email: row.get("contact_email"),
            contact_phone: row.get("contact_phone"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    #[instrument(skip(self, scope, customer))]
    async fn save_new(
        &self,
        scope: &ActiveTenant,
        customer: &Customer,
        actor: UserId,
    ) -> Result<Customer> {
        let mut stored = customer.clone();
        stored.tenant_id = scope.id();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO customers
                (id, tenant_id, kind, display_name, contact_email, contact_phone,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.kind.as_str())
        .bind(&stored.display_name)
        .bind(&stored.contact_email)
        .bind(&stored.contact_phone)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Customer,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: &ActiveTenant, id: CustomerId) -> Result<Customer> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM customers c
             WHERE c.id = $1 AND c.tenant_id = $2 AND c.deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("customer", id)),
        }
    }

    #[instrument(skip(self, scope, filter))]
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &CustomerFilter,
        page: Page,
    ) -> Result<Vec<Customer>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM customers c WHERE c.tenant_id = "
        ));
        builder.push_bind(*scope.id().as_uuid());
        builder.push(" AND c.deleted_at IS NULL");

        if let Some(kind) = filter.kind {
            builder.push(" AND c.kind = ").push_bind(kind.as_str());
        }
        if let Some(term) = &filter.search {
            let pattern = format!("%{term}%");
            builder.push(" AND (c.display_name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR c.contact_email ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR c.contact_phone ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        if let Some((key, value)) = &filter.field {
            // equality on a typed custom-field column, definition matched by key
            let column = match value {
                FieldValueData::Text(_) => "fv.value_text",
                FieldValueData::Number(_) => "fv.value_number",
                FieldValueData::Date(_) => "fv.value_date",
                FieldValueData::Boolean(_) => "fv.value_bool",
                FieldValueData::Choice(_) => "fv.value_choice",
            };
            builder.push(
                " AND EXISTS (SELECT 1 FROM field_values fv \
                 JOIN field_definitions fd ON fd.id = fv.definition_id \
                 WHERE fv.tenant_id = c.tenant_id \
                   AND fv.entity_kind = 'customer' \
                   AND fv.entity_id = c.id \
                   AND fd.key = ",
            );
            builder.push_bind(key.clone());
            builder.push(format!(" AND {column} = "));
            match value {
                FieldValueData::Text(v) => builder.push_bind(v.clone()),
                FieldValueData::Number(v) => builder.push_bind(*v),
                FieldValueData::Date(v) => builder.push_bind(*v),
                FieldValueData::Boolean(v) => builder.push_bind(*v),
                FieldValueData::Choice(v) => builder.push_bind(v.clone()),
            };
            builder.push(")");
        }

        builder.push(" ORDER BY c.display_name LIMIT ");
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

    #[instrument(skip(self, scope, customer))]
    async fn update(
        &self,
        scope: &ActiveTenant,
        customer: &Customer,
        actor: UserId,
    ) -> Result<Customer> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM customers c
             WHERE c.id = $1 AND c.tenant_id = $2 AND c.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(customer.id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("customer", customer.id))?;
        let before = Self::map_row(&before)?;

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE customers
            SET kind = $1, display_name = $2, contact_email = $3, contact_phone = $4,
                updated_at = $5
            WHERE id = $6 AND tenant_id = $7
            "#,
        )
        .bind(customer.kind.as_str())
        .bind(&customer.display_name)
        .bind(&customer.contact_email)
        .bind(&customer.contact_phone)
        .bind(updated_at)
        .bind(customer.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = customer.clone();
        updated.tenant_id = scope.id();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::Customer,
                *customer.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self, scope))]
    async fn soft_delete(&self, scope: &ActiveTenant, id: CustomerId, actor: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM customers c
             WHERE c.id = $1 AND c.tenant_id = $2 AND c.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("customer", id))?;
        let before = Self::map_row(&before)?;

        sqlx::query(
            "UPDATE customers SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND tenant_id = $3",
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
                EntityKind::Customer,
                *id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
