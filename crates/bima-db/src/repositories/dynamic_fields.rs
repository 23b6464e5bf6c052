//! Dynamic field repository implementation
//!
//! Values live one row per (definition, entity) with one typed column per
//! data type, so tenant-defined fields stay indexable and filterable.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, DynamicFieldRepository, EntityKind, FieldDataType, FieldDefinition,
    FieldDefinitionId, FieldEntityKind, FieldValue, FieldValueData, FieldValueId, Result, UserId,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of DynamicFieldRepository
pub struct PgDynamicFieldRepository {
    pool: PgPool,
}

const DEF_COLUMNS: &str = "id, tenant_id, entity_kind, key, name, data_type, choices, \
     required, display_order, is_active, created_at, updated_at, deleted_at";

const VALUE_COLUMNS: &str = "id, tenant_id, definition_id, entity_kind, entity_id, \
     value_text, value_number, value_date, value_bool, value_choice, created_at, updated_at";

impl PgDynamicFieldRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_definition(row: &PgRow) -> Result<FieldDefinition> {
        let entity_kind: String = row.get("entity_kind");
        let data_type: String = row.get("data_type");
        let choices_json: serde_json::Value = row.get("choices");
        let choices: Vec<String> = serde_json::from_value(choices_json).unwrap_or_default();

        Ok(FieldDefinition {
            id: FieldDefinitionId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            entity_kind: parse_enum(
                &entity_kind,
                FieldEntityKind::parse_str,
                "field_definitions.entity_kind",
            )?,
            key: row.get("key"),
            name: row.get("name"),
            data_type: parse_enum(
                &data_type,
                FieldDataType::parse_str,
                "field_definitions.data_type",
            )?,
            choices,
            required: row.get("required"),
            display_order: row.get("display_order"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn map_value(row: &PgRow) -> Result<FieldValue> {
        let entity_kind: String = row.get("entity_kind");
        let value = if let Some(text) = row.get::<Option<String>, _>("value_text") {
            FieldValueData::Text(text)
        } else if let Some(number) = row.get::<Option<Decimal>, _>("value_number") {
            FieldValueData::Number(number)
        } else if let Some(date) = row.get::<Option<NaiveDate>, _>("value_date") {
            FieldValueData::Date(date)
        } else if let Some(flag) = row.get::<Option<bool>, _>("value_bool") {
            FieldValueData::Boolean(flag)
        } else if let Some(choice) = row.get::<Option<String>, _>("value_choice") {
            FieldValueData::Choice(choice)
        } else {
            return Err(BimaError::database(
                "field_values row has no typed value column set".to_string(),
            ));
        };

        Ok(FieldValue {
            id: FieldValueId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            definition_id: FieldDefinitionId::from_uuid(row.get("definition_id")),
            entity_kind: parse_enum(
                &entity_kind,
                FieldEntityKind::parse_str,
                "field_values.entity_kind",
            )?,
            entity_id: row.get("entity_id"),
            value,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn typed_columns(value: &FieldValueData) -> (Option<String>, Option<Decimal>, Option<NaiveDate>, Option<bool>, Option<String>) {
        match value {
            FieldValueData::Text(v) => (Some(v.clone()), None, None, None, None),
            FieldValueData::Number(v) => (None, Some(*v), None, None, None),
            FieldValueData::Date(v) => (None, None, Some(*v), None, None),
            FieldValueData::Boolean(v) => (None, None, None, Some(*v), None),
            FieldValueData::Choice(v) => (None, None, None, None, Some(v.clone())),
        }
    }
}

#[async_trait]
impl DynamicFieldRepository for PgDynamicFieldRepository {
    #[instrument(skip(self, scope, definition))]
    async fn create_definition(
        &self,
        scope: &ActiveTenant,
        definition: &FieldDefinition,
        actor: UserId,
    ) -> Result<FieldDefinition> {
        let mut stored = definition.clone();
        stored.tenant_id = scope.id();

        let choices_json = serde_json::to_value(&stored.choices)
            .map_err(|e| BimaError::internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO field_definitions
                (id, tenant_id, entity_kind, key, name, data_type, choices,
                 required, display_order, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.entity_kind.as_str())
        .bind(&stored.key)
        .bind(&stored.name)
        .bind(stored.data_type.as_str())
        .bind(&choices_json)
        .bind(stored.required)
        .bind(stored.display_order)
        .bind(stored.is_active)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_field_definitions_key") => BimaError::validation(
                "key",
                "a field with this key already exists for the entity kind",
            ),
            _ => db_err(e),
        })?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::FieldDefinition,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_definition(
        &self,
        scope: &ActiveTenant,
        id: FieldDefinitionId,
    ) -> Result<FieldDefinition> {
        let row = sqlx::query(&format!(
            "SELECT {DEF_COLUMNS} FROM field_definitions
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_definition(&row),
            None => Err(BimaError::not_found("field_definition", id)),
        }
    }

    #[instrument(skip(self, scope))]
    async fn find_definition_by_key(
        &self,
        scope: &ActiveTenant,
        entity_kind: FieldEntityKind,
        key: &str,
    ) -> Result<Option<FieldDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {DEF_COLUMNS} FROM field_definitions
             WHERE tenant_id = $1 AND entity_kind = $2 AND key = $3 AND deleted_at IS NULL"
        ))
        .bind(scope.id().as_uuid())
        .bind(entity_kind.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_definition).transpose()
    }

    #[instrument(skip(self, scope))]
    async fn list_definitions(
        &self,
        scope: &ActiveTenant,
        entity_kind: Option<FieldEntityKind>,
        include_inactive: bool,
    ) -> Result<Vec<FieldDefinition>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {DEF_COLUMNS} FROM field_definitions WHERE tenant_id = "
        ));
        builder.push_bind(*scope.id().as_uuid());
        builder.push(" AND deleted_at IS NULL");
        if let Some(kind) = entity_kind {
            builder.push(" AND entity_kind = ").push_bind(kind.as_str());
        }
        if !include_inactive {
            builder.push(" AND is_active = TRUE");
        }
        builder.push(" ORDER BY entity_kind, display_order, name");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::map_definition).collect()
    }

    #[instrument(skip(self, scope, definition))]
    async fn update_definition(
        &self,
        scope: &ActiveTenant,
        definition: &FieldDefinition,
        actor: UserId,
    ) -> Result<FieldDefinition> {
        let choices_json = serde_json::to_value(&definition.choices)
            .map_err(|e| BimaError::internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {DEF_COLUMNS} FROM field_definitions
             WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(definition.id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("field_definition", definition.id))?;
        let before = Self::map_definition(&before)?;

        // Entity kind, key and data type are fixed after creation; values
        // already stored against them would otherwise change meaning.
        if before.entity_kind != definition.entity_kind
            || before.key != definition.key
            || before.data_type != definition.data_type
        {
            return Err(BimaError::validation(
                "key",
                "entity kind, key and data type cannot change after creation",
            ));
        }

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE field_definitions
            SET name = $1, choices = $2, required = $3, display_order = $4,
                is_active = $5, updated_at = $6
            WHERE id = $7 AND tenant_id = $8
            "#,
        )
        .bind(&definition.name)
        .bind(&choices_json)
        .bind(definition.required)
        .bind(definition.display_order)
        .bind(definition.is_active)
        .bind(updated_at)
        .bind(definition.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = definition.clone();
        updated.tenant_id = scope.id();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::FieldDefinition,
                *definition.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self, scope, value))]
    async fn upsert_value(
        &self,
        scope: &ActiveTenant,
        value: &FieldValue,
        actor: UserId,
    ) -> Result<FieldValue> {
        let mut stored = value.clone();
        stored.tenant_id = scope.id();

        let (text, number, date, boolean, choice) = Self::typed_columns(&stored.value);

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO field_values
                (id, tenant_id, definition_id, entity_kind, entity_id,
                 value_text, value_number, value_date, value_bool, value_choice,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (tenant_id, definition_id, entity_id) DO UPDATE
            SET value_text = EXCLUDED.value_text,
                value_number = EXCLUDED.value_number,
                value_date = EXCLUDED.value_date,
                value_bool = EXCLUDED.value_bool,
                value_choice = EXCLUDED.value_choice,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.definition_id.as_uuid())
        .bind(stored.entity_kind.as_str())
        .bind(stored.entity_id)
        .bind(&text)
        .bind(number)
        .bind(date)
        .bind(boolean)
        .bind(&choice)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::FieldValue,
                stored.entity_id,
                serde_json::Value::Null,
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn values_for_entity(
        &self,
        scope: &ActiveTenant,
        entity_kind: FieldEntityKind,
        entity_id: uuid::Uuid,
    ) -> Result<Vec<FieldValue>> {
        let rows = sqlx::query(&format!(
            "SELECT {VALUE_COLUMNS} FROM field_values
             WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3
             ORDER BY definition_id"
        ))
        .bind(scope.id().as_uuid())
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_value).collect()
    }
}
