//! PostgreSQL persistence for the authorization credential vault.
//!
//! Grounded on `cyxcloud-metadata::postgres::Database`: a `PgPool` wrapped
//! in a cheaply-`Clone`able handle, `sqlx::query_as::<_, T>(...).bind(...)`
//! throughout, `#[instrument]` on every mutating method.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{
    AuditEventRow, AuthorizationFilter, AuthorizationRow, InboundEventRow, NewAuthorization,
    SearchPage, TenantRow, WebhookDeliveryRow, WebhookSubscriptionRow,
};

/// Database connection configuration, grounded on `cyxcloud-metadata::postgres::DbConfig`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/vault".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/vault".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await?;

        info!("connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Wraps an already-connected, already-migrated pool — used by
    /// integration tests built on `#[sqlx::test]`, which hands out a
    /// fresh per-test database and pool rather than a `DbConfig` url.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ===================== tenants =====================

    #[instrument(skip(self))]
    pub async fn get_tenant(&self, id: Uuid) -> Result<Option<TenantRow>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn upsert_tenant(&self, id: Uuid, name: &str) -> Result<TenantRow> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            INSERT INTO tenants (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // ===================== authorizations =====================

    #[instrument(skip(self, new))]
    pub async fn create_authorization(&self, new: NewAuthorization) -> Result<AuthorizationRow> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            INSERT INTO authorizations (
                id, tenant_id, protocol, issuer, subject, scope, amount_limit_minor,
                currency, expires_at, status, raw_payload, delegated_token_id,
                verification_status, verification_reason, verification_details,
                verified_at, retention_days, created_by
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.tenant_id)
        .bind(new.protocol)
        .bind(new.issuer)
        .bind(new.subject)
        .bind(new.scope)
        .bind(new.amount_limit_minor)
        .bind(new.currency)
        .bind(new.expires_at)
        .bind(new.status)
        .bind(new.raw_payload)
        .bind(new.delegated_token_id)
        .bind(new.verification_status)
        .bind(new.verification_reason)
        .bind(new.verification_details)
        .bind(new.verified_at)
        .bind(new.retention_days)
        .bind(new.created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn get_authorization(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        include_soft_deleted: bool,
    ) -> Result<Option<AuthorizationRow>> {
        let sql = if include_soft_deleted {
            "SELECT * FROM authorizations WHERE tenant_id = $1 AND id = $2"
        } else {
            "SELECT * FROM authorizations WHERE tenant_id = $1 AND id = $2 AND soft_delete_at IS NULL"
        };
        let row = sqlx::query_as::<_, AuthorizationRow>(sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Administrator variant: no tenant scoping, per `spec.md` §4.5
    /// "unless caller is an administrator".
    #[instrument(skip(self))]
    pub async fn get_authorization_any_tenant(
        &self,
        id: Uuid,
        include_soft_deleted: bool,
    ) -> Result<Option<AuthorizationRow>> {
        let sql = if include_soft_deleted {
            "SELECT * FROM authorizations WHERE id = $1"
        } else {
            "SELECT * FROM authorizations WHERE id = $1 AND soft_delete_at IS NULL"
        };
        let row = sqlx::query_as::<_, AuthorizationRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Resolves an authorization by the delegated-token `token_id`
    /// carried in its credential, per `spec.md` §4.9 step 4. Used by
    /// the inbound receiver, which has no tenant scope to work with
    /// (the external sender's payload carries no bearer claims), so it
    /// is administrator-scoped like `get_authorization_any_tenant`.
    #[instrument(skip(self))]
    pub async fn get_authorization_by_token_id(
        &self,
        token_id: &str,
        include_soft_deleted: bool,
    ) -> Result<Option<AuthorizationRow>> {
        let sql = if include_soft_deleted {
            "SELECT * FROM authorizations WHERE delegated_token_id = $1"
        } else {
            "SELECT * FROM authorizations WHERE delegated_token_id = $1 AND soft_delete_at IS NULL"
        };
        let row = sqlx::query_as::<_, AuthorizationRow>(sql)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self, filter))]
    pub async fn search_authorizations(
        &self,
        tenant_id: Option<Uuid>,
        filter: &AuthorizationFilter,
    ) -> Result<SearchPage<AuthorizationRow>> {
        if filter.limit > 1000 {
            return Err(StoreError::LimitTooLarge(filter.limit));
        }

        let mut where_sql = QueryBuilder::new("WHERE 1 = 1");
        if let Some(tenant_id) = tenant_id {
            where_sql.push(" AND tenant_id = ").push_bind(tenant_id);
        }
        if !filter.include_soft_deleted {
            where_sql.push(" AND soft_delete_at IS NULL");
        }
        if let Some(p) = &filter.protocol {
            where_sql.push(" AND protocol = ").push_bind(p.clone());
        }
        if let Some(i) = &filter.issuer {
            where_sql.push(" AND issuer = ").push_bind(i.clone());
        }
        if let Some(s) = &filter.subject {
            where_sql.push(" AND subject = ").push_bind(s.clone());
        }
        if let Some(s) = &filter.status {
            where_sql.push(" AND status = ").push_bind(s.clone());
        }
        if let Some(t) = filter.expires_before {
            where_sql.push(" AND expires_at < ").push_bind(t);
        }
        if let Some(t) = filter.expires_after {
            where_sql.push(" AND expires_at > ").push_bind(t);
        }
        if let Some(t) = filter.created_after {
            where_sql.push(" AND created_at > ").push_bind(t);
        }
        if let Some(v) = filter.min_amount_minor {
            where_sql.push(" AND amount_limit_minor >= ").push_bind(v);
        }
        if let Some(v) = filter.max_amount_minor {
            where_sql.push(" AND amount_limit_minor <= ").push_bind(v);
        }
        if let Some(c) = &filter.currency {
            where_sql.push(" AND currency = ").push_bind(c.clone());
        }
        if let Some(m) = &filter.scope_merchant {
            where_sql
                .push(" AND scope #>> '{constraints,merchant}' = ")
                .push_bind(m.clone());
        }
        if let Some(c) = &filter.scope_category {
            where_sql
                .push(" AND scope #>> '{constraints,category}' = ")
                .push_bind(c.clone());
        }
        if let Some(i) = &filter.scope_item {
            where_sql
                .push(" AND scope #>> '{constraints,item}' = ")
                .push_bind(i.clone());
        }

        let mut count_query = QueryBuilder::new("SELECT count(*) FROM authorizations ");
        count_query.push(where_sql.sql());
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut select_query = QueryBuilder::new("SELECT * FROM authorizations ");
        select_query.push(where_sql.sql());
        select_query.push(format!(
            " ORDER BY {} {} LIMIT {} OFFSET {}",
            filter.sort_by.column(),
            if filter.sort_desc { "DESC" } else { "ASC" },
            filter.limit,
            filter.offset
        ));

        let items = select_query
            .build_query_as::<AuthorizationRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(SearchPage {
            items,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    #[instrument(skip(self))]
    pub async fn update_verification(
        &self,
        id: Uuid,
        status: &str,
        verification_status: &str,
        verification_reason: Option<&str>,
        verification_details: Value,
        verified_at: DateTime<Utc>,
    ) -> Result<AuthorizationRow> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            UPDATE authorizations
            SET status = $2, verification_status = $3, verification_reason = $4,
                verification_details = $5, verified_at = $6, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(verification_status)
        .bind(verification_reason)
        .bind(verification_details)
        .bind(verified_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn revoke_authorization(
        &self,
        id: Uuid,
        reason: Option<&str>,
        revoked_at: DateTime<Utc>,
    ) -> Result<AuthorizationRow> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            UPDATE authorizations
            SET status = 'REVOKED', revoked_at = $2, revoked_reason = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(revoked_at)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn soft_delete_authorization(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<AuthorizationRow> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            UPDATE authorizations
            SET soft_delete_at = $2, status = 'DELETED', updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn restore_authorization(&self, id: Uuid) -> Result<AuthorizationRow> {
        let row = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            UPDATE authorizations
            SET soft_delete_at = NULL, status = 'VALID', updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn list_purgeable(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuthorizationRow>> {
        let rows = sqlx::query_as::<_, AuthorizationRow>(
            r#"
            SELECT * FROM authorizations
            WHERE soft_delete_at IS NOT NULL
              AND soft_delete_at + make_interval(days => retention_days) < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn purge_authorization(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM authorizations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===================== audit events =====================

    #[instrument(skip(self, details))]
    pub async fn log_event(
        &self,
        authorization_id: Option<Uuid>,
        kind: &str,
        details: Value,
    ) -> Result<AuditEventRow> {
        let row = sqlx::query_as::<_, AuditEventRow>(
            r#"
            INSERT INTO audit_events (id, authorization_id, kind, details)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(authorization_id)
        .bind(kind)
        .bind(details)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn list_audit_events(&self, authorization_id: Uuid) -> Result<Vec<AuditEventRow>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE authorization_id = $1 ORDER BY created_at ASC",
        )
        .bind(authorization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ===================== webhook subscriptions =====================

    #[instrument(skip(self))]
    pub async fn create_subscription(
        &self,
        tenant_id: Uuid,
        name: &str,
        target_url: &str,
        events: &[String],
        secret: Option<&str>,
        max_attempts: i32,
        base_delay_seconds: i32,
        timeout_seconds: i32,
    ) -> Result<WebhookSubscriptionRow> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(
            r#"
            INSERT INTO webhook_subscriptions
                (id, tenant_id, name, target_url, events, secret, max_attempts, base_delay_seconds, timeout_seconds)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(name)
        .bind(target_url)
        .bind(events)
        .bind(secret)
        .bind(max_attempts)
        .bind(base_delay_seconds)
        .bind(timeout_seconds)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscriptionRow>> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(
            "SELECT * FROM webhook_subscriptions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn get_subscription_any_tenant(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookSubscriptionRow>> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(
            "SELECT * FROM webhook_subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn list_subscriptions(&self, tenant_id: Uuid) -> Result<Vec<WebhookSubscriptionRow>> {
        let rows = sqlx::query_as::<_, WebhookSubscriptionRow>(
            "SELECT * FROM webhook_subscriptions WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Active subscriptions for `tenant` whose `events` set contains `kind`,
    /// per `spec.md` §4.7 step 1.
    #[instrument(skip(self))]
    pub async fn list_active_subscriptions_for_event(
        &self,
        tenant_id: Uuid,
        event_kind: &str,
    ) -> Result<Vec<WebhookSubscriptionRow>> {
        let rows = sqlx::query_as::<_, WebhookSubscriptionRow>(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND is_active = true AND $2 = ANY(events)
            "#,
        )
        .bind(tenant_id)
        .bind(event_kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM webhook_subscriptions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn set_subscription_active(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> Result<Option<WebhookSubscriptionRow>> {
        let row = sqlx::query_as::<_, WebhookSubscriptionRow>(
            r#"
            UPDATE webhook_subscriptions
            SET is_active = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ===================== webhook deliveries =====================

    #[instrument(skip(self, payload))]
    pub async fn create_delivery(
        &self,
        subscription_id: Uuid,
        authorization_id: Option<Uuid>,
        event_kind: &str,
        payload: Value,
    ) -> Result<WebhookDeliveryRow> {
        let row = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"
            INSERT INTO webhook_deliveries (id, subscription_id, authorization_id, event_kind, payload)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subscription_id)
        .bind(authorization_id)
        .bind(event_kind)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self))]
    pub async fn record_delivery_attempt(
        &self,
        id: Uuid,
        attempts: i32,
        last_status_code: Option<i32>,
        last_response_body: Option<&str>,
        first_failed_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<WebhookDeliveryRow> {
        let row = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"
            UPDATE webhook_deliveries
            SET attempts = $2, last_status_code = $3, last_response_body = $4,
                first_failed_at = COALESCE(first_failed_at, $5), delivered_at = $6,
                next_attempt_at = $7, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(last_status_code)
        .bind(last_response_body)
        .bind(first_failed_at)
        .bind(delivered_at)
        .bind(next_attempt_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deliveries due for retry: `is_delivered = false AND next_attempt_at <= now`,
    /// per `spec.md` §4.8. The `next_attempt_at IS NOT NULL` clause is the
    /// mutual-exclusion mechanism of `spec.md` §5: an emission attempt that
    /// hasn't yet set `next_attempt_at` (still in-flight, or terminally
    /// failed/delivered) is excluded from the worker's query.
    #[instrument(skip(self))]
    pub async fn list_due_deliveries(&self, now: DateTime<Utc>) -> Result<Vec<WebhookDeliveryRow>> {
        let rows = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE delivered_at IS NULL AND next_attempt_at IS NOT NULL AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn clear_next_attempt(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE webhook_deliveries SET next_attempt_at = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn search_deliveries(
        &self,
        subscription_id: Option<Uuid>,
        authorization_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDeliveryRow>> {
        let mut query = QueryBuilder::new("SELECT * FROM webhook_deliveries WHERE 1 = 1");
        if let Some(s) = subscription_id {
            query.push(" AND subscription_id = ").push_bind(s);
        }
        if let Some(a) = authorization_id {
            query.push(" AND authorization_id = ").push_bind(a);
        }
        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query
            .build_query_as::<WebhookDeliveryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // ===================== inbound events =====================

    #[instrument(skip(self))]
    pub async fn inbound_event_exists(&self, event_id: &str) -> Result<bool> {
        let row: Option<InboundEventRow> =
            sqlx::query_as("SELECT * FROM inbound_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    pub async fn record_inbound_event(&self, event_id: &str, kind: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO inbound_events (event_id, kind) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
