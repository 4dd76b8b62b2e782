use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::tenant_repository::TenantRepository,
    models::tenant::{LocalSubscriptionUpdate, TenantSubscription},
};

pub(crate) const TENANT_COLUMNS: &str = r#"
    id AS tenant_id,
    email,
    role,
    subscription_plan AS plan,
    subscription_status AS status,
    is_tester,
    stripe_customer_id AS billing_customer_id,
    stripe_subscription_id AS billing_subscription_id,
    current_period_end,
    cancel_at_period_end,
    subscription_version AS version,
    subscription_synced_at AS synced_at,
    created_at,
    updated_at
"#;

pub struct PostgresTenantRepository {
    pub pool: PgPool,
}

impl PostgresTenantRepository {
    async fn find_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        sqlx::query_as::<_, TenantSubscription>(&format!(
            "SELECT {TENANT_COLUMNS} FROM creators WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
    }
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn find_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        sqlx::query_as::<_, TenantSubscription>(&format!(
            "SELECT {TENANT_COLUMNS} FROM creators WHERE id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_tenant_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.find_by("stripe_customer_id", customer_id).await
    }

    async fn find_tenant_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        self.find_by("stripe_subscription_id", subscription_id)
            .await
    }

    async fn ensure_tenant(
        &self,
        tenant_id: Uuid,
        email: Option<&str>,
    ) -> Result<TenantSubscription, sqlx::Error> {
        sqlx::query_as::<_, TenantSubscription>(&format!(
            r#"
            INSERT INTO creators (id, email, subscription_plan, subscription_status)
            VALUES ($1, $2, 'basic', 'active')
            ON CONFLICT (id) DO UPDATE
            SET email = COALESCE(creators.email, EXCLUDED.email)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }

    async fn link_billing_customer(
        &self,
        tenant_id: Uuid,
        customer_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let stored = sqlx::query_scalar::<_, Option<String>>(
            r#"
            UPDATE creators
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                updated_at = now()
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.flatten())
    }

    async fn set_tester(
        &self,
        tenant_id: Uuid,
        is_tester: bool,
    ) -> Result<Option<TenantSubscription>, sqlx::Error> {
        sqlx::query_as::<_, TenantSubscription>(&format!(
            r#"
            UPDATE creators
            SET is_tester = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(is_tester)
        .fetch_optional(&self.pool)
        .await
    }

    async fn apply_local_update(
        &self,
        tenant_id: Uuid,
        expected_version: i64,
        update: &LocalSubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE creators
            SET subscription_status = $3,
                cancel_at_period_end = $4,
                subscription_version = subscription_version + 1,
                updated_at = now()
            WHERE id = $1 AND subscription_version = $2
            "#,
        )
        .bind(tenant_id)
        .bind(expected_version)
        .bind(update.status)
        .bind(update.cancel_at_period_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
