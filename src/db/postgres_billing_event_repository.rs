use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    db::billing_event_repository::BillingEventRepository,
    models::billing_event::{
        ApplyOutcome, BillingAuditEntry, BillingEventWrite, SubscriptionMutation,
    },
};

pub struct PostgresBillingEventRepository {
    pub pool: PgPool,
}

async fn event_exists(conn: &mut PgConnection, event_id: &str) -> Result<bool, sqlx::Error> {
    let exists = sqlx::query_scalar::<Postgres, i32>(
        "SELECT 1 FROM subscription_events WHERE stripe_event_id = $1",
    )
    .bind(event_id)
    .fetch_optional(conn)
    .await?
    .is_some();

    Ok(exists)
}

async fn apply_mutation(
    conn: &mut PgConnection,
    write: &BillingEventWrite,
) -> Result<bool, sqlx::Error> {
    let tenant_id = write.audit.tenant_id;
    let SubscriptionMutation {
        link_customer_id,
        subscription_id,
        plan,
        status,
        current_period_end,
        cancel_at_period_end,
    } = &write.mutation;

    if let Some(customer_id) = link_customer_id {
        sqlx::query(
            r#"
            UPDATE creators
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .execute(&mut *conn)
        .await?;
    }

    if !write.mutation.changes_state() {
        return Ok(true);
    }

    let result = sqlx::query(
        r#"
        UPDATE creators
        SET stripe_subscription_id = COALESCE($2, stripe_subscription_id),
            subscription_plan = COALESCE($3, subscription_plan),
            subscription_status = COALESCE($4, subscription_status),
            current_period_end = COALESCE($5, current_period_end),
            cancel_at_period_end = COALESCE($6, cancel_at_period_end),
            subscription_version = subscription_version + 1,
            subscription_synced_at = $7,
            updated_at = now()
        WHERE id = $1
          AND (subscription_synced_at IS NULL OR subscription_synced_at <= $7)
        "#,
    )
    .bind(tenant_id)
    .bind(subscription_id.as_deref())
    .bind(*plan)
    .bind(*status)
    .bind(*current_period_end)
    .bind(*cancel_at_period_end)
    .bind(write.event_created)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl BillingEventRepository for PostgresBillingEventRepository {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        event_exists(&mut conn, event_id).await
    }

    async fn apply_billing_event(
        &self,
        write: &BillingEventWrite,
    ) -> Result<ApplyOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if event_exists(&mut tx, &write.audit.external_event_id).await? {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let applied = apply_mutation(&mut tx, write).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO subscription_events
                (creator_id, event_type, stripe_event_id, stripe_subscription_id, metadata, state_applied)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(write.audit.tenant_id)
        .bind(write.audit.event_type)
        .bind(&write.audit.external_event_id)
        .bind(write.audit.external_subscription_id.as_deref())
        .bind(&write.audit.metadata)
        .bind(applied)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // A concurrent delivery of the same event committed first.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(ApplyOutcome::Duplicate);
            }
            Err(err) => return Err(err),
        }

        tx.commit().await?;

        Ok(if applied {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Stale
        })
    }

    async fn list_events_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BillingAuditEntry>, sqlx::Error> {
        sqlx::query_as::<_, BillingAuditEntry>(
            r#"
            SELECT id,
                   creator_id AS tenant_id,
                   event_type,
                   stripe_event_id AS external_event_id,
                   stripe_subscription_id AS external_subscription_id,
                   metadata,
                   state_applied,
                   recorded_at
            FROM subscription_events
            WHERE creator_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
