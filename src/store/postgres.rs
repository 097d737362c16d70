//! PostgreSQL order store
//!
//! The order document lives in a JSONB column next to the columns the
//! conditional update filters on. The payment compare-and-swap is a single
//! `UPDATE ... WHERE version = $n AND payment_status = ANY(...)`; the affected
//! row count decides the winner.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{OrderSequence, OrderStore};
use crate::domain::aggregates::{Order, PaymentStatus};
use crate::domain::value_objects::{to_minor_units, OrderNumber};
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn with_version((Json(mut order), version): (Json<Order>, i64)) -> Order {
    order.version = version as u64;
    order
}

#[async_trait]
impl OrderSequence for PgOrderStore {
    async fn next_value(&self) -> Result<u64> {
        let (value,): (i64,) = sqlx::query_as("SELECT nextval('order_number_seq')").fetch_one(&self.pool).await?;
        Ok(value as u64)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orders (id, order_number, status, payment_status, payment_method, total_minor, needs_review, version, document, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10)",
        )
        .bind(order.id)
        .bind(order.order_number.as_str())
        .bind(order.status.as_str())
        .bind(order.payment.status.as_str())
        .bind(order.payment.method.as_str())
        .bind(to_minor_units(order.total))
        .bind(order.review.is_some())
        .bind(Json(order))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;
        if let Some(correlation) = &order.payment.provider_correlation_id {
            sqlx::query("INSERT INTO payment_correlations (correlation_id, order_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(correlation)
                .bind(order.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(with_version))
    }

    async fn get_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE order_number = $1")
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(with_version))
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Order>> {
        let row: Option<(Json<Order>, i64)> = sqlx::query_as(
            "SELECT o.document, o.version FROM payment_correlations c JOIN orders o ON o.id = c.order_id WHERE c.correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(with_version))
    }

    async fn compare_and_swap(&self, next: &Order, payment_status_in: Option<&[PaymentStatus]>) -> Result<bool> {
        let allowed: Option<Vec<String>> = payment_status_in.map(|s| s.iter().map(|p| p.as_str().to_string()).collect());
        let expected_version = i64::try_from(next.version).map_err(|e| CommerceError::Storage(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE orders SET status = $3, payment_status = $4, needs_review = $5, version = version + 1, document = $6, updated_at = $7 \
             WHERE id = $1 AND version = $2 AND ($8::text[] IS NULL OR payment_status = ANY($8))",
        )
        .bind(next.id)
        .bind(expected_version)
        .bind(next.status.as_str())
        .bind(next.payment.status.as_str())
        .bind(next.review.is_some())
        .bind(Json(next))
        .bind(next.updated_at)
        .bind(allowed)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(correlation) = &next.payment.provider_correlation_id {
            sqlx::query("INSERT INTO payment_correlations (correlation_id, order_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(correlation)
                .bind(next.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}
