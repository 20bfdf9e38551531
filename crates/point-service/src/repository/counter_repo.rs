//! 积分计数器仓储（PostgreSQL）
//!
//! 读在事务内进行且不加锁（READ COMMITTED 下普通 SELECT），条件更新直接走连接池，
//! 以 `version` 列作为比较条件。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use point_shared::error::Result;
use sqlx::{PgPool, Postgres, Transaction};

use super::traits::{CounterReadScope, CounterStore};
use crate::models::{PointCounter, Tier};

/// 计数器行数据
#[derive(Debug, sqlx::FromRow)]
struct CounterRow {
    id: i64,
    remaining: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl CounterRow {
    fn into_counter(self, level: Tier) -> PointCounter {
        PointCounter {
            id: self.id,
            level,
            remaining: self.remaining,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

const SELECT_COUNTER: &str = r#"
    SELECT id, remaining, version, updated_at
    FROM point_counters
    WHERE level = $1
"#;

/// 积分计数器仓储
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 事务读作用域，sqlx 的 Transaction 在未提交时 drop 会自动回滚
struct PgReadScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CounterReadScope for PgReadScope {
    async fn find(&mut self, level: Tier) -> Result<Option<PointCounter>> {
        let row = sqlx::query_as::<_, CounterRow>(SELECT_COUNTER)
            .bind(level.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|r| r.into_counter(level)))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn begin(&self) -> Result<Box<dyn CounterReadScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReadScope { tx }))
    }

    async fn compare_and_set(
        &self,
        level: Tier,
        new_remaining: i64,
        expected_version: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE point_counters
            SET remaining = $1, version = version + 1, updated_at = NOW()
            WHERE level = $2 AND version = $3
            "#,
        )
        .bind(new_remaining)
        .bind(level.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn snapshot(&self, level: Tier) -> Result<Option<PointCounter>> {
        let row = sqlx::query_as::<_, CounterRow>(SELECT_COUNTER)
            .bind(level.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into_counter(level)))
    }
}
