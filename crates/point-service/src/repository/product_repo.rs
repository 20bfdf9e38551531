//! 商品仓储（PostgreSQL）

use async_trait::async_trait;
use point_shared::error::Result;
use sqlx::PgPool;

use super::traits::ProductRepository;
use crate::models::Product;

/// 商品仓储
///
/// 商品数据由商品服务维护，这里只读取价格用于档位划分。
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, price, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }
}
