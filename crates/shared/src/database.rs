//! PostgreSQL 连接池
//!
//! 启动时建立连接池并按需执行 migrations 目录中的脚本；关闭时等待连接归还。

use std::path::Path;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// 连接池句柄，克隆开销很小
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按配置建立连接池，至少成功建立一条连接才返回
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("数据库连接池已建立");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行迁移脚本
    ///
    /// 目录在运行期读取，已执行过的版本会被跳过。
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, dir: &str) -> Result<()> {
        let migrator = Migrator::new(Path::new(dir)).await?;
        migrator.run(&self.pool).await?;
        info!(dir, "数据库迁移已完成");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}
