//! 仓储 Trait 定义
//!
//! 扣减引擎与编排服务只依赖这里的抽象，PostgreSQL 与内存实现可互换，便于测试注入。

use async_trait::async_trait;
use point_shared::error::Result;

use crate::models::{PointCounter, Product, Tier};

/// 积分计数器存储
///
/// 读取在 `begin` 打开的事务作用域内进行，条件更新独立于该作用域提交，
/// 保证并发写入者中只有版本匹配的一个能生效。
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 打开一个读作用域
    async fn begin(&self) -> Result<Box<dyn CounterReadScope>>;

    /// 条件更新：仅当 `level` 行的版本仍等于 `expected_version` 时写入 `new_remaining`
    /// 并推进版本。返回受影响行数（0 表示竞争失败）。
    async fn compare_and_set(
        &self,
        level: Tier,
        new_remaining: i64,
        expected_version: i64,
    ) -> Result<u64>;

    /// 不经事务读取当前值，供运维查询与测试断言
    async fn snapshot(&self, level: Tier) -> Result<Option<PointCounter>>;
}

/// 读作用域
///
/// 任何退出路径都会回滚：显式调用 `rollback`，或在未提交时被 drop。
#[async_trait]
pub trait CounterReadScope: Send {
    async fn find(&mut self, level: Tier) -> Result<Option<PointCounter>>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// 商品仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get_product(&self, id: i64) -> Result<Option<Product>>;
}
