//! 内存仓储
//!
//! 与 PostgreSQL 实现语义一致的内存版本，适用于测试和本地开发。
//! 计数器存储额外记录读写次数与每次成功条件更新所消耗的版本，便于断言并发行为。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use point_shared::error::{PointError, Result};

use super::traits::{CounterReadScope, CounterStore, ProductRepository};
use crate::models::{PointCounter, Product, Tier};

#[derive(Default)]
struct CounterState {
    counters: Mutex<HashMap<Tier, PointCounter>>,
    reads: AtomicU64,
    writes: AtomicU64,
    /// 成功写入时匹配到的 (档位, 旧版本)
    won_versions: Mutex<Vec<(Tier, i64)>>,
}

/// 内存积分计数器存储
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    state: Arc<CounterState>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定的剩余积分初始化各档位
    pub fn with_counters(counters: impl IntoIterator<Item = (Tier, i64)>) -> Self {
        let store = Self::new();
        for (level, remaining) in counters {
            store.set_remaining(level, remaining);
        }
        store
    }

    /// 直接设置剩余积分（不推进版本），用于准备测试数据
    pub fn set_remaining(&self, level: Tier, remaining: i64) {
        let mut counters = self.state.counters.lock();
        let next_id = counters.len() as i64 + 1;
        counters
            .entry(level)
            .and_modify(|c| c.remaining = remaining)
            .or_insert_with(|| PointCounter {
                id: next_id,
                level,
                remaining,
                version: 0,
                updated_at: Utc::now(),
            });
    }

    pub fn remaining(&self, level: Tier) -> Option<i64> {
        self.state.counters.lock().get(&level).map(|c| c.remaining)
    }

    /// 通过读作用域完成的读取次数
    pub fn read_count(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// 发出的条件更新次数（含竞争失败的）
    pub fn write_count(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn won_versions(&self) -> Vec<(Tier, i64)> {
        self.state.won_versions.lock().clone()
    }
}

struct InMemoryReadScope {
    state: Arc<CounterState>,
}

#[async_trait]
impl CounterReadScope for InMemoryReadScope {
    async fn find(&mut self, level: Tier) -> Result<Option<PointCounter>> {
        // 模拟一次数据库往返，让并发任务有机会在读与写之间交错
        tokio::task::yield_now().await;
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.counters.lock().get(&level).cloned())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn begin(&self) -> Result<Box<dyn CounterReadScope>> {
        Ok(Box::new(InMemoryReadScope {
            state: self.state.clone(),
        }))
    }

    async fn compare_and_set(
        &self,
        level: Tier,
        new_remaining: i64,
        expected_version: i64,
    ) -> Result<u64> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);

        // 对应表上的 CHECK (remaining >= 0) 约束
        if new_remaining < 0 {
            return Err(PointError::Internal(format!(
                "违反约束 remaining >= 0: level={level}, remaining={new_remaining}"
            )));
        }

        let mut counters = self.state.counters.lock();
        let Some(counter) = counters.get_mut(&level) else {
            return Ok(0);
        };
        if counter.version != expected_version {
            return Ok(0);
        }

        counter.remaining = new_remaining;
        counter.version += 1;
        counter.updated_at = Utc::now();
        self.state.won_versions.lock().push((level, expected_version));
        Ok(1)
    }

    async fn snapshot(&self, level: Tier) -> Result<Option<PointCounter>> {
        Ok(self.state.counters.lock().get(&level).cloned())
    }
}

/// 内存商品仓储
#[derive(Clone, Default)]
pub struct InMemoryProductRepository {
    products: Arc<DashMap<i64, Product>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products.insert(product.id, product);
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.products.get(&id).map(|p| p.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_set_advances_version_once() {
        let store = InMemoryCounterStore::with_counters([(Tier::Gold, 5)]);
        let before = store.snapshot(Tier::Gold).await.unwrap().unwrap();

        assert_eq!(store.compare_and_set(Tier::Gold, 4, before.version).await.unwrap(), 1);
        // 旧版本已失效
        assert_eq!(store.compare_and_set(Tier::Gold, 4, before.version).await.unwrap(), 0);

        let after = store.snapshot(Tier::Gold).await.unwrap().unwrap();
        assert_eq!(after.remaining, 4);
        assert_eq!(after.version, before.version + 1);
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.won_versions(), vec![(Tier::Gold, before.version)]);
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_negative_remaining() {
        let store = InMemoryCounterStore::with_counters([(Tier::Bronze, 0)]);
        let err = tokio_test::assert_err!(store.compare_and_set(Tier::Bronze, -1, 0).await);
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(store.remaining(Tier::Bronze), Some(0));
    }

    #[tokio::test]
    async fn test_read_scope_counts_reads() {
        let store = InMemoryCounterStore::with_counters([(Tier::Silver, 3)]);

        let mut scope = store.begin().await.unwrap();
        let counter = scope.find(Tier::Silver).await.unwrap().unwrap();
        assert_eq!(counter.remaining, 3);
        assert!(scope.find(Tier::Gold).await.unwrap().is_none());
        scope.commit().await.unwrap();

        assert_eq!(store.read_count(), 2);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_product_repository() {
        let repo = InMemoryProductRepository::new();
        repo.insert(Product::new(1, "mobile suit", 1500.0));

        let product = repo.get_product(1).await.unwrap().unwrap();
        assert_eq!(product.price, 1500.0);
        assert!(repo.get_product(4).await.unwrap().is_none());
    }
}
