//! 订单事件编排
//!
//! 处理流程：查询商品 → 按价格划分档位 → 扣减对应档位一分 → 发布扣减结果。
//! 每次调用相互独立，不在调用之间保留状态。

use std::sync::Arc;
use std::time::Duration;

use point_shared::error::PointError;
use point_shared::events::{DecreasePointSuccess, SuccessOrder};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::classifier;
use crate::engine::{Cancellation, DecrementEngine};
use crate::error::{PointServiceError, Result};
use crate::publisher::ResultPublisher;
use crate::repository::ProductRepository;

/// 积分服务
pub struct PointService {
    products: Arc<dyn ProductRepository>,
    engine: DecrementEngine,
    publisher: Arc<dyn ResultPublisher>,
    result_topic: String,
    decrement_timeout: Option<Duration>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PointService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        engine: DecrementEngine,
        publisher: Arc<dyn ResultPublisher>,
        result_topic: impl Into<String>,
    ) -> Self {
        Self {
            products,
            engine,
            publisher,
            result_topic: result_topic.into(),
            decrement_timeout: None,
            shutdown: None,
        }
    }

    /// 单次扣减的截止时间（含全部重试与退避）
    pub fn with_decrement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.decrement_timeout = timeout;
        self
    }

    /// 进程关闭时中断正在重试的扣减
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn result_topic(&self) -> &str {
        &self.result_topic
    }

    fn cancellation(&self) -> Cancellation {
        let deadline = self
            .decrement_timeout
            .map(|t| tokio::time::Instant::now() + t);
        Cancellation::new(self.shutdown.clone(), deadline)
    }

    /// 处理一条订单完成事件
    ///
    /// 成功时返回已发布的扣减结果。发布失败时积分已经扣减，不会回滚，
    /// 调用方可通过 `PointServiceError::counter_committed` 识别这种情况。
    #[instrument(skip(self, order), fields(order_id = order.order_id, product_id = order.product_id))]
    pub async fn handle(&self, order: &SuccessOrder) -> Result<DecreasePointSuccess> {
        let product = self
            .products
            .get_product(order.product_id)
            .await
            .and_then(|found| {
                found.ok_or_else(|| PointError::not_found("Product", order.product_id))
            })
            .map_err(|source| PointServiceError::LookupFailure {
                product_id: order.product_id,
                source,
            })?;

        if product.price < 0.0 {
            warn!(price = product.price, "商品价格为负，按 bronze 档处理");
        }
        if let Some(snapshot) = order.price
            && snapshot != product.price
        {
            warn!(
                order_price = snapshot,
                product_price = product.price,
                "订单价格快照与商品价格不一致，以商品价格为准"
            );
        }

        let level = classifier::classify(product.price);

        let mut cancel = self.cancellation();
        let outcome = self.engine.decrement_with(level, &mut cancel).await?;

        let result = DecreasePointSuccess::new(order.order_id, level.as_str());
        let payload = serde_json::to_vec(&result).map_err(|e| PointServiceError::PublishFailure {
            order_id: order.order_id,
            level,
            source: e.into(),
        })?;

        self.publisher
            .publish(&self.result_topic, &order.message_key(), &payload)
            .await
            .map_err(|source| PointServiceError::PublishFailure {
                order_id: order.order_id,
                level,
                source,
            })?;

        info!(
            level = %level,
            remaining = outcome.remaining,
            attempts = outcome.attempts,
            "订单积分处理完成"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;
    use point_shared::retry::RetryPolicy;

    use crate::models::{Product, Tier};
    use crate::publisher::MockResultPublisher;
    use crate::repository::{InMemoryCounterStore, MockProductRepository};

    fn engine(store: InMemoryCounterStore) -> DecrementEngine {
        DecrementEngine::new(
            Arc::new(store),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        )
    }

    fn products_returning(price: f64) -> MockProductRepository {
        let mut products = MockProductRepository::new();
        products
            .expect_get_product()
            .returning(move |id| Ok(Some(Product::new(id, "product", price))));
        products
    }

    fn publisher_expecting(payload: &'static str) -> MockResultPublisher {
        let mut publisher = MockResultPublisher::new();
        publisher
            .expect_publish()
            .withf(move |topic, _key, body| topic == "decrease.point.success" && body == payload.as_bytes())
            .times(1)
            .returning(|_, _, _| Ok(()));
        publisher
    }

    fn full_store() -> InMemoryCounterStore {
        InMemoryCounterStore::with_counters([(Tier::Bronze, 10), (Tier::Silver, 10), (Tier::Gold, 10)])
    }

    #[tokio::test]
    async fn test_handle_gold_order() {
        let store = full_store();
        let service = PointService::new(
            Arc::new(products_returning(1500.0)),
            engine(store.clone()),
            Arc::new(publisher_expecting(r#"{"order_id":1,"point_level":"gold"}"#)),
            "decrease.point.success",
        );

        let result = service.handle(&SuccessOrder::new(1, 10)).await.unwrap();

        assert_eq!(result, DecreasePointSuccess::new(1, "gold"));
        assert_eq!(store.remaining(Tier::Gold), Some(9));
        assert_eq!(store.remaining(Tier::Silver), Some(10));
    }

    #[tokio::test]
    async fn test_handle_silver_order() {
        let store = full_store();
        let service = PointService::new(
            Arc::new(products_returning(800.0)),
            engine(store.clone()),
            Arc::new(publisher_expecting(r#"{"order_id":2,"point_level":"silver"}"#)),
            "decrease.point.success",
        );

        service.handle(&SuccessOrder::new(2, 20)).await.unwrap();
        assert_eq!(store.remaining(Tier::Silver), Some(9));
    }

    #[tokio::test]
    async fn test_handle_bronze_order() {
        let store = full_store();
        let service = PointService::new(
            Arc::new(products_returning(50.0)),
            engine(store.clone()),
            Arc::new(publisher_expecting(r#"{"order_id":3,"point_level":"bronze"}"#)),
            "decrease.point.success",
        );

        service.handle(&SuccessOrder::new(3, 30)).await.unwrap();
        assert_eq!(store.remaining(Tier::Bronze), Some(9));
    }

    #[tokio::test]
    async fn test_missing_product_touches_nothing() {
        let store = full_store();
        let mut products = MockProductRepository::new();
        products
            .expect_get_product()
            .with(eq(4))
            .times(1)
            .returning(|_| Ok(None));
        let mut publisher = MockResultPublisher::new();
        publisher.expect_publish().never();

        let service = PointService::new(
            Arc::new(products),
            engine(store.clone()),
            Arc::new(publisher),
            "decrease.point.success",
        );

        let err = service.handle(&SuccessOrder::new(4, 4)).await.unwrap_err();

        assert!(matches!(err, PointServiceError::LookupFailure { product_id: 4, .. }));
        assert!(!err.is_retryable());
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_infrastructure_error_is_retryable() {
        let mut products = MockProductRepository::new();
        products
            .expect_get_product()
            .returning(|_| Err(PointError::Database(sqlx::Error::PoolTimedOut)));

        let service = PointService::new(
            Arc::new(products),
            engine(full_store()),
            Arc::new(MockResultPublisher::new()),
            "decrease.point.success",
        );

        let err = service.handle(&SuccessOrder::new(5, 5)).await.unwrap_err();
        assert_eq!(err.code(), "LOOKUP_FAILURE");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_exhausted_tier_publishes_nothing() {
        let store = InMemoryCounterStore::with_counters([(Tier::Gold, 0)]);
        let mut publisher = MockResultPublisher::new();
        publisher.expect_publish().never();

        let service = PointService::new(
            Arc::new(products_returning(2000.0)),
            engine(store.clone()),
            Arc::new(publisher),
            "decrease.point.success",
        );

        let err = service.handle(&SuccessOrder::new(6, 6)).await.unwrap_err();
        assert!(matches!(err, PointServiceError::ExhaustedCounter { level: Tier::Gold }));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_decrement() {
        let store = full_store();
        let mut publisher = MockResultPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(PointError::Kafka("broker unavailable".into())));

        let service = PointService::new(
            Arc::new(products_returning(1500.0)),
            engine(store.clone()),
            Arc::new(publisher),
            "decrease.point.success",
        );

        let err = service.handle(&SuccessOrder::new(7, 7)).await.unwrap_err();

        assert!(matches!(
            err,
            PointServiceError::PublishFailure { order_id: 7, level: Tier::Gold, .. }
        ));
        assert!(err.counter_committed());
        assert_eq!(store.remaining(Tier::Gold), Some(9));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_decrement() {
        let (tx, rx) = watch::channel(true);
        let store = full_store();
        let mut publisher = MockResultPublisher::new();
        publisher.expect_publish().never();

        let service = PointService::new(
            Arc::new(products_returning(1500.0)),
            engine(store.clone()),
            Arc::new(publisher),
            "decrease.point.success",
        )
        .with_shutdown(rx);

        let err = service.handle(&SuccessOrder::new(8, 8)).await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(store.remaining(Tier::Gold), Some(10));
        drop(tx);
    }
}
