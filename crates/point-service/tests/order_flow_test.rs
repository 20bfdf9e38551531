//! 订单处理端到端测试
//!
//! 使用内存仓储与记录型发布者，覆盖从订单事件到扣减结果发布的完整链路。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use point_service::repository::{InMemoryCounterStore, InMemoryProductRepository};
use point_service::{
    CancelReason, DecrementEngine, PointService, PointServiceError, Product, ResultPublisher, Tier,
};
use point_shared::error::PointError;
use point_shared::events::{DecreasePointSuccess, SuccessOrder};
use point_shared::retry::RetryPolicy;

const RESULT_TOPIC: &str = "decrease.point.success";

/// 记录所有发布内容的发布者，可切换为失败模式
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingPublisher {
    fn payloads(&self) -> Vec<String> {
        self.published.lock().iter().map(|(_, _, p)| p.clone()).collect()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PointError> {
        if *self.fail.lock() {
            return Err(PointError::Kafka("broker unavailable".to_string()));
        }
        self.published.lock().push((
            topic.to_string(),
            key.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }
}

struct Fixture {
    store: InMemoryCounterStore,
    publisher: Arc<RecordingPublisher>,
    service: PointService,
}

fn fixture(stock: i64) -> Fixture {
    let store = InMemoryCounterStore::with_counters(Tier::ALL.map(|level| (level, stock)));

    let products = InMemoryProductRepository::new();
    products.insert(Product::new(1, "cheap", 100.0));
    products.insert(Product::new(2, "middle", 101.0));
    products.insert(Product::new(3, "upper middle", 1000.0));
    products.insert(Product::new(4, "expensive", 1001.0));
    products.insert(Product::new(5, "refund", -20.0));

    let publisher = Arc::new(RecordingPublisher::default());
    let engine = DecrementEngine::new(
        Arc::new(store.clone()),
        RetryPolicy::fixed(1000, Duration::from_millis(1)),
    );
    let service = PointService::new(
        Arc::new(products),
        engine,
        publisher.clone(),
        RESULT_TOPIC,
    );

    Fixture {
        store,
        publisher,
        service,
    }
}

#[tokio::test]
async fn test_orders_decrement_matching_tier() {
    let f = fixture(10);

    let cases = [(11, 1, "bronze"), (12, 2, "silver"), (13, 3, "silver"), (14, 4, "gold")];
    for (order_id, product_id, expected) in cases {
        let result = f
            .service
            .handle(&SuccessOrder::new(order_id, product_id))
            .await
            .unwrap();
        assert_eq!(result, DecreasePointSuccess::new(order_id, expected));
    }

    assert_eq!(f.store.remaining(Tier::Bronze), Some(9));
    assert_eq!(f.store.remaining(Tier::Silver), Some(8));
    assert_eq!(f.store.remaining(Tier::Gold), Some(9));

    let published = f.publisher.published.lock().clone();
    assert_eq!(published.len(), 4);
    assert_eq!(
        published[0],
        (
            RESULT_TOPIC.to_string(),
            "11".to_string(),
            r#"{"order_id":11,"point_level":"bronze"}"#.to_string()
        )
    );
    assert_eq!(published[3].2, r#"{"order_id":14,"point_level":"gold"}"#);
}

#[tokio::test]
async fn test_negative_price_counts_as_bronze() {
    let f = fixture(10);

    let result = f.service.handle(&SuccessOrder::new(21, 5)).await.unwrap();

    assert_eq!(result.point_level, "bronze");
    assert_eq!(f.store.remaining(Tier::Bronze), Some(9));
}

#[tokio::test]
async fn test_unknown_product_publishes_nothing() {
    let f = fixture(10);

    let err = f
        .service
        .handle(&SuccessOrder::new(31, 999))
        .await
        .unwrap_err();

    assert!(matches!(err, PointServiceError::LookupFailure { product_id: 999, .. }));
    assert_eq!(f.store.read_count(), 0);
    assert_eq!(f.store.write_count(), 0);
    assert!(f.publisher.payloads().is_empty());
}

#[tokio::test]
async fn test_exhausted_tier_fails_until_restocked() {
    let f = fixture(1);

    f.service.handle(&SuccessOrder::new(41, 4)).await.unwrap();
    let err = f.service.handle(&SuccessOrder::new(42, 4)).await.unwrap_err();
    assert!(matches!(err, PointServiceError::ExhaustedCounter { level: Tier::Gold }));
    assert_eq!(f.store.remaining(Tier::Gold), Some(0));

    // 其他档位不受影响
    f.service.handle(&SuccessOrder::new(43, 1)).await.unwrap();

    f.store.set_remaining(Tier::Gold, 1);
    f.service.handle(&SuccessOrder::new(44, 4)).await.unwrap();
    assert_eq!(
        f.publisher.payloads(),
        vec![
            r#"{"order_id":41,"point_level":"gold"}"#.to_string(),
            r#"{"order_id":43,"point_level":"bronze"}"#.to_string(),
            r#"{"order_id":44,"point_level":"gold"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_publish_failure_after_decrement() {
    let f = fixture(10);
    *f.publisher.fail.lock() = true;

    let err = f.service.handle(&SuccessOrder::new(51, 2)).await.unwrap_err();

    assert_eq!(err.code(), "PUBLISH_FAILURE");
    assert!(err.counter_committed());
    assert_eq!(f.store.remaining(Tier::Silver), Some(9));
}

#[tokio::test]
async fn test_decrement_timeout_already_elapsed() {
    let f = fixture(10);
    let service = f.service.with_decrement_timeout(Some(Duration::ZERO));

    let err = service.handle(&SuccessOrder::new(61, 4)).await.unwrap_err();

    assert!(matches!(
        err,
        PointServiceError::Cancelled {
            level: Tier::Gold,
            attempts: 0,
            reason: CancelReason::Deadline,
        }
    ));
    assert_eq!(f.store.remaining(Tier::Gold), Some(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_through_service() {
    let f = fixture(20);
    let service = Arc::new(f.service);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move { service.handle(&SuccessOrder::new(100 + i, 3)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(f.store.remaining(Tier::Silver), Some(0));
    assert_eq!(f.publisher.payloads().len(), 20);
}
