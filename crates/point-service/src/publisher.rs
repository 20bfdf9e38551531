//! 扣减结果发布
//!
//! 服务只依赖 `ResultPublisher` 抽象，生产环境由 Kafka 实现，测试注入 mock。

use async_trait::async_trait;
use point_shared::error::PointError;
use point_shared::kafka::KafkaProducer;
use tracing::debug;

/// 结果发布接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// 将已序列化的负载发布到 `topic`，`key` 决定分区
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PointError>;
}

/// 基于 Kafka 的结果发布者
#[derive(Clone)]
pub struct KafkaResultPublisher {
    producer: KafkaProducer,
}

impl KafkaResultPublisher {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ResultPublisher for KafkaResultPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PointError> {
        let (partition, offset) = self.producer.send(topic, key, payload).await?;
        debug!(topic, key, partition, offset, "扣减结果已发布");
        Ok(())
    }
}
