//! 订单完成事件消费者
//!
//! 订阅订单 topic，逐条交给 `PointService` 处理，并按处理结果决定消息的去向：
//!
//! | 结果 | 处理 |
//! |------|------|
//! | 成功 | 确认 |
//! | 负载无法解析 | 记录告警并确认，不重试 |
//! | 处理失败（含扣减超时） | 记录错误，写入死信队列（如启用）后确认 |
//! | 因进程关闭被取消 | 不确认，重启后重新投递 |

use std::sync::Arc;

use async_trait::async_trait;
use point_shared::config::KafkaConfig;
use point_shared::dlq::{DeadLetterMessage, DlqProducer};
use point_shared::error::PointError;
use point_shared::events::SuccessOrder;
use point_shared::kafka::{ConsumerMessage, KafkaConsumer};
use point_shared::observability::metrics as point_metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::service::PointService;

/// 死信写入接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, message: &DeadLetterMessage) -> std::result::Result<(), PointError>;
    fn source_service(&self) -> String;
}

#[async_trait]
impl DeadLetterSink for DlqProducer {
    async fn send(&self, message: &DeadLetterMessage) -> std::result::Result<(), PointError> {
        DlqProducer::send(self, message).await
    }

    fn source_service(&self) -> String {
        DlqProducer::source_service(self).to_string()
    }
}

/// 积分服务的 Kafka 消费者
pub struct PointConsumer {
    consumer: KafkaConsumer,
    service: Arc<PointService>,
    dlq: Option<Arc<dyn DeadLetterSink>>,
    order_topic: String,
}

impl PointConsumer {
    pub fn new(
        config: &KafkaConfig,
        service: Arc<PointService>,
        dlq: Option<Arc<dyn DeadLetterSink>>,
    ) -> std::result::Result<Self, PointError> {
        let consumer = KafkaConsumer::new(config, None)?;
        Ok(Self {
            consumer,
            service,
            dlq,
            order_topic: config.order_topic.clone(),
        })
    }

    /// 运行消费循环直到关闭信号变为 `true`
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> std::result::Result<(), PointError> {
        self.consumer.subscribe(&[self.order_topic.as_str()])?;
        info!(topic = %self.order_topic, "开始消费订单完成事件");

        let service = self.service;
        let dlq = self.dlq;
        self.consumer
            .start(shutdown, move |msg| {
                let service = service.clone();
                let dlq = dlq.clone();
                async move { handle_message(&service, dlq.as_deref(), msg).await }
            })
            .await;

        info!("订单事件消费者已停止");
        Ok(())
    }
}

/// 处理单条消息
///
/// 只有处理因进程关闭而被取消时返回 `Err`，此时消息不应被确认；
/// 其他失败都已在这里得出结论（日志与死信），返回 `Ok`。
pub async fn handle_message(
    service: &PointService,
    dlq: Option<&dyn DeadLetterSink>,
    msg: ConsumerMessage,
) -> Result<()> {
    let order: SuccessOrder = match msg.deserialize_payload() {
        Ok(order) => order,
        Err(e) => {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "订单事件无法解析，跳过"
            );
            point_metrics::record_order("malformed");
            return Ok(());
        }
    };

    match service.handle(&order).await {
        Ok(_) => {
            point_metrics::record_order("success");
            Ok(())
        }
        Err(e) if e.is_shutdown() => {
            warn!(order_id = order.order_id, error = %e, "订单处理被取消，消息将重新投递");
            point_metrics::record_order(e.code());
            Err(e)
        }
        Err(e) => {
            error!(
                order_id = order.order_id,
                product_id = order.product_id,
                error_code = e.code(),
                error = %e,
                "订单积分处理失败"
            );
            point_metrics::record_order(e.code());

            if let Some(dlq) = dlq {
                let dead_letter = DeadLetterMessage::new(
                    order.message_key(),
                    msg.topic.as_str(),
                    String::from_utf8_lossy(&msg.payload),
                    e.to_string(),
                    e.code(),
                    !e.counter_committed(),
                    dlq.source_service(),
                );
                if let Err(dlq_err) = dlq.send(&dead_letter).await {
                    error!(
                        order_id = order.order_id,
                        error = %dlq_err,
                        "写入死信队列失败，消息将丢失"
                    );
                }
            }
            Ok(())
        }
    }
}
