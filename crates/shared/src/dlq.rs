//! 死信队列
//!
//! 事件处理失败后，消费者确认原消息以避免毒消息循环，同时把原始内容和失败原因
//! 写入死信队列，供人工排查或在确认安全后重新投递。
//! 这里只负责写入；是否重放由运维根据 `redrive_safe` 判断，服务本身不自动重放。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PointError;
use crate::kafka::KafkaProducer;

// ---------------------------------------------------------------------------
// DeadLetterMessage: 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息 key（订单号）
    pub message_id: String,
    pub source_topic: String,
    /// 原始消息内容
    pub payload: String,
    pub error: String,
    pub error_code: String,
    /// 重放是否安全：失败发生在积分扣减提交之前时为 true
    pub redrive_safe: bool,
    pub failed_at: DateTime<Utc>,
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        error_code: impl Into<String>,
        redrive_safe: bool,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            error_code: error_code.into(),
            redrive_safe,
            failed_at: Utc::now(),
            source_service: source_service.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer: 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    topic: String,
    source_service: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, topic: &str, source_service: &str) -> Self {
        Self {
            producer,
            topic: topic.to_string(),
            source_service: source_service.to_string(),
        }
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    /// 将失败消息发送到死信队列
    pub async fn send(&self, message: &DeadLetterMessage) -> Result<(), PointError> {
        self.producer
            .send_json(&self.topic, &message.message_id, message)
            .await?;

        warn!(
            message_id = %message.message_id,
            source_topic = %message.source_topic,
            error_code = %message.error_code,
            redrive_safe = message.redrive_safe,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_message_serialization() {
        let msg = DeadLetterMessage::new(
            "42",
            "success.order",
            r#"{"order_id":42,"product_id":4}"#,
            "查询商品失败",
            "LOOKUP_FAILURE",
            true,
            "point-service",
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["messageId"], "42");
        assert_eq!(json["sourceTopic"], "success.order");
        assert_eq!(json["errorCode"], "LOOKUP_FAILURE");
        assert_eq!(json["redriveSafe"], true);
        assert_eq!(json["sourceService"], "point-service");

        let back: DeadLetterMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload, msg.payload);
    }
}
