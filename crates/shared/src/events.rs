//! 事件消息定义
//!
//! 与订单服务、用户积分服务约定的 Kafka 消息格式。字段使用 snake_case，
//! 与上下游已有的 JSON 格式保持一致。

use serde::{Deserialize, Serialize};

/// 订单完成事件（输入）
///
/// `price` 为订单侧快照，积分档位以商品表中的价格为准，此字段仅用于日志比对。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessOrder {
    pub order_id: i64,
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl SuccessOrder {
    pub fn new(order_id: i64, product_id: i64) -> Self {
        Self {
            order_id,
            product_id,
            price: None,
        }
    }

    /// 消息 key，保证同一订单的重复投递落在同一分区
    pub fn message_key(&self) -> String {
        self.order_id.to_string()
    }
}

/// 积分扣减成功事件（输出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreasePointSuccess {
    pub order_id: i64,
    pub point_level: String,
}

impl DecreasePointSuccess {
    pub fn new(order_id: i64, point_level: impl Into<String>) -> Self {
        Self {
            order_id,
            point_level: point_level.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_order_deserialize_without_price() {
        let order: SuccessOrder =
            serde_json::from_str(r#"{"order_id":1,"product_id":42}"#).unwrap();
        assert_eq!(order, SuccessOrder::new(1, 42));
        assert_eq!(order.message_key(), "1");
    }

    #[test]
    fn test_success_order_deserialize_with_price() {
        let order: SuccessOrder =
            serde_json::from_str(r#"{"order_id":2,"product_id":5,"price":800.5}"#).unwrap();
        assert_eq!(order.price, Some(800.5));
    }

    #[test]
    fn test_success_order_rejects_missing_product() {
        let result: Result<SuccessOrder, _> = serde_json::from_str(r#"{"order_id":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decrease_point_success_wire_format() {
        let event = DecreasePointSuccess::new(1, "gold");
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"order_id":1,"point_level":"gold"}"#
        );
    }
}
