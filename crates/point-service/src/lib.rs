//! 积分服务
//!
//! 消费订单完成事件，按商品价格把订单划入 bronze / silver / gold 档位，
//! 以乐观锁方式从该档位的共享积分池中扣减一分，并发布扣减结果。
//!
//! ## 核心功能
//!
//! - **档位划分**：价格到档位的纯函数映射
//! - **乐观锁扣减**：读取版本 → 条件更新 → 冲突重试，无需外部锁
//! - **结果发布**：`{"order_id":…, "point_level":…}` 发布到结果 topic
//! - **事件消费**：offset 在处理得出结论后才存储，失败消息转入死信队列
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `classifier`: 档位划分
//! - `repository`: 数据库仓储层（PostgreSQL 与内存实现）
//! - `engine`: 乐观锁扣减引擎
//! - `publisher`: 结果发布
//! - `service`: 订单事件编排
//! - `consumer`: Kafka 消费者

pub mod classifier;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod models;
pub mod publisher;
pub mod repository;
pub mod service;

pub use classifier::classify;
pub use consumer::{DeadLetterSink, PointConsumer};
pub use engine::{Cancellation, DecrementEngine, DecrementOutcome};
pub use error::{CancelReason, PointServiceError, Result};
pub use models::{PointCounter, Product, Tier};
pub use publisher::{KafkaResultPublisher, ResultPublisher};
pub use service::PointService;
