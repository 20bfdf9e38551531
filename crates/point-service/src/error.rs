//! 积分服务专用错误类型
//!
//! 在共享库 PointError 基础上，按处理步骤区分失败原因：
//! 查询商品、读取计数器、条件更新、重试耗尽、发布结果、外部取消。
//! 积分耗尽（永久）与重试耗尽（暂时）必须可区分，监控据此分别告警。

use std::fmt;

use point_shared::error::PointError;

use crate::models::Tier;

/// 扣减被取消的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// 进程正在关闭，事件应在重启后重新投递
    Shutdown,
    /// 单次扣减的截止时间已到，属于一次普通的处理失败
    Deadline,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown"),
            Self::Deadline => f.write_str("deadline"),
        }
    }
}

/// 积分处理错误
#[derive(Debug, thiserror::Error)]
pub enum PointServiceError {
    /// 商品不存在或查询失败，此时尚未触碰任何计数器
    #[error("查询商品失败: product_id={product_id}, {source}")]
    LookupFailure {
        product_id: i64,
        source: PointError,
    },

    /// 档位积分已耗尽，属于业务终态，不重试
    #[error("积分已耗尽: level={level}")]
    ExhaustedCounter { level: Tier },

    #[error("读取积分计数器失败: level={level}, attempt={attempt}, {source}")]
    ReadFailure {
        level: Tier,
        attempt: u32,
        source: PointError,
    },

    #[error("条件更新积分计数器失败: level={level}, attempt={attempt}, {source}")]
    WriteFailure {
        level: Tier,
        attempt: u32,
        source: PointError,
    },

    /// 并发竞争在 max_attempts 轮内未能解决
    #[error("乐观锁重试次数耗尽: level={level}, attempts={attempts}")]
    RetryExhausted { level: Tier, attempts: u32 },

    /// 积分已扣减成功，但结果消息未能发布
    #[error("发布积分扣减结果失败: order_id={order_id}, level={level}, {source}")]
    PublishFailure {
        order_id: i64,
        level: Tier,
        source: PointError,
    },

    /// 截止时间已到或收到关闭信号
    #[error("积分扣减被取消: level={level}, attempts={attempts}, reason={reason}")]
    Cancelled {
        level: Tier,
        attempts: u32,
        reason: CancelReason,
    },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PointServiceError>;

impl PointServiceError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::LookupFailure { .. } => "LOOKUP_FAILURE",
            Self::ExhaustedCounter { .. } => "EXHAUSTED_COUNTER",
            Self::ReadFailure { .. } => "READ_FAILURE",
            Self::WriteFailure { .. } => "WRITE_FAILURE",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::PublishFailure { .. } => "PUBLISH_FAILURE",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// 重新处理同一事件是否可能成功
    ///
    /// 积分耗尽、商品或计数器行不存在不会因重试改变；竞争、取消和基础设施故障可以。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExhaustedCounter { .. } => false,
            Self::LookupFailure { source, .. }
            | Self::ReadFailure { source, .. }
            | Self::PublishFailure { source, .. } => source.is_retryable(),
            Self::WriteFailure { .. } | Self::RetryExhausted { .. } | Self::Cancelled { .. } => {
                true
            }
        }
    }

    /// 是否为终态（积分耗尽、商品或计数器行不存在），重放事件不会改变结果
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// 是否因进程关闭而中断，此时事件不应被确认
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Self::Cancelled {
                reason: CancelReason::Shutdown,
                ..
            }
        )
    }

    /// 失败时积分是否已经扣减
    ///
    /// 只有发布失败发生在扣减提交之后，此时重放事件会重复扣减。
    pub fn counter_committed(&self) -> bool {
        matches!(self, Self::PublishFailure { .. })
    }
}
