//! 重试策略与执行器
//!
//! `RetryPolicy` 同时服务两类场景：
//! - 积分扣减的乐观锁重试轮次（由扣减引擎自行驱动循环，只借用策略计算退避）
//! - 基础设施瞬时故障的自动恢复（`retry_with_policy`，如启动时连接数据库）

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::PointError;

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// `max_attempts` 包含首次执行。`multiplier` 为 1.0 时退避时间固定为 `initial_delay`，
/// 大于 1.0 时按指数增长直到 `max_delay`。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次执行），至少为 1
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 4 次，初始等待 1 秒，最大等待 30 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 固定间隔策略
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// 实际生效的最大尝试次数，0 按 1 处理
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// 第 `attempt` 次尝试失败后的等待时间（attempt 从 1 开始）
    ///
    /// 公式: initial_delay * multiplier^(attempt-1)，结果不超过 max_delay。
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if self.multiplier <= 1.0 {
            return self.initial_delay;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 第 `attempt` 次尝试失败后是否还能继续
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.attempt_limit()
    }

    /// 最坏情况下全部退避时间之和（不含操作本身耗时）
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.attempt_limit())
            .map(|attempt| self.delay_after_attempt(attempt))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy: 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 带重试的异步执行器
///
/// 仅在操作返回可重试错误时才重试，其余错误直接向上传播。
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&PointError) -> bool,
    mut operation: F,
) -> Result<T, PointError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PointError>>,
{
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(err);
                }

                if !policy.has_attempts_left(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "已达最大尝试次数，放弃重试"
                    );
                    return Err(err);
                }

                let delay = policy.delay_after_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
