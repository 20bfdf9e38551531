//! 乐观锁积分扣减引擎
//!
//! 每一轮尝试：打开读作用域 → 读取计数器 → 校验余量 → 以读到的版本做条件更新。
//! 条件更新影响 0 行说明版本已被其他写入者推进，等待退避后用新的读取重来，
//! 直到成功、积分耗尽、基础设施故障、轮次用尽或被取消。
//!
//! 条件更新本身不与取消信号竞争：一旦发出就等待其结果，保证成功与否是确定的。

use std::sync::Arc;
use std::time::Duration;

use point_shared::observability::metrics as point_metrics;
use point_shared::{error::PointError, retry::RetryPolicy};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{CancelReason, PointServiceError, Result};
use crate::models::Tier;
use crate::repository::{CounterReadScope, CounterStore};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// 扣减调用的取消条件：关闭信号和截止时间，任一触发即取消
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// 永不取消
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(shutdown: Option<watch::Receiver<bool>>, deadline: Option<Instant>) -> Self {
        Self { shutdown, deadline }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 从当前时刻起 `timeout` 后到期
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 当前已触发的取消原因，关闭信号优先于截止时间
    pub fn reason(&self) -> Option<CancelReason> {
        if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Shutdown);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::Deadline);
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// 等待取消条件触发并返回原因；未配置任何条件时永远挂起
    pub async fn cancelled(&mut self) -> CancelReason {
        let deadline = self.deadline;
        let expire = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let shutdown = async {
            match self.shutdown.as_mut() {
                Some(rx) => {
                    // 发送端被丢弃时视为不会再有关闭信号
                    if rx.wait_for(|stop| *stop).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown => CancelReason::Shutdown,
            _ = expire => CancelReason::Deadline,
        }
    }
}

// ---------------------------------------------------------------------------
// DecrementEngine
// ---------------------------------------------------------------------------

/// 一次成功扣减的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecrementOutcome {
    pub level: Tier,
    /// 扣减后的剩余积分
    pub remaining: i64,
    /// 条件更新时匹配到的版本
    pub observed_version: i64,
    /// 总尝试轮数（含首次）
    pub attempts: u32,
}

enum Attempt {
    Committed { remaining: i64, version: i64 },
    Conflict,
}

/// 积分扣减引擎
#[derive(Clone)]
pub struct DecrementEngine {
    store: Arc<dyn CounterStore>,
    policy: RetryPolicy,
}

impl DecrementEngine {
    pub fn new(store: Arc<dyn CounterStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// 扣减一分，不设取消条件
    pub async fn decrement(&self, level: Tier) -> Result<DecrementOutcome> {
        self.decrement_with(level, &mut Cancellation::none()).await
    }

    /// 扣减一分，遵守给定的取消条件
    #[instrument(skip(self, cancel))]
    pub async fn decrement_with(
        &self,
        level: Tier,
        cancel: &mut Cancellation,
    ) -> Result<DecrementOutcome> {
        let limit = self.policy.attempt_limit();
        let mut attempt: u32 = 0;

        let result = loop {
            if let Some(reason) = cancel.reason() {
                break Err(PointServiceError::Cancelled {
                    level,
                    attempts: attempt,
                    reason,
                });
            }
            attempt += 1;

            match self.attempt(level, attempt, cancel).await {
                Ok(Attempt::Committed { remaining, version }) => {
                    break Ok(DecrementOutcome {
                        level,
                        remaining,
                        observed_version: version,
                        attempts: attempt,
                    });
                }
                Ok(Attempt::Conflict) => {
                    point_metrics::record_cas_conflict(level.as_str());
                    if attempt >= limit {
                        break Err(PointServiceError::RetryExhausted {
                            level,
                            attempts: attempt,
                        });
                    }

                    let delay = self.policy.delay_after_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "版本冲突，等待后重试");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        reason = cancel.cancelled() => {
                            break Err(PointServiceError::Cancelled { level, attempts: attempt, reason });
                        }
                    }
                }
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(outcome) => {
                info!(
                    remaining = outcome.remaining,
                    attempts = outcome.attempts,
                    "积分扣减成功"
                );
                point_metrics::record_decrement(level.as_str(), "success", outcome.attempts);
            }
            Err(e) => {
                warn!(attempts = attempt, error = %e, "积分扣减失败");
                point_metrics::record_decrement(level.as_str(), e.code(), attempt);
            }
        }

        result
    }

    /// 单轮尝试；任何非提交的退出都回滚读作用域
    async fn attempt(
        &self,
        level: Tier,
        attempt: u32,
        cancel: &mut Cancellation,
    ) -> Result<Attempt> {
        // 连接池耗尽时获取连接可能长时间阻塞，同样需要响应取消
        let begun = tokio::select! {
            begun = self.store.begin() => begun,
            reason = cancel.cancelled() => {
                return Err(PointServiceError::Cancelled { level, attempts: attempt, reason });
            }
        };
        let mut scope = begun.map_err(|source| PointServiceError::ReadFailure {
            level,
            attempt,
            source,
        })?;

        let read = tokio::select! {
            read = scope.find(level) => Ok(read),
            reason = cancel.cancelled() => Err(reason),
        };

        let counter = match read {
            Err(reason) => {
                abort(scope).await;
                return Err(PointServiceError::Cancelled {
                    level,
                    attempts: attempt,
                    reason,
                });
            }
            Ok(Ok(Some(counter))) => counter,
            Ok(Ok(None)) => {
                abort(scope).await;
                return Err(PointServiceError::ReadFailure {
                    level,
                    attempt,
                    source: PointError::not_found("PointCounter", level),
                });
            }
            Ok(Err(source)) => {
                abort(scope).await;
                return Err(PointServiceError::ReadFailure {
                    level,
                    attempt,
                    source,
                });
            }
        };

        if counter.is_exhausted() {
            abort(scope).await;
            return Err(PointServiceError::ExhaustedCounter { level });
        }

        let new_remaining = counter.remaining - 1;
        let affected = match self
            .store
            .compare_and_set(level, new_remaining, counter.version)
            .await
        {
            Ok(affected) => affected,
            Err(source) => {
                abort(scope).await;
                return Err(PointServiceError::WriteFailure {
                    level,
                    attempt,
                    source,
                });
            }
        };

        match affected {
            0 => {
                abort(scope).await;
                Ok(Attempt::Conflict)
            }
            1 => {
                // 条件更新已独立生效，读作用域提交失败不影响结果
                if let Err(e) = scope.commit().await {
                    warn!(attempt, error = %e, "读作用域提交失败，扣减已生效");
                }
                Ok(Attempt::Committed {
                    remaining: new_remaining,
                    version: counter.version,
                })
            }
            n => {
                abort(scope).await;
                Err(PointServiceError::WriteFailure {
                    level,
                    attempt,
                    source: PointError::Internal(format!("条件更新影响了 {n} 行")),
                })
            }
        }
    }
}

async fn abort(scope: Box<dyn CounterReadScope>) {
    if let Err(e) = scope.rollback().await {
        debug!(error = %e, "回滚读作用域失败");
    }
}
