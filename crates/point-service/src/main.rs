//! 积分服务
//!
//! 消费订单完成事件，按档位扣减共享积分池并发布扣减结果。

use std::sync::Arc;

use anyhow::Result;
use point_shared::{
    config::AppConfig,
    database::Database,
    dlq::DlqProducer,
    error::PointError,
    kafka::KafkaProducer,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use point_service::{
    DeadLetterSink, DecrementEngine, KafkaResultPublisher, PointConsumer, PointService,
    repository::{PgCounterStore, PgProductRepository},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/{default,环境,服务名}.toml + POINT_ 环境变量
    let (config, load_error) = match AppConfig::load("point-service") {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    config.validate()?;

    // 2. 可观测性
    let _guard = observability::init(&config.observability, &config.service_name).await?;
    if let Some(e) = load_error {
        warn!(error = %e, "加载配置失败，使用默认配置");
    }

    info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting point-service..."
    );

    // 3. 数据库（启动时数据库可能尚未就绪，按默认策略重试）
    let db = retry_with_policy(
        &RetryPolicy::default(),
        "connect_database",
        PointError::is_retryable,
        || Database::connect(&config.database),
    )
    .await?;

    if config.database.run_migrations {
        db.run_migrations(&config.database.migrations_dir).await?;
    }

    // 4. 仓储与扣减引擎
    let pool = db.pool().clone();
    let counter_store = Arc::new(PgCounterStore::new(pool.clone()));
    let product_repo = Arc::new(PgProductRepository::new(pool));

    let policy = config.point.retry_policy();
    info!(
        max_attempts = policy.max_attempts,
        retry_delay_ms = config.point.retry_delay_ms,
        worst_case_wait_ms = policy.worst_case_wait().as_millis() as u64,
        "扣减引擎已配置"
    );
    let engine = DecrementEngine::new(counter_store, policy);

    // 5. Kafka 生产者、结果发布与死信队列
    let producer = KafkaProducer::new(&config.kafka)?;
    let publisher = Arc::new(KafkaResultPublisher::new(producer.clone()));

    let dlq: Option<Arc<dyn DeadLetterSink>> = if config.kafka.dead_letter_enabled {
        Some(Arc::new(DlqProducer::new(
            producer,
            &config.kafka.dead_letter_topic,
            &config.service_name,
        )))
    } else {
        None
    };

    // 6. 服务与消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(
        PointService::new(
            product_repo,
            engine,
            publisher,
            config.kafka.result_topic.clone(),
        )
        .with_decrement_timeout(config.point.decrement_timeout())
        .with_shutdown(shutdown_rx.clone()),
    );

    let consumer = PointConsumer::new(&config.kafka, service, dlq)?;
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));
    info!(topic = %config.kafka.order_topic, "point-service 已启动");

    // 7. 等待关闭信号
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match consumer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "消费者异常退出"),
        Err(e) => error!(error = %e, "消费者任务异常终止"),
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "无法监听 SIGTERM 信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
