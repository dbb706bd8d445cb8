use std::sync::Arc;
use std::time::Instant;

use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::{Config, Result, ServerError};
use crate::custody::{Collaborators, CustodyService, CustodyStorage, IntegrityMonitor};
use crate::escrow::EscrowReconciler;
use crate::external::{
    AlertSink, FanoutAlertSink, HttpLedgerService, HttpOrderService, InMemoryLedgerService,
    InMemoryOrderService, LedgerService, OrderService, TracingAlertSink, WebhookAlertSink,
};

/// 服务器状态 - 持有所有服务的共享引用
///
/// 所有字段都是 `Arc` 或内部 `Arc`，clone 只是引用计数。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | storage | redb 存储 (卡片、锁索引、审计、补偿队列) |
/// | custody | 托管服务入口 (含审计查询 `custody.audit()`) |
/// | reconciler | 托管补偿 worker |
/// | monitor | 周期巡检 |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub storage: Arc<CustodyStorage>,
    pub custody: CustodyService,
    pub reconciler: EscrowReconciler,
    pub monitor: IntegrityMonitor,
    started_at: Instant,
}

impl ServerState {
    /// 由已打开的存储和外部协作者组装 (测试直接用内存实现)
    pub fn new(config: Config, storage: Arc<CustodyStorage>, deps: Collaborators) -> Self {
        let custody = CustodyService::new(storage.clone(), deps.clone(), config.custody_settings());
        let reconciler = EscrowReconciler::new(
            storage.clone(),
            deps.ledger.clone(),
            deps.alerts.clone(),
            config.escrow_retry_interval(),
        );
        let monitor = IntegrityMonitor::new(
            custody.auditor().clone(),
            storage.clone(),
            deps.alerts,
            config.orphan_alert_threshold,
            config.integrity_scan_interval(),
        );

        Self {
            config,
            storage,
            custody,
            reconciler,
            monitor,
            started_at: Instant::now(),
        }
    }

    /// 初始化服务器状态
    ///
    /// 1. 创建工作目录并打开 redb
    /// 2. 根据配置构建订单 / 账本 / 告警适配器
    pub async fn initialize(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        let db_path = config.database_path();
        let storage = Arc::new(CustodyStorage::open(&db_path)?);
        tracing::info!(path = %db_path.display(), "Custody storage opened");

        let deps = build_collaborators(config)?;
        Ok(Self::new(config.clone(), storage, deps))
    }

    /// 启动后台任务，返回注册表供关闭时使用
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let reconciler = self.reconciler.clone();
        let token = tasks.shutdown_token();
        tasks.spawn("escrow_reconciler", TaskKind::Worker, reconciler.run(token));

        let monitor = self.monitor.clone();
        let token = tasks.shutdown_token();
        tasks.spawn("integrity_monitor", TaskKind::Periodic, monitor.run(token));

        tasks.log_summary();
        tasks
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// 外部服务适配器
///
/// 配置了 URL 用 HTTP 实现；未配置时只有 development 允许回退到内存实现。
fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let timeout = config.external_timeout();

    let orders: Arc<dyn OrderService> = match &config.order_service_url {
        Some(url) => Arc::new(HttpOrderService::new(url, timeout)?),
        None if config.is_development() => {
            tracing::warn!("ORDER_SERVICE_URL not set, using in-memory order service");
            Arc::new(InMemoryOrderService::new())
        }
        None => return Err(ServerError::Config("ORDER_SERVICE_URL is required".into())),
    };

    let ledger: Arc<dyn LedgerService> = match &config.ledger_service_url {
        Some(url) => Arc::new(HttpLedgerService::new(url, timeout)?),
        None if config.is_development() => {
            tracing::warn!("LEDGER_SERVICE_URL not set, using in-memory ledger");
            Arc::new(InMemoryLedgerService::new())
        }
        None => return Err(ServerError::Config("LEDGER_SERVICE_URL is required".into())),
    };

    let mut alerts = FanoutAlertSink::new().with(Arc::new(TracingAlertSink));
    if let Some(url) = &config.alert_webhook_url {
        alerts = alerts.with(Arc::new(WebhookAlertSink::new(url, timeout)?));
    }
    let alerts: Arc<dyn AlertSink> = Arc::new(alerts);

    Ok(Collaborators {
        orders,
        ledger,
        alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_service_urls() {
        let mut config = Config::with_overrides("/tmp/custody-state-test", 0);
        config.environment = "production".into();
        config.order_service_url = None;
        config.ledger_service_url = None;
        assert!(matches!(build_collaborators(&config), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_development_falls_back_to_memory() {
        let mut config = Config::with_overrides("/tmp/custody-state-test", 0);
        config.environment = "development".into();
        config.order_service_url = None;
        config.ledger_service_url = None;
        config.alert_webhook_url = None;
        assert!(build_collaborators(&config).is_ok());
    }

    #[tokio::test]
    async fn test_initialize_opens_storage_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_overrides(dir.path().to_string_lossy(), 0);
        config.environment = "development".into();
        config.order_service_url = None;
        config.ledger_service_url = None;
        config.alert_webhook_url = None;

        let state = ServerState::initialize(&config).await.unwrap();
        assert!(config.database_path().exists());
        let tasks = state.start_background_tasks();
        assert_eq!(tasks.len(), 2);
        tasks.shutdown().await;
    }
}
