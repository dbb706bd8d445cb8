use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::custody::CustodySettings;
use crate::custody::lane::DEFAULT_HIGH_VALUE_THRESHOLD;

/// 服务器配置 - 托管服务的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/custody | 工作目录 (数据库、日志) |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 / EnvFilter 指令 |
/// | LOG_JSON | false | JSON 日志输出 |
/// | HIGH_VALUE_THRESHOLD | 1000 | 高价值阈值 (>= 走 vault_hold) |
/// | STALE_LOCK_TIMEOUT_SECS | 86400 | 锁超时报告阈值 |
/// | INTEGRITY_SCAN_INTERVAL_SECS | 900 | 巡检间隔 |
/// | ORPHAN_ALERT_THRESHOLD | 0 | 孤儿锁数量超过此值时告警 |
/// | ESCROW_RETRY_SCAN_SECS | 30 | 托管补偿队列扫描间隔 |
/// | ORDER_SERVICE_URL | - | 订单服务地址 |
/// | LEDGER_SERVICE_URL | - | 账本服务地址 |
/// | ALERT_WEBHOOK_URL | - | 告警 webhook (可选) |
/// | EXTERNAL_TIMEOUT_MS | 10000 | 外部调用超时(毫秒) |
///
/// 未配置订单/账本服务地址时，仅 development 环境回退到内存实现。
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/custody HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub http_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,

    // === 托管策略 ===
    pub high_value_threshold: Decimal,
    pub stale_lock_timeout_secs: u64,
    pub integrity_scan_interval_secs: u64,
    pub orphan_alert_threshold: usize,
    pub escrow_retry_scan_secs: u64,

    // === 外部服务 ===
    pub order_service_url: Option<String>,
    pub ledger_service_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub external_timeout_ms: u64,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/custody".into()),
            http_port: env_parse("HTTP_PORT", 3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_parse("LOG_JSON", false),

            high_value_threshold: env_parse("HIGH_VALUE_THRESHOLD", DEFAULT_HIGH_VALUE_THRESHOLD),
            stale_lock_timeout_secs: env_parse("STALE_LOCK_TIMEOUT_SECS", 86_400),
            integrity_scan_interval_secs: env_parse("INTEGRITY_SCAN_INTERVAL_SECS", 900),
            orphan_alert_threshold: env_parse("ORPHAN_ALERT_THRESHOLD", 0),
            escrow_retry_scan_secs: env_parse("ESCROW_RETRY_SCAN_SECS", 30),

            order_service_url: env_url("ORDER_SERVICE_URL"),
            ledger_service_url: env_url("LEDGER_SERVICE_URL"),
            alert_webhook_url: env_url("ALERT_WEBHOOK_URL"),
            external_timeout_ms: env_parse("EXTERNAL_TIMEOUT_MS", 10_000),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// redb 数据库文件
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("custody.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms)
    }

    pub fn integrity_scan_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_scan_interval_secs.max(1))
    }

    pub fn escrow_retry_interval(&self) -> Duration {
        Duration::from_secs(self.escrow_retry_scan_secs.max(1))
    }

    pub fn custody_settings(&self) -> CustodySettings {
        CustodySettings {
            high_value_threshold: self.high_value_threshold,
            stale_lock_timeout_ms: (self.stale_lock_timeout_secs as i64).saturating_mul(1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Empty values count as unset
fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}
