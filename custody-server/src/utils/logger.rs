//! Logging Infrastructure
//!
//! `tracing-subscriber` with an `EnvFilter`, optional JSON output and an
//! optional daily rolling file under `{WORK_DIR}/logs`.

use std::path::Path;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::core::Config;

/// Initialize the logger with defaults (info, plain, stdout)
pub fn init_logger() {
    init_logger_with_file(None, false, None);
}

/// Initialize the logger
///
/// `log_level` accepts a bare level or full `EnvFilter` directives
/// (`info,custody_server=debug`). `RUST_LOG` wins when set. A log directory
/// that does not exist is ignored and output goes to stdout.
pub fn init_logger_with_file(log_level: Option<&str>, json: bool, log_dir: Option<&Path>) {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match log_dir {
        Some(dir) if dir.exists() => {
            BoxMakeWriter::new(tracing_appender::rolling::daily(dir, "custody-server"))
        }
        _ => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false);

    // 重复初始化 (测试) 忽略
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

/// 设置运行环境: 加载 .env、创建工作目录和日志目录、初始化日志
pub fn setup_environment() -> anyhow::Result<Config> {
    // .env 可选
    let _ = dotenv::dotenv();

    let config = Config::from_env();
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    init_logger_with_file(Some(&config.log_level), config.log_json, Some(&log_dir));
    Ok(config)
}
