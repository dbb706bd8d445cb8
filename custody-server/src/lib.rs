//! Card Custody Server - 藏品交易市场的库存托管与锁定子系统
//!
//! # 架构概述
//!
//! 保证同一张实体卡在任意并发下只会卖给一个买家，决定托管路径
//! (direct_ship / vault_hold)，并在锁与订单状态漂移时发现和修复。
//!
//! - **托管核心** (`custody`): 状态机、CAS 锁、销售完成、巡检、修复
//! - **审计** (`audit`): SHA-256 哈希链审计日志
//! - **托管补偿** (`escrow`): ledger 调用失败后的退避重试队列
//! - **外部服务** (`external`): 订单 / 账本 / 告警适配器
//! - **HTTP API** (`api`): axum 路由
//!
//! # 模块结构
//!
//! ```text
//! custody-server/src/
//! ├── core/          # 配置、状态、错误、后台任务
//! ├── custody/       # 托管核心 + redb 存储
//! ├── audit/         # 审计日志
//! ├── escrow/        # 补偿队列与 worker
//! ├── external/      # 外部服务
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 日志
//! ```

pub mod api;
pub mod audit;
pub mod core;
pub mod custody;
pub mod escrow;
pub mod external;
pub mod utils;

// Re-export 公共类型
pub use core::{Config, Server, ServerState};
pub use custody::{CustodyError, CustodyService, CustodyStorage};
pub use utils::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};

pub use utils::logger::{init_logger, init_logger_with_file, setup_environment};

// Security logging macro - 支持 tracing 格式说明符
#[macro_export]
macro_rules! security_log {
    ($level:expr, $event:expr, $($key:ident = $value:expr),*) => {
        tracing::info!(
            target: "security",
            level = $level,
            event = $event,
            $($key = $value),*
        );
    };
}
