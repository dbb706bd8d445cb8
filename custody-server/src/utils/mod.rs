//! 工具模块
//!
//! - 日志初始化与运行环境设置
//! - [`AppError`] / [`ApiResponse`] (from shared::error)

pub mod logger;

pub use shared::error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
