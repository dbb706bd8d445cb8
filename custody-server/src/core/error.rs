use thiserror::Error;

use crate::custody::StoreError;
use crate::external::ExternalError;

/// 启动 / 运行期错误 (请求级错误走 AppError)
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(#[from] StoreError),

    #[error("外部服务错误: {0}")]
    External(#[from] ExternalError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部服务器错误: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
