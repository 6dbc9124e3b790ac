//! 错误定义模块

use thiserror::Error;

/// MEDCV系统统一错误类型
///
/// 认证/授权/资源类错误与HTTP状态码一一对应，
/// 基础设施类错误（数据库、存储、推理服务）统一映射为服务端错误。
#[derive(Error, Debug)]
pub enum MedcvError {
    #[error("未认证: {0}")]
    Unauthorized(String),

    #[error("权限不足: {0}")]
    Forbidden(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("推理服务错误: {0}")]
    Upstream(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("无效状态转换: 从 {from} 经 {event}")]
    InvalidStateTransition { from: String, event: String },
}

/// MEDCV系统统一结果类型
pub type Result<T> = std::result::Result<T, MedcvError>;
