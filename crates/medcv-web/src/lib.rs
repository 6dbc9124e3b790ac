//! # MEDCV Web模块
//!
//! 基于axum的HTTP服务层：认证服务与中间件、错误到状态码的映射、
//! 各工作流操作的处理器以及路由组装。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

// 重新导出主要类型
pub use auth::AuthService;
pub use error::{ApiError, ApiResult};
pub use server::{create_app, AppState, WebServer};
