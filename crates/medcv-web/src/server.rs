//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use medcv_core::{MedcvError, Result};
use medcv_database::DatabasePool;
use medcv_workflow::AnalysisWorkflow;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{auth_middleware, AuthService};
use crate::handlers::{
    api_root, confirm_diagnosis, create_user, feedback_metrics, get_analysis, health,
    list_all_analyses, list_users, login, me, my_history, patient_history, prescribe_treatment,
    register, update_user_role, upload_analysis,
};

/// 上传请求体上限（多部分表单，含影像）
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// 进程级共享状态
///
/// 启动时构建一次，经Arc注入每个请求；除持久存储外没有跨请求可变状态。
pub struct AppState {
    pub db: DatabasePool,
    pub auth: AuthService,
    pub workflow: AnalysisWorkflow,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        let app = create_app(state);
        Self { addr, app }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| MedcvError::Internal(format!("Web服务器运行失败: {e}")))?;

        Ok(())
    }
}

/// 组装应用路由
pub fn create_app(state: Arc<AppState>) -> Router {
    // 无需认证的路由
    let public = Router::new()
        .route("/", get(api_root))
        .route("/health", get(health))
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/token", post(login));

    // 需要认证的路由（401先于任何角色检查）
    let protected = Router::new()
        .route("/v1/auth/me", get(me))
        .route("/v1/analyses/upload", post(upload_analysis))
        .route("/v1/analyses/my_history", get(my_history))
        .route("/v1/analyses/:analysis_id", get(get_analysis))
        .route("/v1/analyses/:analysis_id/confirm", post(confirm_diagnosis))
        .route("/v1/patients/:mrn/history", get(patient_history))
        .route(
            "/v1/patients/analyses/:analysis_id/prescribe",
            post(prescribe_treatment),
        )
        .route("/v1/admin/users", get(list_users).post(create_user))
        .route("/v1/admin/users/:user_id/role", patch(update_user_role))
        .route("/v1/admin/analyses/all", get(list_all_analyses))
        .route("/v1/admin/model/feedback_metrics", get(feedback_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(protected)
        .with_state(state)
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, draining connections");
}
