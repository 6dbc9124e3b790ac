//! HTTP处理器

use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Form,
};
use medcv_core::{MedcvError, User, UserRole};
use medcv_database::{DatabaseQueries, NewUser};
use medcv_workflow::{authorize, ImageUpload, WorkflowAction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{self, LoginResponse};
use crate::error::ApiResult;
use crate::server::AppState;

// ========== 请求/响应模型 ==========

/// 注册请求
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// 登录表单（OAuth2密码模式字段）
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// 诊断结论提交
#[derive(Debug, Deserialize)]
pub struct ConclusionUpdate {
    pub conclusion: String,
    pub is_correct: bool, // true: 系统诊断正确, false: 有误
}

/// 治疗方案提交
#[derive(Debug, Deserialize)]
pub struct TreatmentUpdate {
    pub treatment_plan: String,
}

/// 角色更新请求
#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: String,
}

/// 管理员建档用户请求（可指定任意角色）
#[derive(Debug, Deserialize)]
pub struct AdminCreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

/// 分页参数
#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

impl PageParams {
    /// 规整到合法区间
    pub fn clamped(&self) -> (i64, i64) {
        (self.offset.max(0), self.limit.clamp(1, 200))
    }
}

/// 上传响应摘要
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub analysis_id: i64,
    pub patient_mrn: String,
    pub system_diagnosis: Option<String>,
    pub stage: medcv_core::AnalysisStage,
}

// ========== 基础路由 ==========

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "MEDCV Diagnostic Workflow API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "auth": "/v1/auth",
            "analyses": "/v1/analyses",
            "patients": "/v1/patients",
            "admin": "/v1/admin"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

// ========== 认证路由 ==========

/// 用户注册
///
/// 自助注册一律落为诊断医生角色，忽略调用方提交的任何角色。
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let password_hash = auth::hash_password(&payload.password)?;

    let user = DatabaseQueries::new(&state.db)
        .create_user(&NewUser {
            username: payload.username,
            password_hash,
            role: UserRole::Diagnostician,
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "User registered");
    Ok((StatusCode::CREATED, Json(user.info())))
}

/// 登录并签发会话令牌
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Json<LoginResponse>> {
    info!(username = %form.username, "Login attempt");

    match state.auth.login(&state.db, &form.username, &form.password).await {
        Ok(response) => {
            info!(username = %form.username, "User logged in");
            Ok(Json(response))
        }
        Err(e) => {
            warn!(username = %form.username, error = %e, "Login failed");
            Err(e.into())
        }
    }
}

/// 获取当前用户信息
pub async fn me(Extension(user): Extension<User>) -> ApiResult<impl IntoResponse> {
    Ok(Json(user.info()))
}

// ========== 分析路由 ==========

/// 上传影像并启动CV分析
pub async fn upload_analysis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::UploadAnalysis)?;

    let mut filename: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    let mut patient_mrn: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| MedcvError::InvalidInput(format!("表单解析失败: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());

                // 逐块读取上传体
                let mut buffer = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| MedcvError::InvalidInput(format!("文件读取失败: {e}")))?
                {
                    buffer.extend_from_slice(&chunk);
                }
                content = Some(buffer);
            }
            Some("patient_mrn") => {
                patient_mrn = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| MedcvError::InvalidInput(format!("表单解析失败: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let content =
        content.ok_or_else(|| MedcvError::InvalidInput("缺少file字段".to_string()))?;
    let patient_mrn =
        patient_mrn.ok_or_else(|| MedcvError::InvalidInput("缺少patient_mrn字段".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload.bin".to_string());

    let detail = state
        .workflow
        .upload_and_analyze(user.id, &patient_mrn, ImageUpload { filename, content })
        .await?;

    let response = UploadResponse {
        message: "影像已上传，CV分析完成".to_string(),
        analysis_id: detail.analysis.id,
        patient_mrn,
        system_diagnosis: detail
            .result
            .as_ref()
            .and_then(|r| r.system_diagnosis.clone()),
        stage: detail.stage,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// 当前诊断医生的分析历史
pub async fn my_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ViewOwnHistory)?;

    let analyses = state.workflow.owned_history(user.id).await?;
    Ok(Json(analyses))
}

/// 获取单个分析的组合视图
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(analysis_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    // 先解析资源再判定权限：403与404语义保持区分
    let detail = state.workflow.get_detail(analysis_id).await?;

    let is_owner = detail.analysis.diagnostician_id == user.id;
    authorize(user.role, &WorkflowAction::ViewAnalysis { is_owner })?;

    Ok(Json(detail))
}

/// 确认诊断并记录反馈
pub async fn confirm_diagnosis(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(analysis_id): Path<i64>,
    Json(payload): Json<ConclusionUpdate>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ConfirmDiagnosis)?;

    let detail = state
        .workflow
        .confirm(analysis_id, user.id, &payload.conclusion, payload.is_correct)
        .await?;

    Ok(Json(detail))
}

// ========== 患者路由 ==========

/// 按MRN获取患者完整分析历史
pub async fn patient_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(mrn): Path<String>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ViewPatientHistory)?;

    let history = state.workflow.patient_history(&mrn).await?;
    Ok(Json(history))
}

/// 对分析结果制定治疗方案
pub async fn prescribe_treatment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(analysis_id): Path<i64>,
    Json(payload): Json<TreatmentUpdate>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::PrescribeTreatment)?;

    let detail = state
        .workflow
        .prescribe(analysis_id, user.id, &payload.treatment_plan)
        .await?;

    Ok(Json(detail))
}

// ========== 管理员路由 ==========

/// 获取用户列表
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<PageParams>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ManageUsers)?;

    let (offset, limit) = params.clamped();
    let users = DatabaseQueries::new(&state.db).list_users(offset, limit).await?;
    let infos: Vec<_> = users.iter().map(User::info).collect();

    Ok(Json(infos))
}

/// 管理员建档用户（角色可任意指定）
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ManageUsers)?;

    let role: UserRole = payload.role.parse()?;
    let password_hash = auth::hash_password(&payload.password)?;

    let created = DatabaseQueries::new(&state.db)
        .create_user(&NewUser {
            username: payload.username,
            password_hash,
            role,
        })
        .await?;

    info!(
        admin_id = user.id,
        user_id = created.id,
        role = %created.role,
        "User created by admin"
    );

    Ok((StatusCode::CREATED, Json(created.info())))
}

/// 更新用户角色
pub async fn update_user_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(user_id): Path<i64>,
    Json(payload): Json<RoleUpdate>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ManageUsers)?;

    let role: UserRole = payload.role.parse()?;
    let updated = DatabaseQueries::new(&state.db)
        .update_user_role(user_id, role)
        .await?;

    info!(admin_id = user.id, user_id, role = %role, "User role updated");
    Ok(Json(updated.info()))
}

/// 全部分析的全局视图（分页）
pub async fn list_all_analyses(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<PageParams>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ViewSystemWide)?;

    let (offset, limit) = params.clamped();
    let analyses = state.workflow.list_all(offset, limit).await?;

    Ok(Json(analyses))
}

/// 模型反馈指标
pub async fn feedback_metrics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    authorize(user.role, &WorkflowAction::ViewSystemWide)?;

    let metrics = state.workflow.feedback_metrics().await?;
    Ok(Json(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_params_clamped() {
        let params = PageParams {
            offset: -5,
            limit: 0,
        };
        assert_eq!(params.clamped(), (0, 1));

        let params = PageParams {
            offset: 10,
            limit: 10_000,
        };
        assert_eq!(params.clamped(), (10, 200));

        let params = PageParams {
            offset: 0,
            limit: 50,
        };
        assert_eq!(params.clamped(), (0, 50));
    }
}
