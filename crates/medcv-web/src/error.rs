//! HTTP错误映射

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use medcv_core::MedcvError;
use serde_json::json;

/// HTTP层错误包装
///
/// axum 的孤儿规则要求本地类型才能实现 `IntoResponse`，
/// 处理器统一返回 `ApiResult`，`?` 经 `From` 自动转换。
#[derive(Debug)]
pub struct ApiError(pub MedcvError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<MedcvError> for ApiError {
    fn from(e: MedcvError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MedcvError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MedcvError::Forbidden(_) => StatusCode::FORBIDDEN,
            MedcvError::NotFound(_) => StatusCode::NOT_FOUND,
            MedcvError::Conflict(_) => StatusCode::CONFLICT,
            MedcvError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            // 存储、推理、数据库等基础设施错误统一为服务端错误
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed with server error");
        }

        let body = Json(json!({ "error": self.0.to_string() }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: MedcvError) -> StatusCode {
        ApiError(e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(MedcvError::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(MedcvError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(MedcvError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(MedcvError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(MedcvError::InvalidInput("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(MedcvError::Storage("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(MedcvError::Upstream("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_carries_bearer_challenge() {
        let response = ApiError(MedcvError::Unauthorized("x".into())).into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }
}
