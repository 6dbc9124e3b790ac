//! 用户认证系统
//!
//! 密码使用bcrypt哈希（72字节上限内静默截断），
//! 会话令牌为HS256签名的JWT，携带用户ID与角色声明。

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use medcv_core::{MedcvError, Result, User, UserInfo, UserRole};
use medcv_database::{DatabasePool, DatabaseQueries};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;

/// bcrypt方案的密码字节数上限
const BCRYPT_MAX_PASSWORD_BYTES: usize = 72;

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // 用户ID（十进制字符串）
    pub role: String, // 角色
    pub exp: usize,   // 过期时间
    pub iat: usize,   // 签发时间
    pub jti: String,  // JWT ID
}

impl Claims {
    /// 解析令牌主体为用户ID
    ///
    /// 主体不是合法整数时属于硬性认证失败，绝不静默回落。
    pub fn subject_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| MedcvError::Unauthorized("令牌主体不是合法的用户ID".to_string()))
    }

    /// 解析角色声明为封闭枚举
    pub fn user_role(&self) -> Result<UserRole> {
        self.role
            .parse()
            .map_err(|_| MedcvError::Unauthorized("令牌角色声明非法".to_string()))
    }
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

/// 截断到bcrypt的72字节上限（静默截断，超长输入不报错）
fn truncate_password(password: &str) -> &[u8] {
    let bytes = password.as_bytes();
    &bytes[..bytes.len().min(BCRYPT_MAX_PASSWORD_BYTES)]
}

/// 哈希密码
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(truncate_password(password), bcrypt::DEFAULT_COST)
        .map_err(|e| MedcvError::Internal(format!("密码哈希失败: {e}")))
}

/// 校验密码；哈希损坏或不匹配一律返回false
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(truncate_password(password), password_hash).unwrap_or(false)
}

/// 认证服务
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    token_ttl_hours: i64,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, token_ttl_hours: i64) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl_hours,
        }
    }

    /// 签发会话令牌
    pub fn issue_token(&self, user: &User) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.token_ttl_hours);

        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.to_string(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| MedcvError::Internal(format!("令牌签发失败: {e}")))?;

        Ok((token, expires_at))
    }

    /// 解码令牌
    ///
    /// 签名不符、已过期或结构损坏一律返回None，从不抛错。
    pub fn decode_token(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .ok()
        .map(|data| data.claims)
    }

    /// 由令牌解析当前用户
    pub async fn resolve_current_user(&self, db: &DatabasePool, token: &str) -> Result<User> {
        let claims = self
            .decode_token(token)
            .ok_or_else(|| MedcvError::Unauthorized("令牌无效或已过期".to_string()))?;

        let user_id = claims.subject_id()?;
        claims.user_role()?;

        let user = DatabaseQueries::new(db)
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| MedcvError::Unauthorized("用户不存在".to_string()))?;

        if !user.is_active {
            return Err(MedcvError::Unauthorized("账号已停用".to_string()));
        }

        Ok(user)
    }

    /// 用户登录
    pub async fn login(
        &self,
        db: &DatabasePool,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse> {
        let user = DatabaseQueries::new(db)
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| MedcvError::Unauthorized("用户名或密码错误".to_string()))?;

        if !verify_password(password, &user.password_hash) {
            return Err(MedcvError::Unauthorized("用户名或密码错误".to_string()));
        }

        if !user.is_active {
            return Err(MedcvError::Unauthorized("账号已停用".to_string()));
        }

        let (access_token, expires_at) = self.issue_token(&user)?;

        Ok(LoginResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_at,
            user: user.info(),
        })
    }
}

/// 认证中间件
///
/// 提取Bearer令牌并解析当前用户，注入请求扩展；
/// 未认证请求在任何角色检查之前即以401失败。
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(value) if value.starts_with("Bearer ") => &value[7..],
        _ => {
            return Err(MedcvError::Unauthorized("缺少Bearer令牌".to_string()).into());
        }
    };

    let user = state.auth.resolve_current_user(&state.db, token).await?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_user(id: i64, role: UserRole) -> User {
        User {
            id,
            username: "dr_petrova".to_string(),
            password_hash: String::new(),
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn test_password_silent_truncation_beyond_72_bytes() {
        // 前72字节相同的两个超长密码在截断策略下等价
        let long_a = format!("{}AAAA", "x".repeat(72));
        let long_b = format!("{}BBBB", "x".repeat(72));

        let hash = hash_password(&long_a).unwrap();
        assert!(verify_password(&long_b, &hash));
    }

    #[test]
    fn test_verify_with_malformed_hash_is_false() {
        assert!(!verify_password("s3cret", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_token_roundtrip() {
        let service = AuthService::new("unit-test-secret", 24);
        let user = test_user(42, UserRole::Clinician);

        let (token, _expires_at) = service.issue_token(&user).unwrap();
        let claims = service.decode_token(&token).unwrap();

        assert_eq!(claims.subject_id().unwrap(), 42);
        assert_eq!(claims.user_role().unwrap(), UserRole::Clinician);
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let service = AuthService::new("unit-test-secret", 24);
        let other_service = AuthService::new("another-secret", 24);
        let user = test_user(1, UserRole::Admin);

        let (token, _) = service.issue_token(&user).unwrap();

        // 篡改载荷
        let mut tampered = token.clone();
        tampered.insert(10, 'x');
        assert!(service.decode_token(&tampered).is_none());

        // 其他密钥签发的令牌
        let (foreign, _) = other_service.issue_token(&user).unwrap();
        assert!(service.decode_token(&foreign).is_none());
    }

    #[test]
    fn test_expired_token_is_invalid() {
        // 负TTL使exp落在远早于当前的时刻（超出默认leeway）
        let service = AuthService::new("unit-test-secret", -2);
        let user = test_user(1, UserRole::Diagnostician);

        let (token, _) = service.issue_token(&user).unwrap();
        assert!(service.decode_token(&token).is_none());
    }

    #[test]
    fn test_malformed_subject_is_hard_failure() {
        let claims = Claims {
            sub: "not-a-number".to_string(),
            role: "admin".to_string(),
            exp: 0,
            iat: 0,
            jti: Uuid::new_v4().to_string(),
        };

        assert!(matches!(
            claims.subject_id(),
            Err(MedcvError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_invalid_role_claim_is_rejected() {
        let claims = Claims {
            sub: "1".to_string(),
            role: "superuser".to_string(),
            exp: 0,
            iat: 0,
            jti: Uuid::new_v4().to_string(),
        };

        assert!(matches!(
            claims.user_role(),
            Err(MedcvError::Unauthorized(_))
        ));
    }
}
