//! Bearer-token authentication: extracts `tenant_id` and `role` claims.
//!
//! Grounded on `cyxcloud-gateway::auth` (`AuthConfig::from_env`,
//! `Claims`, `AuthService::validate_token`), generalized from the
//! teacher's user/node/api-key token types down to the single
//! tenant+role claim set `spec.md` §6 requires ("a bearer token whose
//! claims carry `tenant_id` and role; a role of administrator waives
//! tenant-equality checks").

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl From<AuthError> for GatewayError {
    fn from(_: AuthError) -> Self {
        GatewayError::Unauthorized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tenant,
    Administrator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub tenant_id: Uuid,
    pub role: Role,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Extracted identity for a request, per `spec.md` §6: "a bearer token
/// whose claims carry `tenant_id` and role".
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub role: Role,
    pub subject: String,
}

impl AuthContext {
    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }

    /// Enforce tenant equality unless the caller is an administrator.
    pub fn check_tenant(&self, tenant_id: Uuid) -> crate::error::Result<()> {
        if self.is_administrator() || self.tenant_id == tenant_id {
            Ok(())
        } else {
            Err(GatewayError::Forbidden("cross-tenant access denied".into()))
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue_token(&self, tenant_id: Uuid, role: Role, subject: &str) -> Result<String, AuthError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            tenant_id,
            role,
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(12)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(AuthContext {
            tenant_id: data.claims.tenant_id,
            role: data.claims.role,
            subject: data.claims.sub,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingToken)?;

        app_state
            .auth()
            .validate_token(token)
            .map_err(|_| GatewayError::Unauthorized)
    }
}
