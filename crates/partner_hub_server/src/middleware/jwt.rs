//! Bearer-token authentication.
//!
//! Verifies an HS256 JWT and inserts the resulting [`Principal`] into the
//! request extensions. Handlers pull it out with `Extension<Principal>`.

use axum::{
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use partner_hub_core::principal::{JwtClaims, Principal};

use crate::error::AppError;

#[derive(Clone)]
pub struct JwtConfig {
    key: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    /// HS256 with the shared secret. `exp` is checked when present; tokens
    /// minted without one are accepted.
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn principal_from_token(&self, token: &str) -> Result<Principal, AppError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;
        Principal::from_jwt_claims(&data.claims)
            .map_err(|e| AppError::Unauthorized(e.to_string()))
    }
}

pub async fn jwt_auth(
    Extension(config): Extension<JwtConfig>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let principal = config.principal_from_token(token.trim())?;
    tracing::debug!(actor = %principal.actor_id, roles = ?principal.roles, "authenticated");
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
