use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::workflow::{Actor, Role, SubRole};

#[derive(Deserialize)]
struct Claims {
    sub: i32,
    role: Role,
    subrole: Option<SubRole>,
    department: String,
    #[allow(dead_code)]
    exp: usize,
}

pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
    pub subrole: Option<SubRole>,
    pub department: String,
}

impl AuthUser {
    pub fn into_actor(self) -> Actor {
        Actor {
            user_id: self.user_id,
            role: self.role,
            subrole: self.subrole,
            department: self.department,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token_opt = if let Some(cookie_header) = parts.headers.get(axum::http::header::COOKIE) {
            let cookies = cookie_header.to_str().unwrap_or("");
            cookies.split(';').find_map(|c| {
                let c = c.trim();
                c.strip_prefix("auth_token=").map(|s| s.to_string())
            })
        } else if let Some(authz) = parts.headers.get(axum::http::header::AUTHORIZATION) {
            authz
                .to_str()
                .ok()
                .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.to_string()))
        } else {
            None
        };
        let token = token_opt.ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        Ok(AuthUser {
            user_id: decoded.claims.sub,
            role: decoded.claims.role,
            subrole: decoded.claims.subrole,
            department: decoded.claims.department,
        })
    }
}
