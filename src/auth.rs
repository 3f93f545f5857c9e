use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::workflow::{Role, SubRole};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub subrole: Option<SubRole>,
    pub department: String,
}

/// Login is portal-scoped: the caller states which portal (role, and for
/// finance which sub-role) they are signing into, and the stored account must
/// match.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub subrole: Option<SubRole>,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    role: Role,
    subrole: Option<SubRole>,
    department: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub subrole: Option<SubRole>,
    pub department: String,
}

pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<StatusCode> {
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::BadRequest("Email is required".into()));
    }
    if payload.department.trim().is_empty() {
        return Err(AppError::BadRequest("Department is required".into()));
    }
    // Finance accounts default to the APA sub-role; other roles carry none.
    let subrole = match payload.role {
        Role::Finance => Some(payload.subrole.unwrap_or(SubRole::Apa)),
        _ => None,
    };
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;
    let result = sqlx::query(
        "INSERT INTO users (name, email, password_hash, role, subrole, department) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(payload.name.trim())
    .bind(&email)
    .bind(hash.to_string())
    .bind(payload.role.as_str())
    .bind(subrole.map(|s| s.as_str()))
    .bind(payload.department.trim())
    .execute(&pool)
    .await;
    match result {
        Ok(_) => Ok(StatusCode::CREATED),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_email_key") {
                    return Err(AppError::BadRequest("Email already registered".into()));
                }
            }
            Err(AppError::Db(e))
        }
    }
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, &'static str)> {
    let email = payload.email.trim().to_lowercase();
    let rec = sqlx::query(
        "SELECT id, password_hash, role, subrole, department FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error while fetching user");
        AppError::Db(e)
    })?;
    let rec = rec.ok_or(AppError::Unauthorized)?;
    let id: i32 = rec.get("id");
    let pass_hash: String = rec.get("password_hash");
    let role_str: String = rec.get("role");
    let subrole_str: Option<String> = rec.get("subrole");
    let department: String = rec.get("department");
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }
    let role = Role::parse(&role_str)
        .ok_or_else(|| AppError::Message(format!("Unknown stored role: {role_str}")))?;
    let subrole = subrole_str.as_deref().and_then(SubRole::parse);

    // Account must match the portal being signed into.
    if role != payload.role || (role == Role::Finance && subrole != payload.subrole) {
        return Err(AppError::Forbidden);
    }

    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;
    let claims = Claims {
        sub: id,
        role,
        subrole,
        department,
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
            .parse()
            .expect("valid header value"),
    );
    Ok((headers, "Login successful"))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        "auth_token=deleted; HttpOnly; Path=/; Max-Age=0"
            .parse()
            .expect("valid header value"),
    );
    (headers, "Logged out")
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser {
        user_id,
        role,
        subrole,
        department,
    }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let rec = sqlx::query("SELECT name, email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user profile");
            AppError::Db(e)
        })?;
    let Some(row) = rec else {
        return Err(AppError::NotFound);
    };
    let name: String = row.get("name");
    let email: String = row.get("email");
    Ok(Json(UserInfo {
        id: user_id,
        name,
        email,
        role,
        subrole,
        department,
    }))
}
