use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::error::ApiError;
use uuid::Uuid;

const ADMIN_SCOPE: &str = "shipments:admin";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: String,
    scope: String,
    iat: i64,
    exp: i64,
}

/// Proof of a verified operator login. Admin operations take this by
/// reference; there is no ambient "logged in" state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub username: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub fn mint_session(
    cfg: &SessionConfig,
    username: &str,
) -> Result<(String, AdminSession), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::seconds(cfg.ttl_seconds);
    let session_id = Uuid::new_v4();
    let claims = Claims {
        sub: username.to_string(),
        jti: session_id.to_string(),
        scope: ADMIN_SCOPE.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )?;
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .unwrap_or(exp);

    Ok((
        token,
        AdminSession {
            username: claims.sub,
            session_id,
            expires_at,
        },
    ))
}

pub fn verify_session(cfg: &SessionConfig, token: &str) -> Result<AdminSession, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::unauthorized(format!("invalid admin session: {e}")))?;

    let claims = data.claims;
    if claims.scope != ADMIN_SCOPE {
        return Err(ApiError::unauthorized("session does not grant admin access"));
    }
    let session_id = Uuid::parse_str(&claims.jti)
        .map_err(|_| ApiError::unauthorized("session id is malformed"))?;
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| ApiError::unauthorized("session expiry is malformed"))?;

    Ok(AdminSession {
        username: claims.sub,
        session_id,
        expires_at,
    })
}
