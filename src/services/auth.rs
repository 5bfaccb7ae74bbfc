use crate::db::UserDao;
use crate::error::{AppError, AppResult};
use crate::models::auth::{LoginRequest, LoginResponse, Session, User};
use crate::models::config::SecurityConfig;
use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    iat: usize,
}

/// Salted argon2 hash in PHC string form.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

pub struct AuthService {
    users: UserDao,
    config: SecurityConfig,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl AuthService {
    pub fn new(users: UserDao, config: SecurityConfig) -> Self {
        Self {
            users,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Session lifetime in seconds.
    pub fn session_length(&self, remember: bool) -> u64 {
        if remember {
            self.config.remember_timeout
        } else {
            self.config.session_timeout
        }
    }

    pub async fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let failed = || LoginResponse {
            success: false,
            message: "Login unsuccessful. Please check email and password".to_string(),
            token: None,
            expires_in: 0,
        };

        if req.password.len() > 128 {
            return Ok(failed());
        }

        let Some(user) = self.users.get_by_email(&req.email).await? else {
            warn!(email = %req.email, "Login for unknown email");
            return Ok(failed());
        };
        if !verify_password(&req.password, &user.password_hash) {
            warn!(user = user.id, "Login with wrong password");
            return Ok(failed());
        }

        let expires_in = self.session_length(req.remember());
        let token = self.issue(&user, expires_in).await?;
        info!(user = user.id, remember = req.remember(), "User logged in");

        Ok(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
            token: Some(token),
            expires_in,
        })
    }

    async fn issue(&self, user: &User, expires_in: u64) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in as i64);

        let claims = Claims {
            sub: user.id.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))?;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(
            token.clone(),
            Session {
                token: token.clone(),
                user_id: user.id,
                expires_at: exp,
            },
        );
        Ok(token)
    }

    /// Id of the user owning a live session.
    pub async fn verify_token(&self, token: &str) -> Result<i64> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Ok(token_data.claims.sub.parse()?),
            Some(_) => Err(anyhow!("Session expired")),
            None => Err(anyhow!("Session not found")),
        }
    }

    pub async fn current_user(&self, token: &str) -> Option<User> {
        let user_id = self.verify_token(token).await.ok()?;
        self.users.get_by_id(user_id).await.ok().flatten()
    }

    pub async fn logout(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
    }

    /// Drop every session of a user, e.g. after the account is deleted.
    pub async fn revoke_user(&self, user_id: i64) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| session.user_id != user_id);
    }
}
