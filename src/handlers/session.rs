//! Session cookie, flash messages and the logged-in user extractors.

use super::AppState;
use crate::error::AppError;
use crate::models::auth::User;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tower_cookies::{Cookie, Cookies};

pub const SESSION_COOKIE: &str = "session";
const FLASH_COOKIE: &str = "flash";

/// A one-shot message shown on the next rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flash {
    /// Bootstrap alert class: success, info, danger.
    pub category: String,
    pub message: String,
}

fn read_flashes(cookies: &Cookies) -> Vec<Flash> {
    cookies
        .get(FLASH_COOKIE)
        .and_then(|c| URL_SAFE_NO_PAD.decode(c.value()).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

pub fn flash(cookies: &Cookies, category: &str, message: impl Into<String>) {
    let mut flashes = read_flashes(cookies);
    flashes.push(Flash {
        category: category.to_string(),
        message: message.into(),
    });
    let Ok(json) = serde_json::to_vec(&flashes) else {
        return;
    };

    let cookie = Cookie::build((FLASH_COOKIE, URL_SAFE_NO_PAD.encode(json)))
        .http_only(true)
        .path("/");
    cookies.add(cookie.into());
}

/// Pending flashes; reading them clears the cookie.
pub fn take_flashes(cookies: &Cookies) -> Vec<Flash> {
    let flashes = read_flashes(cookies);
    if cookies.get(FLASH_COOKIE).is_some() {
        cookies.remove(Cookie::build((FLASH_COOKIE, "")).path("/").into());
    }
    flashes
}

fn session_cookie(token: String, max_age_secs: u64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .path("/")
        .max_age(tower_cookies::cookie::time::Duration::seconds(max_age_secs as i64))
        .into()
}

pub fn start_session(cookies: &Cookies, token: String, max_age_secs: u64, secure: bool) {
    cookies.add(session_cookie(token, max_age_secs, secure));
}

pub fn end_session(cookies: &Cookies) -> Option<String> {
    let token = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string());
    cookies.remove(Cookie::build((SESSION_COOKIE, "")).path("/").into());
    token
}

async fn session_user(cookies: &Cookies, state: &AppState) -> Option<User> {
    let token = cookies.get(SESSION_COOKIE)?;
    state.auth.current_user(token.value()).await
}

/// Only local paths are followed after login. Browsers treat `\` like
/// `/`, so `/\host` would leave the site.
pub fn safe_next(next: Option<&str>) -> Option<&str> {
    next.filter(|n| {
        n.starts_with('/') && !n.starts_with("//") && !n.contains('\\') && !n.chars().any(char::is_control)
    })
}

/// The logged-in user. Anyone else is sent to the login page, which
/// brings them back afterwards.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if let Some(user) = session_user(&cookies, state).await {
            return Ok(CurrentUser(user));
        }

        flash(&cookies, "info", "Please log in to access this page.");
        let next = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        Err(Redirect::to(&format!("/login?next={}", urlencoding::encode(next))).into_response())
    }
}

/// The logged-in user of a JSON request; anyone else gets a 401.
pub struct ApiUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for ApiUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| AppError::Internal(message.to_string()))?;
        session_user(&cookies, state)
            .await
            .map(ApiUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// The logged-in user, if any, for pages open to everyone.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Ok(cookies) = Cookies::from_request_parts(parts, state).await else {
            return Ok(MaybeUser(None));
        };
        Ok(MaybeUser(session_user(&cookies, state).await))
    }
}
