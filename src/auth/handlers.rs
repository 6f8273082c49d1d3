use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use crate::auth::{AuthenticatedAccount, Session};
use crate::config::CookieConfig;
use crate::error::AppError;
use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for AuthResponse {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            token_type: session.token_type.to_string(),
            user_id: session.account.id,
            email: session.account.email.clone(),
            full_name: session.account.display_name.clone(),
            expires_at: session.access_token_expires_at,
        }
    }
}

/// Mount the `/api/auth` endpoints.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh-token", web::post().to(refresh_token))
            .route("/logout", web::post().to(logout))
            .route("/logout-all", web::post().to(logout_all)),
    );
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::ValidationError("A valid email is required".into())),
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::ValidationError("Password is required".into()));
    }
    Ok(())
}

fn refresh_cookie(config: &CookieConfig, session: &Session) -> Cookie<'static> {
    let max_age = (session.refresh_token_expires_at - Utc::now()).num_seconds().max(0);
    Cookie::build(config.name.clone(), session.refresh_token.clone())
        .path(config.path.clone())
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age))
        .finish()
}

fn removal_cookie(config: &CookieConfig) -> Cookie<'static> {
    let mut cookie = Cookie::build(config.name.clone(), "")
        .path(config.path.clone())
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .finish();
    cookie.make_removal();
    cookie
}

fn session_response(state: &AppState, message: &str, session: &Session) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(refresh_cookie(&state.config.cookie, session))
        .json(ApiResponse::success(message, AuthResponse::from(session)))
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for email: {}", req.email);
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    if req.full_name.trim().is_empty() {
        return Err(AppError::ValidationError("Full name is required".into()));
    }

    match state.sessions.register(&req.email, &req.password, req.full_name.trim()).await {
        Ok(session) => Ok(session_response(
            &state,
            "User registered successfully. Please check your email to verify your account.",
            &session,
        )),
        Err(e) => {
            log_rejection("Registration", &req.email, &e);
            Err(e)
        }
    }
}

/// Credential and lockout outcomes are routine; only infrastructure faults are errors.
fn rejection_level(err: &AppError) -> Level {
    match err {
        AppError::AuthError(_) | AppError::ValidationError(_) => Level::WARN,
        _ => Level::ERROR,
    }
}

fn log_rejection(action: &str, email: &str, err: &AppError) {
    if rejection_level(err) == Level::WARN {
        warn!("{} rejected for email: {}: {}", action, email, err);
    } else {
        error!("{} failed for email: {}: {}", action, email, err);
    }
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for email: {}", req.email);
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    match state.sessions.login(&req.email, &req.password).await {
        Ok(session) => {
            info!("Login successful for email: {}", req.email);
            Ok(session_response(&state, "Login successful", &session))
        }
        Err(e) => {
            log_rejection("Login", &req.email, &e);
            Err(e)
        }
    }
}

pub async fn refresh_token(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    // Cookie first, JSON body for non-browser clients
    let token = req
        .cookie(&state.config.cookie.name)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|b| b.into_inner().refresh_token))
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error("Refresh token is missing")));
    };

    let session = state.sessions.refresh(&token).await?;
    Ok(session_response(&state, "Token refreshed", &session))
}

pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if let Some(cookie) = req.cookie(&state.config.cookie.name) {
        state.sessions.logout(cookie.value()).await?;
    }

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(&state.config.cookie))
        .json(ApiResponse::message("Successfully logged out")))
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

pub async fn logout_all(
    account: AuthenticatedAccount,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let revoked = state.sessions.logout_everywhere(account.account_id).await?;
    info!("Account {} logged out everywhere", account.account_id);

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(&state.config.cookie))
        .json(ApiResponse::success("Logged out from all devices", LogoutAllResponse { revoked })))
}
