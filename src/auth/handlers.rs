use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            ActivateRequest, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            LoginResponse, MessageResponse, RegisterRequest, ResetPasswordRequest, UserSummary,
        },
        error::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_email(email: &str) -> Result<(), AuthError> {
    if !is_valid_email(email) {
        warn!(%email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }
    Ok(())
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/activate", post(activate))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/change-password", post(change_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/profile", get(profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    payload.email = payload.email.trim().to_string();
    check_email(&payload.email)?;
    check_password(&payload.password)?;

    state
        .accounts
        .register(&payload.email, &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Registration successful, please check your email to activate your account",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    payload.email = payload.email.trim().to_string();
    check_email(&payload.email)?;

    let outcome = state
        .accounts
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(LoginResponse {
        token: outcome.token,
        user: UserSummary::from(outcome.user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn activate(
    State(state): State<AppState>,
    Json(payload): Json<ActivateRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.accounts.activate(&payload.token).await?;
    Ok(Json(MessageResponse {
        message: "Account activated successfully, you can now login",
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.email = payload.email.trim().to_string();
    check_email(&payload.email)?;

    state.accounts.forgot_password(&payload.email).await?;
    Ok(Json(MessageResponse {
        message: "Password reset email sent, please check your email",
    }))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    check_password(&payload.new_password)?;

    state
        .accounts
        .change_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password changed successfully, you can now login with your new password",
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    check_password(&payload.new_password)?;

    state
        .accounts
        .reset_password(user_id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password reset successfully",
    }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserSummary>, AuthError> {
    let user = state.accounts.profile(user_id).await?;
    Ok(Json(UserSummary::from(user)))
}
