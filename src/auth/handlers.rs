use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AvatarResponse, AvatarUpdate, LoginRequest, MessageResponse, SignupRequest,
            SignupResponse, TokenResponse, UserRead, VerifyEmailQuery,
        },
        extractors::{AuthUser, VerifiedUser},
        services::{self, VerifyOutcome},
    },
    avatars::{self, MAX_AVATAR_BYTES},
    error::AppError,
    rate_limit::RateLimited,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/verify-email", get(verify_email))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/account", delete(delete_account))
        .route(
            "/avatar",
            get(get_avatar).patch(set_avatar_url).post(upload_avatar),
        )
        // multipart framing on top of the image itself
        .layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 64 * 1024))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let reg = services::register(&state, &payload.username, &payload.email, &payload.password)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            access_token: reg.access_token,
            token_type: "bearer",
            pending_verification: true,
            verification_email_sent: reg.verification_email_sent,
            msg: "User created. Please check your email to verify your account.",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = services::login(&state, &payload.email, &payload.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

#[instrument(skip(state, q))]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(q): Query<VerifyEmailQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    let msg = match services::verify_email(&state, &q.token).await? {
        VerifyOutcome::Verified => "Email successfully verified",
        VerifyOutcome::AlreadyVerified => "Email already verified",
    };
    Ok(Json(MessageResponse { msg }))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(user): AuthUser, _limit: RateLimited) -> Json<UserRead> {
    Json(user.into())
}

#[instrument(skip_all)]
pub async fn get_avatar(AuthUser(user): AuthUser, _limit: RateLimited) -> Json<AvatarResponse> {
    Json(AvatarResponse {
        avatar: user.avatar,
    })
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn set_avatar_url(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Json(payload): Json<AvatarUpdate>,
) -> Result<Json<UserRead>, AppError> {
    let updated = avatars::update_avatar(&state, &user, &payload.avatar_url).await?;
    Ok(Json(updated.into()))
}

/// POST /avatar (multipart, field `file`)
#[instrument(skip(state, user, mp), fields(user_id = user.id))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    mut mp: Multipart,
) -> Result<Json<UserRead>, AppError> {
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        let updated = avatars::upload_avatar(&state, &user, data, &content_type).await?;
        return Ok(Json(updated.into()));
    }
    Err(AppError::Validation("file is required".into()))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, AppError> {
    services::delete_account(&state, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
