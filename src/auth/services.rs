//! Identity service: registration, login, email verification and
//! resolving the caller behind an access token.

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        jwt::{JwtKeys, TokenKind},
        password::{hash_password_blocking, verify_dummy_blocking, verify_password_blocking},
        repo::{NewUser, User},
    },
    error::AppError,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_EMAIL_LEN: usize = 150;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const BAD_TOKEN: &str = "Could not validate credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    email.chars().count() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug)]
pub struct Registered {
    pub user: User,
    pub access_token: String,
    pub verification_email_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

fn validate_signup(username: &str, email: &str, password: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !(3..=100).contains(&len) {
        return Err(AppError::Validation(
            "Username must be between 3 and 100 characters".into(),
        ));
    }
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Creates an unverified user and emails a verification link. The user row
/// is committed before the notifier runs; a delivery failure is only logged.
#[instrument(skip(st, password))]
pub async fn register(
    st: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> Result<Registered, AppError> {
    let username = username.trim();
    let email = normalize_email(email);
    validate_signup(username, &email, password)?;

    if st.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AppError::Conflict("User with this email already exists".into()));
    }
    if st.users.find_by_username(username).await?.is_some() {
        warn!(%username, "username already taken");
        return Err(AppError::Conflict("Username is already taken".into()));
    }

    let password_hash = hash_password_blocking(password).await?;
    let user = st
        .users
        .create(NewUser {
            username: username.to_string(),
            email: email.clone(),
            password_hash,
        })
        .await?;
    info!(user_id = user.id, email = %user.email, "user registered");

    let keys = JwtKeys::from_ref(st);
    let verify_token = keys.issue_verification_token(&user.email)?;
    let link = format!(
        "{}/api/verify-email?token={}",
        st.config.public_base_url.trim_end_matches('/'),
        verify_token
    );
    let verification_email_sent = match st.notifier.send_verification_email(&user.email, &link).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, user_id = user.id, "verification email failed");
            false
        }
    };

    let access_token = keys.issue_access_token(&user.email)?;
    Ok(Registered {
        user,
        access_token,
        verification_email_sent,
    })
}

#[instrument(skip(st, password))]
pub async fn login(st: &AppState, email: &str, password: &str) -> Result<String, AppError> {
    let email = normalize_email(email);

    let Some(user) = st.users.find_by_email(&email).await? else {
        verify_dummy_blocking(password).await;
        warn!(%email, "login unknown email");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password_blocking(password, &user.password_hash).await? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    if !user.is_verified {
        warn!(user_id = user.id, "login before email verification");
        return Err(AppError::Forbidden("Email not verified".into()));
    }

    let token = JwtKeys::from_ref(st).issue_access_token(&user.email)?;
    info!(user_id = user.id, "user logged in");
    Ok(token)
}

#[instrument(skip(st, token))]
pub async fn verify_email(st: &AppState, token: &str) -> Result<VerifyOutcome, AppError> {
    let claims = JwtKeys::from_ref(st).decode_kind(token, TokenKind::Verify)?;

    let user = st
        .users
        .find_by_email(&claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if user.is_verified {
        return Ok(VerifyOutcome::AlreadyVerified);
    }

    st.users
        .mark_verified(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    info!(user_id = user.id, "email verified");
    Ok(VerifyOutcome::Verified)
}

/// Gate for every protected endpoint. All failures are `Unauthorized`.
pub async fn resolve_current_user(st: &AppState, token: &str) -> Result<User, AppError> {
    let claims = JwtKeys::from_ref(st)
        .decode_kind(token, TokenKind::Access)
        .map_err(|_| AppError::Unauthorized(BAD_TOKEN.into()))?;

    if claims.sub.is_empty() {
        return Err(AppError::Unauthorized(BAD_TOKEN.into()));
    }

    st.users
        .find_by_email(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized(BAD_TOKEN.into()))
}

/// Removes the account and its contacts, then the avatar object.
#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn delete_account(st: &AppState, user: &User) -> Result<(), AppError> {
    if !st.users.delete(user.id).await? {
        return Err(AppError::NotFound("User not found".into()));
    }
    info!("account deleted");

    if user.avatar.is_some() {
        let key = crate::avatars::avatar_key(user.id);
        if let Err(e) = st.storage.delete_object(&key).await {
            warn!(error = %e, %key, "avatar cleanup failed");
        }
    }
    Ok(())
}
