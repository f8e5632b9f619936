use anyhow::Context;
use bytes::Bytes;
use tracing::{info, instrument};

use crate::{auth::repo::User, error::AppError, state::AppState};

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
const MAX_URL_LEN: usize = 2048;

/// One object per user so a re-upload overwrites the previous avatar.
pub fn avatar_key(user_id: i64) -> String {
    format!("avatars/user-{}", user_id)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.starts_with('/'))
        && !url.chars().any(char::is_whitespace)
}

/// Uploads to blob storage and returns the public URL.
pub async fn upload_image(
    st: &AppState,
    key: &str,
    body: Bytes,
    content_type: &str,
) -> anyhow::Result<String> {
    st.storage
        .put_object(key, body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(st.storage.object_url(key))
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn update_avatar(st: &AppState, user: &User, url: &str) -> Result<User, AppError> {
    let url = url.trim();
    if url.len() > MAX_URL_LEN || !is_http_url(url) {
        return Err(AppError::Validation(
            "avatar_url must be an absolute http(s) URL".into(),
        ));
    }
    let updated = st
        .users
        .set_avatar(user.id, url)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    info!("avatar url updated");
    Ok(updated)
}

#[instrument(skip(st, user, body), fields(user_id = user.id, size = body.len()))]
pub async fn upload_avatar(
    st: &AppState,
    user: &User,
    body: Bytes,
    content_type: &str,
) -> Result<User, AppError> {
    if ext_from_mime(content_type).is_none() {
        return Err(AppError::Validation(format!(
            "Unsupported image type: {content_type}"
        )));
    }
    if body.is_empty() {
        return Err(AppError::Validation("Image is empty".into()));
    }
    if body.len() > MAX_AVATAR_BYTES {
        return Err(AppError::Validation("Image exceeds 5 MiB".into()));
    }

    let url = upload_image(st, &avatar_key(user.id), body, content_type).await?;
    let updated = st
        .users
        .set_avatar(user.id, &url)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    info!(%url, "avatar uploaded");
    Ok(updated)
}
