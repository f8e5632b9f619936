use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::{AuthUser, VerifiedUser},
    contacts::{
        dto::{BirthdayQuery, ContactCreate, ContactRead, ContactUpdate, Pagination, SearchQuery},
        services,
    },
    error::AppError,
    state::AppState,
};

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts/search", get(search_contacts))
        .route("/contacts/upcoming-birthdays", get(upcoming_birthdays))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route(
            "/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
}

// --- handlers ---

fn to_read(items: Vec<crate::contacts::repo::Contact>) -> Json<Vec<ContactRead>> {
    Json(items.into_iter().map(ContactRead::from).collect())
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<ContactRead>>, AppError> {
    let items = services::list(&state, &user, p.skip, p.limit).await?;
    Ok(to_read(items))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn get_contact(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ContactRead>, AppError> {
    let contact = services::get(&state, &user, id).await?;
    Ok(Json(contact.into()))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_contact(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Json(body): Json<ContactCreate>,
) -> Result<(StatusCode, HeaderMap, Json<ContactRead>), AppError> {
    let contact = services::create(&state, &user, body.into()).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/contacts/{}", contact.id)) {
        headers.insert(LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(contact.into())))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn update_contact(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Path(id): Path<i64>,
    Json(body): Json<ContactUpdate>,
) -> Result<Json<ContactRead>, AppError> {
    let contact = services::update(&state, &user, id, body.into()).await?;
    Ok(Json(contact.into()))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_contact(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    services::delete(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, q), fields(user_id = user.id))]
pub async fn search_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<ContactRead>>, AppError> {
    let items = services::search(&state, &user, &q.q).await?;
    Ok(to_read(items))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn upcoming_birthdays(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<BirthdayQuery>,
) -> Result<Json<Vec<ContactRead>>, AppError> {
    let items = services::upcoming_birthdays(&state, &user, q.days).await?;
    Ok(to_read(items))
}
