//! Owner-scoped contact operations. Every call takes the authenticated user
//! and never touches another user's rows; a foreign id is `NotFound`.

use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    auth::{repo::User, services::is_valid_email},
    contacts::{
        birthdays::{is_upcoming, next_occurrence, MAX_WINDOW_DAYS},
        repo::{Contact, ContactPatch, NewContact},
    },
    error::AppError,
    state::AppState,
};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 30;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_QUERY_LEN: usize = 100;

fn not_found() -> AppError {
    AppError::NotFound("Contact not found".into())
}

fn check_text(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

fn check_email(value: &str) -> Result<(), AppError> {
    if !is_valid_email(value) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(())
}

fn trimmed(s: String) -> String {
    s.trim().to_string()
}

fn validate_new(c: NewContact) -> Result<NewContact, AppError> {
    let c = NewContact {
        first_name: trimmed(c.first_name),
        last_name: trimmed(c.last_name),
        email: trimmed(c.email),
        phone: trimmed(c.phone),
        birthday: c.birthday,
    };
    check_text("first_name", &c.first_name, MAX_NAME_LEN)?;
    check_text("last_name", &c.last_name, MAX_NAME_LEN)?;
    check_email(&c.email)?;
    check_text("phone", &c.phone, MAX_PHONE_LEN)?;
    Ok(c)
}

fn validate_patch(p: ContactPatch) -> Result<ContactPatch, AppError> {
    let p = ContactPatch {
        first_name: p.first_name.map(trimmed),
        last_name: p.last_name.map(trimmed),
        email: p.email.map(trimmed),
        phone: p.phone.map(trimmed),
        birthday: p.birthday,
    };
    if let Some(v) = &p.first_name {
        check_text("first_name", v, MAX_NAME_LEN)?;
    }
    if let Some(v) = &p.last_name {
        check_text("last_name", v, MAX_NAME_LEN)?;
    }
    if let Some(v) = &p.email {
        check_email(v)?;
    }
    if let Some(v) = &p.phone {
        check_text("phone", v, MAX_PHONE_LEN)?;
    }
    Ok(p)
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn list(st: &AppState, user: &User, skip: i64, limit: i64) -> Result<Vec<Contact>, AppError> {
    if skip < 0 {
        return Err(AppError::Validation("skip must not be negative".into()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(st.contacts.list(user.id, skip, limit).await?)
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn get(st: &AppState, user: &User, id: i64) -> Result<Contact, AppError> {
    st.contacts.get(user.id, id).await?.ok_or_else(not_found)
}

#[instrument(skip(st, user, fields), fields(user_id = user.id))]
pub async fn create(st: &AppState, user: &User, fields: NewContact) -> Result<Contact, AppError> {
    let fields = validate_new(fields)?;
    let contact = st.contacts.insert(user.id, fields).await?;
    info!(contact_id = contact.id, "contact created");
    Ok(contact)
}

#[instrument(skip(st, user, patch), fields(user_id = user.id))]
pub async fn update(
    st: &AppState,
    user: &User,
    id: i64,
    patch: ContactPatch,
) -> Result<Contact, AppError> {
    let patch = validate_patch(patch)?;
    if patch.is_empty() {
        return get(st, user, id).await;
    }
    let contact = st
        .contacts
        .update(user.id, id, patch)
        .await?
        .ok_or_else(not_found)?;
    info!(contact_id = contact.id, "contact updated");
    Ok(contact)
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn delete(st: &AppState, user: &User, id: i64) -> Result<(), AppError> {
    if !st.contacts.delete(user.id, id).await? {
        return Err(not_found());
    }
    info!(contact_id = id, "contact deleted");
    Ok(())
}

#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn search(st: &AppState, user: &User, query: &str) -> Result<Vec<Contact>, AppError> {
    let query = query.trim();
    if query.chars().count() > MAX_QUERY_LEN {
        return Err(AppError::Validation(format!(
            "q must be at most {MAX_QUERY_LEN} characters"
        )));
    }
    Ok(st.contacts.search(user.id, query).await?)
}

pub async fn upcoming_birthdays(
    st: &AppState,
    user: &User,
    window_days: i64,
) -> Result<Vec<Contact>, AppError> {
    let today = OffsetDateTime::now_utc().date();
    upcoming_birthdays_on(st, user, today, window_days).await
}

/// Contacts whose next birthday falls in `[today, today + window_days]`,
/// soonest first.
#[instrument(skip(st, user), fields(user_id = user.id))]
pub async fn upcoming_birthdays_on(
    st: &AppState,
    user: &User,
    today: time::Date,
    window_days: i64,
) -> Result<Vec<Contact>, AppError> {
    if !(0..=MAX_WINDOW_DAYS).contains(&window_days) {
        return Err(AppError::Validation(format!(
            "days must be between 0 and {MAX_WINDOW_DAYS}"
        )));
    }

    let mut hits: Vec<_> = st
        .contacts
        .with_birthdays(user.id)
        .await?
        .into_iter()
        .filter_map(|c| {
            let birthday = c.birthday?;
            is_upcoming(birthday, today, window_days)
                .then(|| (next_occurrence(birthday, today), c))
        })
        .collect();
    hits.sort_by(|(a, ca), (b, cb)| a.cmp(b).then(ca.id.cmp(&cb.id)));
    Ok(hits.into_iter().map(|(_, c)| c).collect())
}
