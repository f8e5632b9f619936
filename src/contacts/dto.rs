use serde::{Deserialize, Deserializer, Serialize};
use time::Date;

use crate::contacts::repo_types::{Contact, ContactPatch, NewContact};

/// Request body for `POST /contacts`.
#[derive(Debug, Deserialize)]
pub struct ContactCreate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub birthday: Option<Date>,
}

/// Request body for `PUT /contacts/{id}`; only the keys present are applied.
#[derive(Debug, Default, Deserialize)]
pub struct ContactUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub birthday: Option<Option<Date>>,
}

/// Distinguishes an explicit `null` (Some(None)) from an absent key (None).
fn present<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

#[derive(Debug, Serialize)]
pub struct ContactRead {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthday: Option<Date>,
}

impl From<Contact> for ContactRead {
    fn from(c: Contact) -> Self {
        Self {
            id: c.id,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
            phone: c.phone,
            birthday: c.birthday,
        }
    }
}

impl From<ContactCreate> for NewContact {
    fn from(c: ContactCreate) -> Self {
        Self {
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
            phone: c.phone,
            birthday: c.birthday,
        }
    }
}

impl From<ContactUpdate> for ContactPatch {
    fn from(u: ContactUpdate) -> Self {
        Self {
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            phone: u.phone,
            birthday: u.birthday,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}
fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct BirthdayQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}
fn default_days() -> i64 {
    crate::contacts::birthdays::DEFAULT_WINDOW_DAYS
}
