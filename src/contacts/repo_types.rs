use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::Date;

/// Contact record in the database; `user_id` is the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthday: Option<Date>,
    #[serde(skip_serializing)]
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub birthday: Option<Date>,
}

/// Partial update. `None` leaves a field untouched; `birthday: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<Option<Date>>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        *self == ContactPatch::default()
    }

    pub fn apply(self, contact: &mut Contact) {
        if let Some(v) = self.first_name {
            contact.first_name = v;
        }
        if let Some(v) = self.last_name {
            contact.last_name = v;
        }
        if let Some(v) = self.email {
            contact.email = v;
        }
        if let Some(v) = self.phone {
            contact.phone = v;
        }
        if let Some(v) = self.birthday {
            contact.birthday = v;
        }
    }
}
