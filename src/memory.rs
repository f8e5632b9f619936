//! In-memory user and contact stores backing `AppState::fake()`.

use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    auth::repo::{NewUser, User, UserStore},
    contacts::repo::{Contact, ContactPatch, ContactStore, NewContact},
    db::{StoreError, StoreResult},
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    contacts: BTreeMap<i64, Contact>,
    next_user_id: i64,
    next_contact_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store poisoned")
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.tables().users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let mut t = self.tables();
        if t.users
            .values()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(StoreError::Duplicate);
        }
        t.next_user_id += 1;
        let row = User {
            id: t.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            avatar: None,
            is_verified: false,
        };
        t.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn mark_verified(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get_mut(&id).map(|u| {
            u.is_verified = true;
            u.clone()
        }))
    }

    async fn set_avatar(&self, id: i64, avatar: &str) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get_mut(&id).map(|u| {
            u.avatar = Some(avatar.to_string());
            u.clone()
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut t = self.tables();
        t.contacts.retain(|_, c| c.user_id != id);
        Ok(t.users.remove(&id).is_some())
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn list(&self, owner: i64, skip: i64, limit: i64) -> StoreResult<Vec<Contact>> {
        Ok(self
            .tables()
            .contacts
            .values()
            .filter(|c| c.user_id == owner)
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, owner: i64, id: i64) -> StoreResult<Option<Contact>> {
        Ok(self
            .tables()
            .contacts
            .get(&id)
            .filter(|c| c.user_id == owner)
            .cloned())
    }

    async fn insert(&self, owner: i64, c: NewContact) -> StoreResult<Contact> {
        let mut t = self.tables();
        t.next_contact_id += 1;
        let row = Contact {
            id: t.next_contact_id,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
            phone: c.phone,
            birthday: c.birthday,
            user_id: owner,
        };
        t.contacts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        owner: i64,
        id: i64,
        patch: ContactPatch,
    ) -> StoreResult<Option<Contact>> {
        let mut t = self.tables();
        Ok(t.contacts
            .get_mut(&id)
            .filter(|c| c.user_id == owner)
            .map(|c| {
                patch.apply(c);
                c.clone()
            }))
    }

    async fn delete(&self, owner: i64, id: i64) -> StoreResult<bool> {
        let mut t = self.tables();
        let owned = t.contacts.get(&id).is_some_and(|c| c.user_id == owner);
        if owned {
            t.contacts.remove(&id);
        }
        Ok(owned)
    }

    async fn search(&self, owner: i64, needle: &str) -> StoreResult<Vec<Contact>> {
        let needle = needle.to_lowercase();
        Ok(self
            .tables()
            .contacts
            .values()
            .filter(|c| c.user_id == owner)
            .filter(|c| {
                c.first_name.to_lowercase().contains(&needle)
                    || c.last_name.to_lowercase().contains(&needle)
                    || c.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn with_birthdays(&self, owner: i64) -> StoreResult<Vec<Contact>> {
        Ok(self
            .tables()
            .contacts
            .values()
            .filter(|c| c.user_id == owner && c.birthday.is_some())
            .cloned()
            .collect())
    }
}
