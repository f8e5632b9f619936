use async_trait::async_trait;
use sqlx::PgPool;

pub use crate::contacts::repo_types::{Contact, ContactPatch, NewContact};
use crate::db::StoreResult;

/// Owner-scoped persistence for contacts. Every method filters on
/// `owner`, so a foreign contact behaves exactly like a missing one.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn list(&self, owner: i64, skip: i64, limit: i64) -> StoreResult<Vec<Contact>>;
    async fn get(&self, owner: i64, id: i64) -> StoreResult<Option<Contact>>;
    async fn insert(&self, owner: i64, contact: NewContact) -> StoreResult<Contact>;
    /// Locks the row, applies the patch, writes it back; one commit.
    async fn update(&self, owner: i64, id: i64, patch: ContactPatch)
        -> StoreResult<Option<Contact>>;
    async fn delete(&self, owner: i64, id: i64) -> StoreResult<bool>;
    /// Case-insensitive substring match on first name, last name or email.
    async fn search(&self, owner: i64, needle: &str) -> StoreResult<Vec<Contact>>;
    async fn with_birthdays(&self, owner: i64) -> StoreResult<Vec<Contact>>;
}

#[derive(Clone)]
pub struct PgContactStore {
    db: PgPool,
}

impl PgContactStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Escapes LIKE metacharacters so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn list(&self, owner: i64, skip: i64, limit: i64) -> StoreResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, first_name, last_name, email, phone, birthday, user_id
            FROM contacts
            WHERE user_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn get(&self, owner: i64, id: i64) -> StoreResult<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, first_name, last_name, email, phone, birthday, user_id
            FROM contacts
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn insert(&self, owner: i64, c: NewContact) -> StoreResult<Contact> {
        let row = sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (first_name, last_name, email, phone, birthday, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, first_name, last_name, email, phone, birthday, user_id
            "#,
        )
        .bind(&c.first_name)
        .bind(&c.last_name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(c.birthday)
        .bind(owner)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(
        &self,
        owner: i64,
        id: i64,
        patch: ContactPatch,
    ) -> StoreResult<Option<Contact>> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, first_name, last_name, email, phone, birthday, user_id
            FROM contacts
            WHERE id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?;

        // dropping `tx` rolls back
        let Some(mut contact) = current else {
            return Ok(None);
        };
        patch.apply(&mut contact);

        let updated = sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
               SET first_name = $3, last_name = $4, email = $5, phone = $6, birthday = $7
             WHERE id = $1 AND user_id = $2
            RETURNING id, first_name, last_name, email, phone, birthday, user_id
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(contact.birthday)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete(&self, owner: i64, id: i64) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM contacts WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn search(&self, owner: i64, needle: &str) -> StoreResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, first_name, last_name, email, phone, birthday, user_id
            FROM contacts
            WHERE user_id = $1
              AND (first_name ILIKE $2 ESCAPE '\'
                   OR last_name ILIKE $2 ESCAPE '\'
                   OR email ILIKE $2 ESCAPE '\')
            ORDER BY id
            "#,
        )
        .bind(owner)
        .bind(like_pattern(needle))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn with_birthdays(&self, owner: i64) -> StoreResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, first_name, last_name, email, phone, birthday, user_id
            FROM contacts
            WHERE user_id = $1 AND birthday IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
