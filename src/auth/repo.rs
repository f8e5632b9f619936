use async_trait::async_trait;
use sqlx::PgPool;

pub use crate::auth::repo_types::{NewUser, User};
use crate::db::StoreResult;

/// Persistence for users. Every write is a single atomic commit.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    /// Fails with `StoreError::Duplicate` when email or username is taken.
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn mark_verified(&self, id: i64) -> StoreResult<Option<User>>;
    async fn set_avatar(&self, id: i64, avatar: &str) -> StoreResult<Option<User>>;
    /// Removes the user together with all of their contacts.
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, avatar, is_verified
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, avatar, is_verified
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, avatar, is_verified
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, is_verified)
            VALUES ($1, $2, $3, FALSE)
            RETURNING id, username, email, password_hash, avatar, is_verified
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn mark_verified(&self, id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET is_verified = TRUE
            WHERE id = $1
            RETURNING id, username, email, password_hash, avatar, is_verified
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_avatar(&self, id: i64, avatar: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET avatar = $2
            WHERE id = $1
            RETURNING id, username, email, password_hash, avatar, is_verified
            "#,
        )
        .bind(id)
        .bind(avatar)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM contacts WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }
}
