use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::error::StoreError;
use crate::auth::repo_types::{NewAccount, User};

/// Persistence contract consumed by the account lifecycle engine.
///
/// Every state transition is a single conditional mutation: the WHERE clause
/// carries the guard (token still present, id known, stored hash unchanged) and
/// `None` means the guard did not hold. Two concurrent callers racing for the
/// same single-use token therefore see exactly one `Some`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `DuplicateEmail` when the email is already registered.
    async fn create(&self, account: NewAccount) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Marks the holder of `token` active and consumes the token. `None` when
    /// no row holds the token (unknown, or already used).
    async fn activate(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Attaches a reset token and its expiry to the account.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;

    /// Replaces the password and clears the reset token in one step, keyed on
    /// the token itself. `None` when the token was already redeemed.
    async fn redeem_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Replaces the password only while the stored hash still equals
    /// `expected_hash`. `None` when the account is unknown or the hash moved
    /// underneath the caller.
    async fn replace_password(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, password_hash, is_active, activation_token, reset_token, reset_token_expires, \
     created_at, updated_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Postgres-backed store.
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, account: NewAccount) -> Result<User, StoreError> {
        let query = format!(
            r#"
            INSERT INTO users (email, password_hash, activation_token)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.activation_token)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateEmail
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn activate(&self, token: &str) -> Result<Option<User>, StoreError> {
        let query = format!(
            r#"
            UPDATE users
            SET is_active = TRUE, activation_token = NULL, updated_at = now()
            WHERE activation_token = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let query = format!(
            r#"
            UPDATE users
            SET reset_token = $2, reset_token_expires = $3, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(token)
            .bind(expires_at)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn redeem_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let query = format!(
            r#"
            UPDATE users
            SET password_hash = $2, reset_token = NULL, reset_token_expires = NULL,
                updated_at = now()
            WHERE reset_token = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(token)
            .bind(new_password_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn replace_password(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let query = format!(
            r#"
            UPDATE users
            SET password_hash = $3, updated_at = now()
            WHERE id = $1 AND password_hash = $2
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(expected_hash)
            .bind(new_password_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}
