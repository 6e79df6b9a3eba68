use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
///
/// An account is either pending (`is_active` false, `activation_token` set) or
/// active (`is_active` true, `activation_token` cleared for good); the two
/// signals never contradict. `reset_token` and `reset_token_expires` are set
/// and cleared together.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub activation_token: Option<String>,
    pub reset_token: Option<String>,
    pub reset_token_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields the caller supplies at registration; everything else is assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub activation_token: String,
}
