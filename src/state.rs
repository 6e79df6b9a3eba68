use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::Duration;

use crate::auth::{
    jwt::JwtKeys, mailer::LogMailer, password::Argon2Hasher, repo::PgAccountStore,
    services::AccountService,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self::from_parts(db, config))
    }

    /// Builds the production collaborator graph. Every lifecycle dependency is
    /// injected here; nothing is looked up through globals.
    pub fn from_parts(db: PgPool, config: Arc<AppConfig>) -> Self {
        let keys = JwtKeys::new(&config.jwt.secret, Duration::hours(config.jwt.ttl_hours));
        let accounts = Arc::new(AccountService::new(
            Arc::new(PgAccountStore::new(db.clone())),
            Arc::new(Argon2Hasher),
            Arc::new(keys),
            Arc::new(LogMailer::new(config.base_url.clone())),
        ));
        Self {
            db,
            config,
            accounts,
        }
    }
}
