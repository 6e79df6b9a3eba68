use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{
    error::{AuthError, StoreError},
    jwt::TokenIssuer,
    mailer::Mailer,
    password::PasswordHasher,
    repo::AccountStore,
    repo_types::{NewAccount, User},
};

const RESET_TOKEN_TTL: Duration = Duration::hours(1);

/// 32 random bytes from the OS CSPRNG, hex-encoded. Used for both activation
/// and reset tokens.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: String,
    pub user: User,
}

/// Account lifecycle engine: registration, activation, login and the three
/// password flows, orchestrated over injected collaborators.
///
/// Within each operation the store mutation always runs before the
/// notification, so a token exists before it is advertised. The engine keeps no
/// mutable state of its own; one instance serves all requests concurrently.
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    mailer: Arc<dyn Mailer>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenIssuer>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            mailer,
        }
    }

    /// Creates a pending account and emails its activation token.
    ///
    /// A notification failure is returned as an error, but the account and its
    /// token are already persisted and stay valid.
    pub async fn register(&self, email: &str, password: &str) -> Result<(), AuthError> {
        if self.store.find_by_email(email).await?.is_some() {
            warn!(%email, "registration for taken email");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash(password).map_err(AuthError::Internal)?;
        let activation_token = generate_token();

        let user = self
            .store
            .create(NewAccount {
                email: email.to_string(),
                password_hash,
                activation_token: activation_token.clone(),
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;

        info!(user_id = %user.id, %email, "user registered, pending activation");

        self.mailer
            .send_activation(email, &activation_token)
            .await
            .map_err(AuthError::Notification)
    }

    /// Consumes an activation token, transitioning the account to active.
    /// A token can be spent once; replays fail like unknown tokens.
    pub async fn activate(&self, token: &str) -> Result<User, AuthError> {
        match self.store.activate(token).await? {
            Some(user) => {
                info!(user_id = %user.id, "account activated");
                Ok(user)
            }
            None => {
                warn!("activation with unknown or spent token");
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Verifies credentials and issues a bearer token.
    ///
    /// Unknown email and wrong password produce the identical error. The
    /// activation check runs only after the password verified, so activation
    /// status is revealed to correct-password holders only.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let user = match self.store.find_by_email(email).await? {
            Some(u) => u,
            None => {
                warn!(%email, "login with unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.hasher.verify(&user.password_hash, password) {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login before activation");
            return Err(AuthError::NotActivated);
        }

        let token = self.tokens.issue(user.id).map_err(AuthError::Internal)?;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome { token, user })
    }

    /// Attaches a one-hour reset token to the account and emails it.
    ///
    /// Unlike login, this path reports whether the email is known.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AuthError::NotFound)?;

        let token = generate_token();
        let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;

        self.store
            .set_reset_token(user.id, &token, expires_at)
            .await?
            .ok_or(AuthError::NotFound)?;

        info!(user_id = %user.id, "password reset token issued");

        self.mailer
            .send_password_reset(email, &token)
            .await
            .map_err(AuthError::Notification)
    }

    /// Redeems a reset token for a new password (the unauthenticated path).
    ///
    /// The token is checked for expiry before the new password is hashed; the
    /// redemption itself is keyed on the token, so of two concurrent calls with
    /// the same token exactly one succeeds.
    pub async fn change_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_reset_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if let Some(expires_at) = user.reset_token_expires {
            if expires_at < OffsetDateTime::now_utc() {
                warn!(user_id = %user.id, "reset token past expiry");
                return Err(AuthError::TokenExpired);
            }
        }

        let new_hash = self.hasher.hash(new_password).map_err(AuthError::Internal)?;

        match self.store.redeem_reset_token(token, &new_hash).await? {
            Some(user) => {
                info!(user_id = %user.id, "password changed via reset token");
                Ok(())
            }
            None => Err(AuthError::InvalidToken),
        }
    }

    /// Replaces the password for an authenticated user (old password required).
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.hasher.verify(&user.password_hash, old_password) {
            warn!(user_id = %user.id, "password reset with wrong old password");
            return Err(AuthError::InvalidOldPassword);
        }

        let new_hash = self.hasher.hash(new_password).map_err(AuthError::Internal)?;

        // Guarded on the hash we just verified; if another writer got there
        // first the verification no longer holds.
        match self
            .store
            .replace_password(user.id, &user.password_hash, &new_hash)
            .await?
        {
            Some(user) => {
                info!(user_id = %user.id, "password reset");
                Ok(())
            }
            None => Err(AuthError::InvalidOldPassword),
        }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtKeys;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MemoryAccountStore {
        users: Mutex<Vec<User>>,
    }

    impl MemoryAccountStore {
        fn new() -> Self {
            Self {
                users: Mutex::new(Vec::new()),
            }
        }

        fn get_by_email(&self, email: &str) -> Option<User> {
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned()
        }

        fn backdate_reset_expiry(&self, email: &str, ago: Duration) {
            let mut users = self.users.lock().unwrap();
            let user = users.iter_mut().find(|u| u.email == email).unwrap();
            user.reset_token_expires = Some(OffsetDateTime::now_utc() - ago);
        }
    }

    #[async_trait]
    impl AccountStore for MemoryAccountStore {
        async fn create(&self, account: NewAccount) -> Result<User, StoreError> {
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.email == account.email) {
                return Err(StoreError::DuplicateEmail);
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                email: account.email,
                password_hash: account.password_hash,
                is_active: false,
                activation_token: Some(account.activation_token),
                reset_token: None,
                reset_token_expires: None,
                created_at: now,
                updated_at: now,
            };
            users.push(user.clone());
            Ok(user)
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            Ok(self.get_by_email(email))
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            let users = self.users.lock().unwrap();
            Ok(users.iter().find(|u| u.id == id).cloned())
        }

        async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
            let users = self.users.lock().unwrap();
            Ok(users
                .iter()
                .find(|u| u.reset_token.as_deref() == Some(token))
                .cloned())
        }

        async fn activate(&self, token: &str) -> Result<Option<User>, StoreError> {
            let mut users = self.users.lock().unwrap();
            match users
                .iter_mut()
                .find(|u| u.activation_token.as_deref() == Some(token))
            {
                Some(user) => {
                    user.is_active = true;
                    user.activation_token = None;
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(Some(user.clone()))
                }
                None => Ok(None),
            }
        }

        async fn set_reset_token(
            &self,
            id: Uuid,
            token: &str,
            expires_at: OffsetDateTime,
        ) -> Result<Option<User>, StoreError> {
            let mut users = self.users.lock().unwrap();
            match users.iter_mut().find(|u| u.id == id) {
                Some(user) => {
                    user.reset_token = Some(token.to_string());
                    user.reset_token_expires = Some(expires_at);
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(Some(user.clone()))
                }
                None => Ok(None),
            }
        }

        async fn redeem_reset_token(
            &self,
            token: &str,
            new_password_hash: &str,
        ) -> Result<Option<User>, StoreError> {
            let mut users = self.users.lock().unwrap();
            match users
                .iter_mut()
                .find(|u| u.reset_token.as_deref() == Some(token))
            {
                Some(user) => {
                    user.password_hash = new_password_hash.to_string();
                    user.reset_token = None;
                    user.reset_token_expires = None;
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(Some(user.clone()))
                }
                None => Ok(None),
            }
        }

        async fn replace_password(
            &self,
            id: Uuid,
            expected_hash: &str,
            new_password_hash: &str,
        ) -> Result<Option<User>, StoreError> {
            let mut users = self.users.lock().unwrap();
            match users
                .iter_mut()
                .find(|u| u.id == id && u.password_hash == expected_hash)
            {
                Some(user) => {
                    user.password_hash = new_password_hash.to_string();
                    user.updated_at = OffsetDateTime::now_utc();
                    Ok(Some(user.clone()))
                }
                None => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct CapturingMailer {
        activations: Mutex<Vec<(String, String)>>,
        resets: Mutex<Vec<(String, String)>>,
    }

    impl CapturingMailer {
        fn last_activation_token(&self) -> String {
            self.activations.lock().unwrap().last().unwrap().1.clone()
        }

        fn last_reset_token(&self) -> String {
            self.resets.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send_activation(&self, email: &str, token: &str) -> anyhow::Result<()> {
            self.activations
                .lock()
                .unwrap()
                .push((email.to_string(), token.to_string()));
            Ok(())
        }

        async fn send_password_reset(&self, email: &str, token: &str) -> anyhow::Result<()> {
            self.resets
                .lock()
                .unwrap()
                .push((email.to_string(), token.to_string()));
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send_activation(&self, _email: &str, _token: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp relay unreachable")
        }

        async fn send_password_reset(&self, _email: &str, _token: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp relay unreachable")
        }
    }

    /// Deterministic stand-in so engine tests don't pay the argon2 cost; the
    /// real hasher has its own tests.
    struct PlainHasher;

    impl PasswordHasher for PlainHasher {
        fn hash(&self, plain: &str) -> anyhow::Result<String> {
            Ok(format!("hashed:{plain}"))
        }

        fn verify(&self, hash: &str, plain: &str) -> bool {
            hash == format!("hashed:{plain}")
        }
    }

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::hours(24))
    }

    fn service() -> (
        AccountService,
        Arc<MemoryAccountStore>,
        Arc<CapturingMailer>,
    ) {
        let store = Arc::new(MemoryAccountStore::new());
        let mailer = Arc::new(CapturingMailer::default());
        let svc = AccountService::new(
            store.clone(),
            Arc::new(PlainHasher),
            Arc::new(keys()),
            mailer.clone(),
        );
        (svc, store, mailer)
    }

    #[tokio::test]
    async fn register_creates_pending_account_and_notifies() {
        let (svc, store, mailer) = service();
        svc.register("a@x.com", "secret1").await.expect("register");

        let user = store.get_by_email("a@x.com").expect("persisted");
        assert!(!user.is_active);
        assert!(user.activation_token.is_some());
        assert_eq!(user.activation_token.as_deref().unwrap().len(), 64);
        assert_eq!(mailer.activations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_rejects_taken_email() {
        let (svc, _, _) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        let err = svc.register("a@x.com", "other").await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn login_before_activation_fails_after_activation_succeeds() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();

        let err = svc.login("a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::NotActivated));

        let activated = svc.activate(&mailer.last_activation_token()).await.unwrap();
        assert!(activated.is_active);
        assert!(activated.activation_token.is_none());

        let outcome = svc.login("a@x.com", "secret1").await.unwrap();
        assert!(!outcome.token.is_empty());
        assert!(outcome.user.is_active);
    }

    #[tokio::test]
    async fn activation_token_is_single_use() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        let token = mailer.last_activation_token();

        svc.activate(&token).await.expect("first use");
        let err = svc.activate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn login_failure_does_not_reveal_account_existence() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.activate(&mailer.last_activation_token()).await.unwrap();

        let unknown = svc.login("nobody@x.com", "secret1").await.unwrap_err();
        let wrong = svc.login("a@x.com", "wrong").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn forgot_password_reveals_unknown_email() {
        let (svc, _, _) = service();
        let err = svc.forgot_password("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn forgot_then_change_password_rotates_the_credential() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.activate(&mailer.last_activation_token()).await.unwrap();

        svc.forgot_password("a@x.com").await.unwrap();
        let reset = mailer.last_reset_token();
        svc.change_password(&reset, "newpass1").await.unwrap();

        let old = svc.login("a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(old, AuthError::InvalidCredentials));
        svc.login("a@x.com", "newpass1").await.expect("new password");
    }

    #[tokio::test]
    async fn change_password_clears_the_reset_token() {
        let (svc, store, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.forgot_password("a@x.com").await.unwrap();
        svc.change_password(&mailer.last_reset_token(), "newpass1")
            .await
            .unwrap();

        let user = store.get_by_email("a@x.com").unwrap();
        assert!(user.reset_token.is_none());
        assert!(user.reset_token_expires.is_none());
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let (svc, store, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.forgot_password("a@x.com").await.unwrap();

        store.backdate_reset_expiry("a@x.com", Duration::minutes(1));
        let err = svc
            .change_password(&mailer.last_reset_token(), "newpass1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn reset_token_near_expiry_still_works() {
        let (svc, store, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.forgot_password("a@x.com").await.unwrap();

        // Simulate 59 of the 60 minutes having passed.
        {
            let mut users = store.users.lock().unwrap();
            let user = users.iter_mut().find(|u| u.email == "a@x.com").unwrap();
            user.reset_token_expires = Some(OffsetDateTime::now_utc() + Duration::minutes(1));
        }
        svc.change_password(&mailer.last_reset_token(), "newpass1")
            .await
            .expect("token still inside its window");
    }

    #[tokio::test]
    async fn concurrent_reset_token_redemption_has_one_winner() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.forgot_password("a@x.com").await.unwrap();
        let token = mailer.last_reset_token();

        let (a, b) = tokio::join!(
            svc.change_password(&token, "winner-pw"),
            svc.change_password(&token, "loser-pw"),
        );
        let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1);
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser.unwrap_err(), AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn notifier_failure_keeps_the_registered_account() {
        let store = Arc::new(MemoryAccountStore::new());
        let svc = AccountService::new(
            store.clone(),
            Arc::new(PlainHasher),
            Arc::new(keys()),
            Arc::new(FailingMailer),
        );

        let err = svc.register("a@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::Notification(_)));

        // The account persisted and its activation token stays redeemable.
        let user = store.get_by_email("a@x.com").expect("persisted");
        let token = user.activation_token.expect("token kept");
        svc.activate(&token).await.expect("token still valid");
    }

    #[tokio::test]
    async fn authenticated_reset_requires_the_old_password() {
        let (svc, _, mailer) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        svc.activate(&mailer.last_activation_token()).await.unwrap();
        let user = svc.login("a@x.com", "secret1").await.unwrap().user;

        let err = svc
            .reset_password(user.id, "wrong-old", "newpass1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOldPassword));

        svc.reset_password(user.id, "secret1", "newpass1")
            .await
            .unwrap();
        svc.login("a@x.com", "newpass1").await.expect("rotated");
    }

    #[tokio::test]
    async fn reset_password_for_unknown_user_is_not_found() {
        let (svc, _, _) = service();
        let err = svc
            .reset_password(Uuid::new_v4(), "old", "new")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn profile_returns_the_account() {
        let (svc, store, _) = service();
        svc.register("a@x.com", "secret1").await.unwrap();
        let id = store.get_by_email("a@x.com").unwrap().id;

        let user = svc.profile(id).await.unwrap();
        assert_eq!(user.email, "a@x.com");

        let err = svc.profile(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    // Same end-to-end scenario as above, but through the production hasher.
    #[tokio::test]
    async fn full_lifecycle_with_argon2() {
        use crate::auth::password::Argon2Hasher;

        let store = Arc::new(MemoryAccountStore::new());
        let mailer = Arc::new(CapturingMailer::default());
        let svc = AccountService::new(
            store,
            Arc::new(Argon2Hasher),
            Arc::new(keys()),
            mailer.clone(),
        );

        svc.register("a@x.com", "secret1").await.unwrap();
        svc.activate(&mailer.last_activation_token()).await.unwrap();
        svc.login("a@x.com", "secret1").await.expect("login");

        svc.forgot_password("a@x.com").await.unwrap();
        svc.change_password(&mailer.last_reset_token(), "newpass1")
            .await
            .unwrap();
        assert!(svc.login("a@x.com", "secret1").await.is_err());
        svc.login("a@x.com", "newpass1").await.expect("new login");
    }
}
