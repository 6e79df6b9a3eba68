use async_trait::async_trait;
use tracing::info;

/// Out-of-band delivery of account messages. Fire-and-forget from the engine's
/// perspective: a failure is reported to the caller but the token persisted
/// before the send stays valid.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_activation(&self, email: &str, token: &str) -> anyhow::Result<()>;
    async fn send_password_reset(&self, email: &str, token: &str) -> anyhow::Result<()>;
}

/// Writes the messages to the log instead of an SMTP relay. Real delivery is a
/// deployment concern; the rendered links are what matter here.
pub struct LogMailer {
    base_url: String,
}

impl LogMailer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_activation(&self, email: &str, token: &str) -> anyhow::Result<()> {
        let link = format!("{}/api/auth/activate?token={}", self.base_url, token);
        info!(
            to = %email,
            subject = "Activate Your Account",
            %link,
            "activation email"
        );
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, token: &str) -> anyhow::Result<()> {
        let link = format!("{}/api/auth/change-password?token={}", self.base_url, token);
        info!(
            to = %email,
            subject = "Reset Your Password",
            %link,
            "password reset email, link expires in 1 hour"
        );
        Ok(())
    }
}
