use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::time::Duration;

use super::ServiceError;
use crate::config::SmtpConfig;
use crate::models::InviteRole;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Deliver the signup link for an invite. The invite operation that asked
    /// for delivery treats a failure here as fatal and rolls back.
    async fn send_invite_email(
        &self,
        to_email: &str,
        role: InviteRole,
        invite_token: &str,
        base_url: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| ServiceError::Internal(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| ServiceError::Internal(e.into()),
            )?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| ServiceError::Internal(e.into()))?;

        // Send in the blocking pool; SmtpTransport is synchronous
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(
                    to = %to_email,
                    subject = %subject,
                    "Email sent successfully"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e.to_string(),
                    to = %to_email,
                    "Failed to send email"
                );
                Err(ServiceError::Email(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_invite_email(
        &self,
        to_email: &str,
        role: InviteRole,
        invite_token: &str,
        base_url: &str,
    ) -> Result<(), ServiceError> {
        let invite_link = format!("{}/signup?invite={}", base_url, invite_token);

        let html_body = format!(
            r###"            <html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>You've been invited to join as a {role}</h2>
                    <p>Click the link below to create your account:</p>
                    <p>
                        <a href="{link}" style="background-color: #4CAF50; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                            Accept Invitation
                        </a>
                    </p>
                    <p style="color: #666; font-size: 12px;">
                        This link will expire in 7 days. If you weren't expecting this invitation, please ignore this email.
                    </p>
                </body>
            </html>
            "###,
            role = role.as_str(),
            link = invite_link
        );

        let plain_body = format!(
            "You've been invited to join as a {}\n\nVisit the following link to create your account:\n\n{}\n\nThis link will expire in 7 days. If you weren't expecting this invitation, please ignore this email.",
            role.as_str(),
            invite_link
        );

        self.send_email(to_email, "You're invited", &plain_body, &html_body)
            .await
    }
}

/// Test double. Records deliveries and can be told to fail, which the
/// orchestrator must turn into a rollback.
#[derive(Default)]
pub struct MockEmailService {
    pub fail_sends: std::sync::atomic::AtomicBool,
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_invite_email(
        &self,
        to_email: &str,
        _role: InviteRole,
        invite_token: &str,
        _base_url: &str,
    ) -> Result<(), ServiceError> {
        if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServiceError::Email("mock send failure".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock mutex poisoned: {}", e)))?
            .push((to_email.to_string(), invite_token.to_string()));
        Ok(())
    }
}
