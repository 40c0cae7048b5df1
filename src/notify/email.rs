//! SMTP notifier built on `lettre`.
//!
//! Port 465 uses implicit TLS, every other port STARTTLS. Configuration is
//! validated eagerly: [`EmailNotifier::new`] reports every missing field at
//! once instead of failing on the first send.

use super::compose::compose;
use super::{Delivery, Notifier};
use crate::error::NewsError;
use crate::models::NewsItem;
use async_trait::async_trait;
use chrono::Local;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{AsyncSmtpTransport, authentication::Credentials};
use lettre::{AsyncTransport, Tokio1Executor};
use rand::{Rng, rng};
use std::time::Duration;
use tracing::{error, info, instrument};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP settings as collected from configuration. Every field is optional
/// here so validation can report all gaps together.
#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl SmtpSettings {
    /// Names of required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<String> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.host) {
            missing.push("smtp_host".to_string());
        }
        if self.port.is_none() {
            missing.push("smtp_port".to_string());
        }
        if blank(&self.user) {
            missing.push("smtp_user".to_string());
        }
        if blank(&self.password) {
            missing.push("smtp_password".to_string());
        }
        if blank(&self.to) {
            missing.push("to_email".to_string());
        }
        missing
    }
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    domain: String,
    source_url: String,
}

impl EmailNotifier {
    /// Build the transport from validated settings.
    ///
    /// `source_url` is quoted in the message footer.
    pub fn new(settings: &SmtpSettings, source_url: &str) -> Result<Self, NewsError> {
        let missing = settings.missing_fields();
        if !missing.is_empty() {
            return Err(NewsError::MissingConfig { missing });
        }
        // Validated above.
        let host = settings.host.clone().unwrap_or_default();
        let port = settings.port.unwrap_or_default();
        let user = settings.user.clone().unwrap_or_default();
        let password = settings.password.clone().unwrap_or_default();
        let to_addr = settings.to.clone().unwrap_or_default();
        let from_addr = settings
            .from
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| user.clone());

        let from: Mailbox = from_addr
            .parse()
            .map_err(|e| NewsError::Config(format!("invalid from address {from_addr:?}: {e}")))?;
        let to: Mailbox = to_addr
            .parse()
            .map_err(|e| NewsError::Config(format!("invalid to address {to_addr:?}: {e}")))?;

        let builder = if port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .map_err(|e| NewsError::Config(format!("invalid smtp host {host:?}: {e}")))?;

        let mailer = builder
            .port(port)
            .credentials(Credentials::new(user, password))
            .timeout(Some(SEND_TIMEOUT))
            .build();

        Ok(Self {
            domain: from.email.domain().to_string(),
            mailer,
            from,
            to,
            source_url: source_url.to_string(),
        })
    }

    /// Open a connection and authenticate without sending anything.
    #[instrument(level = "info", skip_all)]
    pub async fn verify(&self) -> Result<(), NewsError> {
        match self.mailer.test_connection().await {
            Ok(true) => {
                info!("SMTP connection verified");
                Ok(())
            }
            Ok(false) => Err(NewsError::Delivery(
                "SMTP server did not accept the connection".to_string(),
            )),
            Err(e) => Err(NewsError::Delivery(format!("SMTP verification failed: {e}"))),
        }
    }

    fn next_message_id(&self) -> String {
        let token: u64 = rng().random();
        format!(
            "<{}.{:016x}@{}>",
            Local::now().timestamp_millis(),
            token,
            self.domain
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(level = "info", skip_all, fields(count = items.len()))]
    async fn send(
        &self,
        items: &[NewsItem],
        subject: Option<&str>,
    ) -> Result<Delivery, NewsError> {
        if items.is_empty() {
            return Err(NewsError::Delivery("refusing to send an empty news list".to_string()));
        }

        let composed = compose(items, subject, &self.source_url, Local::now());
        let message_id = self.next_message_id();

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(composed.subject)
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(composed.text, composed.html))
            .map_err(|e| NewsError::Delivery(format!("building email: {e}")))?;

        if let Err(e) = self.mailer.send(message).await {
            error!(error = %e, "Email send failed");
            return Err(NewsError::Delivery(e.to_string()));
        }

        info!(%message_id, "Email sent");
        Ok(Delivery {
            message_id,
            count: items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SmtpSettings {
        SmtpSettings {
            host: Some("smtp.example.com".into()),
            port: Some(587),
            user: Some("bot@example.com".into()),
            password: Some("secret".into()),
            from: None,
            to: Some("reader@example.com".into()),
        }
    }

    #[test]
    fn complete_settings_have_no_gaps() {
        assert!(complete().missing_fields().is_empty());
    }

    #[test]
    fn every_missing_field_is_reported() {
        let settings = SmtpSettings {
            host: Some("  ".into()),
            ..SmtpSettings::default()
        };
        assert_eq!(
            settings.missing_fields(),
            vec!["smtp_host", "smtp_port", "smtp_user", "smtp_password", "to_email"]
        );

        match EmailNotifier::new(&settings, "https://x/") {
            Err(NewsError::MissingConfig { missing }) => assert_eq!(missing.len(), 5),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("incomplete settings must be rejected"),
        }
    }

    #[test]
    fn invalid_recipient_is_a_config_error() {
        let settings = SmtpSettings {
            to: Some("not-an-address".into()),
            ..complete()
        };
        assert!(matches!(
            EmailNotifier::new(&settings, "https://x/"),
            Err(NewsError::Config(_))
        ));
    }

    #[tokio::test]
    async fn from_defaults_to_user_and_empty_send_is_rejected() {
        let notifier = EmailNotifier::new(&complete(), "https://x/").unwrap();
        assert_eq!(notifier.from.email.to_string(), "bot@example.com");

        let err = notifier.send(&[], None).await.unwrap_err();
        assert!(matches!(err, NewsError::Delivery(_)));
    }

    #[test]
    fn message_ids_are_unique_and_scoped_to_sender_domain() {
        let notifier = EmailNotifier::new(&complete(), "https://x/").unwrap();
        let a = notifier.next_message_id();
        let b = notifier.next_message_id();
        assert_ne!(a, b);
        assert!(a.starts_with('<') && a.ends_with("@example.com>"));
    }
}
