use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{AlertError, Notifier, RenderedAlert};
use crate::config::AlertsConfig;

/// SMTP delivery with STARTTLS and login credentials.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

fn mailbox(address: &str) -> Result<Mailbox, AlertError> {
    address.trim().parse::<Mailbox>().map_err(|e| AlertError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

impl EmailNotifier {
    /// `Ok(None)` when the username or password is absent.
    pub fn from_config(cfg: &AlertsConfig) -> Result<Option<Self>, AlertError> {
        let (Some(user), Some(pass)) = (cfg.smtp_username.as_deref(), cfg.smtp_password.as_deref()) else {
            return Ok(None);
        };
        if user.is_empty() || pass.is_empty() {
            return Ok(None);
        }
        let from = mailbox(cfg.from_email.as_deref().unwrap_or(user))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server)
            .map_err(|e| AlertError::Smtp(e.to_string()))?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .timeout(Some(Duration::from_secs(cfg.timeout_sec)))
            .build();
        Ok(Some(Self { transport, from }))
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, recipient: &str, alert: &RenderedAlert) -> Result<(), AlertError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(mailbox(recipient)?)
            .subject(alert.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(alert.html.clone())
            .map_err(|e| AlertError::Smtp(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AlertError::Smtp(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_disable_channel() {
        let cfg = AlertsConfig::default();
        assert!(EmailNotifier::from_config(&cfg).unwrap().is_none());

        let cfg = AlertsConfig {
            smtp_username: Some("ops@example.org".into()),
            smtp_password: Some(String::new()),
            ..Default::default()
        };
        assert!(EmailNotifier::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_bad_from_address() {
        let cfg = AlertsConfig {
            smtp_username: Some("ops".into()),
            smtp_password: Some("secret".into()),
            from_email: Some("not an address".into()),
            ..Default::default()
        };
        assert!(matches!(
            EmailNotifier::from_config(&cfg),
            Err(AlertError::Address { .. })
        ));
    }

    #[test]
    fn test_recipient_parse() {
        assert!(mailbox("noc@example.org").is_ok());
        assert!(mailbox("@@").is_err());
    }
}
