use std::time::Duration;

use serde::Serialize;

use super::{AlertError, Notifier, RenderedAlert};
use crate::config::AlertsConfig;

/// Telegram Bot API `sendMessage` delivery.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slawatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
        })
    }

    /// `Ok(None)` when no bot token is configured.
    pub fn from_config(cfg: &AlertsConfig) -> Result<Option<Self>, AlertError> {
        match cfg.telegram_bot_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Self::new(
                &cfg.telegram_api_base,
                token,
                Duration::from_secs(cfg.timeout_sec),
            )
            .map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, recipient: &str, alert: &RenderedAlert) -> Result<(), AlertError> {
        let body = SendMessage {
            chat_id: recipient,
            text: &alert.telegram,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Telegram {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
