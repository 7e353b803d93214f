// src/services/notifier.rs

//! Change notifications.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{NotifyError, Result};
use crate::models::{NotificationTarget, NotifyConfig};
use crate::utils::truncate_graphemes;

/// Telegram rejects longer messages.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Delivery channel for change alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        target: &NotificationTarget,
        message: &str,
    ) -> std::result::Result<(), NotifyError>;
}

/// Single-line alert text: `{name}: {title} - {value} - {url}`.
pub fn format_message(name: &str, title: Option<&str>, value: &str, url: &str) -> String {
    match title.filter(|t| !t.is_empty()) {
        Some(title) => format!("{name}: {title} - {value} - {url}"),
        None => format!("{name}: {value} - {url}"),
    }
}

/// Sends alerts through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotifyConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            crate::error::AppError::config(format!("failed to build notifier client: {e}"))
        })?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        target: &NotificationTarget,
        message: &str,
    ) -> std::result::Result<(), NotifyError> {
        let endpoint = format!("{}/bot{}/sendMessage", self.api_base, target.bot_token);
        let text = truncate_graphemes(message, MAX_MESSAGE_CHARS);

        let response = self
            .client
            .get(&endpoint)
            .query(&[("chat_id", target.chat_id.as_str()), ("text", text.as_str())])
            .send()
            .await
            // reqwest errors carry the URL, which embeds the bot token.
            .map_err(|e| NotifyError::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Http(e.without_url()))?;
        let accepted = status.is_success()
            && serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("ok").and_then(|ok| ok.as_bool()))
                .unwrap_or(false);

        if !accepted {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("Notification delivered to chat {}", target.chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> NotificationTarget {
        NotificationTarget {
            bot_token: "123:abc".into(),
            chat_id: "-1001".into(),
        }
    }

    fn notifier(server: &MockServer) -> TelegramNotifier {
        let config = NotifyConfig {
            api_base: server.uri(),
            ..NotifyConfig::default()
        };
        TelegramNotifier::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn message_includes_name_value_and_url() {
        let message = format_message(
            "switch",
            Some("Nintendo Switch"),
            "Out of stock",
            "https://www.amazon.it/dp/B08KJF2D25",
        );
        assert_eq!(
            message,
            "switch: Nintendo Switch - Out of stock - https://www.amazon.it/dp/B08KJF2D25"
        );
        assert_eq!(
            format_message("switch", None, "", "https://x.test"),
            "switch:  - https://x.test"
        );
    }

    #[tokio::test]
    async fn sends_message_to_chat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bot123:abc/sendMessage"))
            .and(query_param("chat_id", "-1001"))
            .and(query_param("text", "switch: In stock - https://x.test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .notify(&target(), "switch: In stock - https://x.test")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_message_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"ok":false,"description":"Bad Request: chat not found"}"#,
            ))
            .mount(&server)
            .await;

        let err = notifier(&server).notify(&target(), "hello").await.unwrap_err();
        match err {
            NotifyError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("chat not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn ok_false_with_200_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":false}"#))
            .mount(&server)
            .await;

        assert!(notifier(&server).notify(&target(), "hello").await.is_err());
    }
}
