use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::providers::{ChannelError, MessageChannel, MessageFormat, endpoint};

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: serde_json::Value,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramResponse {
    #[serde(default)]
    description: Option<String>,
}

/// Numeric chat ids are sent as numbers, channel usernames as strings.
fn chat_id_value(recipient: &str) -> serde_json::Value {
    match recipient.trim().parse::<i64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::from(recipient.trim()),
    }
}

fn send_request<'a>(recipient: &str, text: &'a str, format: MessageFormat) -> SendMessageRequest<'a> {
    SendMessageRequest {
        chat_id: chat_id_value(recipient),
        text,
        parse_mode: match format {
            MessageFormat::Html => Some("HTML"),
            MessageFormat::Plain => None,
        },
        disable_web_page_preview: true,
    }
}

/// Telegram Bot API `sendMessage` client.
pub struct TelegramChannel {
    client: reqwest::Client,
    url: Url,
}

impl TelegramChannel {
    pub fn new(base_url: &str, bot_token: &str) -> Result<Self, ChannelError> {
        let url = endpoint(base_url, &format!("bot{bot_token}/sendMessage"))
            .map_err(|error| ChannelError::Unavailable(format!("invalid base url: {error}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| ChannelError::Unavailable(error.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), ChannelError> {
        let body = send_request(recipient, text, format);

        let res = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|error| ChannelError::Unavailable(error.to_string()))?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        let description = res
            .json::<TelegramResponse>()
            .await
            .unwrap_or_default()
            .description
            .unwrap_or_else(|| status.to_string());

        if description.contains("chat not found") {
            log::error!(
                "Telegram chat {recipient} not found; the recipient must start a conversation with the bot first"
            );
        }

        if status == StatusCode::BAD_REQUEST {
            Err(ChannelError::Rejected(description))
        } else {
            Err(ChannelError::Unavailable(format!("{status}: {description}")))
        }
    }
}
