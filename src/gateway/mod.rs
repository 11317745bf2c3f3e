//! # Messaging Gateway
//!
//! Trait seam over the outbound messaging provider plus the Whapi.cloud
//! implementation used in production. Everything downstream (sessions,
//! dispatcher, router) talks to [`MessageGateway`] so tests can swap in a
//! recording fake.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Chunked delivery for oversized texts
//! - 1.1.0: Detect provider errors delivered inside 2xx bodies
//! - 1.0.0: Initial Whapi client

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::json;

use crate::core::response::{chunk_for_message, MESSAGE_LIMIT};

/// Outbound side of the messaging provider.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Deliver a text message to a conversation. `reply_to` quotes an
    /// earlier message when the provider supports it.
    async fn send_message(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()>;
}

/// Whapi.cloud REST client.
pub struct WhapiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WhapiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        if token.is_empty() {
            bail!("Whapi token must not be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("failed to build http client")?;
        Ok(WhapiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Probe the provider's settings endpoint so a bad token fails at
    /// startup instead of on the first send.
    pub async fn test_connection(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/settings", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Whapi connection test failed")?;
        if !response.status().is_success() {
            bail!("Whapi connection test returned {}", response.status());
        }
        info!("Whapi connection test succeeded");
        Ok(())
    }

    async fn post_text(&self, chat_id: &str, body: &str, reply_to: Option<&str>) -> Result<()> {
        let mut payload = json!({ "to": chat_id, "body": body });
        if let Some(quoted) = reply_to {
            payload["reply"] = json!(quoted);
        }

        let response = self
            .http
            .post(format!("{}/messages/text", self.base_url))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to reach Whapi for chat {chat_id}"))?;

        let status = response.status();
        let data: serde_json::Value = response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);

        if status.is_success() {
            // The provider reports some failures (unknown chat, rate limit)
            // inside a 200 body rather than via the status code.
            if let Some(err) = data.get("error").filter(|e| !e.is_null()) {
                error!("Whapi reported an error for chat {chat_id} despite status {status}: {err}");
                return Err(anyhow!("Whapi error for chat {chat_id}: {err}"));
            }
            return Ok(());
        }

        error!("Whapi send to {chat_id} failed with status {status}: {data}");
        Err(anyhow!("Whapi send failed with status {status}"))
    }
}

#[async_trait]
impl MessageGateway for WhapiClient {
    async fn send_message(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()> {
        if chat_id.is_empty() || text.is_empty() {
            bail!("send_message called with empty chat_id or text");
        }

        if text.len() <= MESSAGE_LIMIT {
            return self.post_text(chat_id, text, reply_to).await;
        }

        // Oversized texts go out as sequential chunks; only the first one
        // quotes the original message.
        warn!("Message to {chat_id} exceeds the body limit, sending in chunks");
        let mut reply_to = reply_to;
        for chunk in chunk_for_message(text) {
            self.post_text(chat_id, &chunk, reply_to.take()).await?;
        }
        Ok(())
    }
}
