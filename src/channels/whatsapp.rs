//! WhatsApp channel: talks to an HTTP WhatsApp gateway.
//!
//! `POST /send/message` sends, `GET /app/devices` tells us which account
//! the gateway is logged in as.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::channels::{SendRequest, SendResponse, Transport};
use crate::config::WhatsAppConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "whatsapp";

/// Gateway envelope: `{code, message, results}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    results: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Device {
    device: String,
}

/// HTTP client for the gateway. The own identity is looked up once.
pub struct WhatsAppClient {
    base_url: String,
    auth: Option<(String, SecretString)>,
    client: reqwest::Client,
    identity: RwLock<Option<String>>,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Self {
        let auth = config.basic_auth_user.as_ref().map(|user| {
            let password = config
                .basic_auth_password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new()));
            (user.clone(), password)
        });
        Self {
            base_url: config.host.trim_end_matches('/').to_string(),
            auth,
            client: reqwest::Client::new(),
            identity: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password.expose_secret())),
            None => builder,
        }
    }

    async fn fetch_identity(&self) -> Result<String, ChannelError> {
        let unavailable = |reason: String| ChannelError::IdentityUnavailable {
            name: CHANNEL_NAME.into(),
            reason,
        };

        let resp = self
            .authorize(self.client.get(self.url("/app/devices")))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(unavailable(format!("devices returned {status}: {body}")));
        }

        let envelope: Envelope<Vec<Device>> = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("malformed devices response: {e}")))?;

        envelope
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.device)
            .find(|d| !d.trim().is_empty())
            .ok_or_else(|| unavailable("no device is logged in".into()))
    }
}

#[async_trait]
impl Transport for WhatsAppClient {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ChannelError> {
        let send_failed = |reason: String| ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason,
        };

        let mut body = serde_json::json!({
            "phone": request.to,
            "message": request.text,
        });
        if let Some(reply_id) = &request.in_reply_to {
            body["reply_message_id"] = serde_json::Value::String(reply_id.clone());
        }

        let resp = self
            .authorize(self.client.post(self.url("/send/message")))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("send returned {status}: {body}")));
        }

        let envelope: Envelope<SendResponse> = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("malformed send response: {e}")))?;

        tracing::debug!(
            to = %request.to,
            code = envelope.code.as_deref().unwrap_or(""),
            message = envelope.message.as_deref().unwrap_or(""),
            "Gateway accepted message"
        );
        Ok(envelope.results.unwrap_or_default())
    }

    async fn self_identity(&self) -> Result<String, ChannelError> {
        if let Some(identity) = self.identity.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let mut cached = self.identity.write().await;
        if let Some(identity) = cached.as_ref() {
            return Ok(identity.clone());
        }
        let identity = self.fetch_identity().await?;
        tracing::info!(identity = %identity, "Resolved own identity");
        *cached = Some(identity.clone());
        Ok(identity)
    }
}
