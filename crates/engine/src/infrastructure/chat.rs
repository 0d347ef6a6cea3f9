//! HTTP client for the external chat/narrative service.
//!
//! The service is a separate process; the engine's only coupling is one
//! POST per `talk` turn with a bounded deadline. Failures surface as
//! `ChatError` and the talk handler degrades to a canned reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::infrastructure::config::ChatConfig;
use crate::infrastructure::ports::{ChatError, ChatPort, ChatReply, ChatRequest};

/// Client for the chat service's `/chat` endpoint.
#[derive(Clone)]
pub struct ChatServiceClient {
    client: Client,
    base_url: String,
}

impl ChatServiceClient {
    pub fn new(config: &ChatConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatWireRequest<'a> {
    npc: &'a Value,
    relationship: &'a Value,
    player: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatWireResponse {
    reply: String,
}

#[async_trait]
impl ChatPort for ChatServiceClient {
    async fn narrate(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let wire = ChatWireRequest {
            npc: &request.npc,
            relationship: &request.relationship,
            player: &request.player,
            message: request.message.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout
                } else {
                    ChatError::RequestFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::RequestFailed(format!("{status}: {body}")));
        }

        let wire: ChatWireResponse = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()))?;

        Ok(ChatReply { reply: wire.reply })
    }
}
