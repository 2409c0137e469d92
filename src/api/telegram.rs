//! Telegram messaging transport and the inbound update pump.
//!
//! The transport speaks JSON to the per-data-center web gateways and maps
//! backend error envelopes onto [`RpcError`], which is what the resilient
//! wrapper retries on. Authentication/login flows live upstream and are not
//! handled here.

use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::rpc::{CallOptions, ResilientClient, RpcError, RpcTransport};
use crate::models::InboundMessage;

/// Web gateway hosts, indexed by data center (1-based).
const DC_HOSTS: [&str; 5] = ["pluto", "venus", "aurora", "vesta", "flora"];

/// JSON-over-HTTP transport to the messaging backend.
pub struct MtprotoHttpTransport {
    http: Client,
    api_id: i32,
    api_hash: String,
    default_dc: RwLock<i32>,
}

/// Backend response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    result: Option<Value>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: String,
}

impl MtprotoHttpTransport {
    pub fn new(api_id: i32, api_hash: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            api_id,
            api_hash: api_hash.to_string(),
            default_dc: RwLock::new(2),
        })
    }

    /// Create from environment variables:
    /// - TELEGRAM_API_ID
    /// - TELEGRAM_API_HASH
    pub fn from_env() -> Result<Self> {
        let api_id: i32 = std::env::var("TELEGRAM_API_ID")
            .context("TELEGRAM_API_ID not set")?
            .parse()
            .context("Invalid TELEGRAM_API_ID")?;
        let api_hash = std::env::var("TELEGRAM_API_HASH").context("TELEGRAM_API_HASH not set")?;

        Self::new(api_id, &api_hash)
    }

    fn dc_url(dc: i32) -> Result<String, RpcError> {
        let host = usize::try_from(dc - 1)
            .ok()
            .and_then(|i| DC_HOSTS.get(i))
            .ok_or_else(|| RpcError::Api {
                code: 400,
                message: format!("DC_ID_INVALID_{dc}"),
            })?;

        Ok(format!("https://{host}.web.telegram.org/apiw1"))
    }
}

#[async_trait]
impl RpcTransport for MtprotoHttpTransport {
    async fn invoke(
        &self,
        method: &str,
        params: &Value,
        opts: &CallOptions,
    ) -> Result<Value, RpcError> {
        let dc = match opts.dc_id {
            Some(dc) => dc,
            None => *self.default_dc.read().expect("dc lock poisoned"),
        };
        let url = Self::dc_url(dc)?;

        let body = json!({
            "api_id": self.api_id,
            "api_hash": self.api_hash,
            "method": method,
            "params": params,
        });

        let envelope: Envelope = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if envelope.ok {
            Ok(envelope.result.unwrap_or(Value::Null))
        } else {
            Err(RpcError::classify(
                envelope.error_code,
                &envelope.error_message,
            ))
        }
    }

    async fn set_default_dc(&self, dc: i32) -> Result<(), RpcError> {
        // Reject unknown DCs up front rather than poisoning every later call.
        Self::dc_url(dc)?;
        *self.default_dc.write().expect("dc lock poisoned") = dc;
        Ok(())
    }
}

/// One page of updates from the backend.
#[derive(Debug, Deserialize)]
struct UpdateBatch {
    offset: i64,
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

/// Long-poll the backend for new channel/chat messages and forward them,
/// in delivery order, into the engine's channel.
///
/// Runs until the receiving side goes away or the backend returns a
/// non-transient error; throttling and redirects are absorbed by the
/// resilient client underneath.
pub async fn pump_updates<T: RpcTransport>(
    client: ResilientClient<T>,
    tx: mpsc::Sender<InboundMessage>,
) -> Result<()> {
    let mut offset: i64 = 0;

    loop {
        let result = client
            .call(
                "updates.getDifference",
                &json!({ "offset": offset, "limit": 100, "timeout": 30 }),
            )
            .await
            .context("update poll failed")?;

        let batch: UpdateBatch =
            serde_json::from_value(result).context("malformed update batch")?;
        offset = batch.offset;

        for message in batch.messages {
            debug!(chat_id = message.source_chat_id, "inbound message");
            if tx.send(message).await.is_err() {
                // Engine is gone; nothing left to deliver to.
                return Ok(());
            }
        }
    }
}
