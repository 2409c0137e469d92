//! Resilient RPC call wrapper for the messaging backend.
//!
//! Wraps a single transport call and transparently recovers exactly two
//! transient conditions: throttling (the backend names the wait) and
//! data-center redirects. Everything else propagates unchanged to the
//! caller. The wrapper itself logs nothing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Which API family a redirect error pertains to.
///
/// `Phone` redirects come from code-request APIs and change the default
/// data center for the whole session; the other kinds only affect the call
/// that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateKind {
    Phone,
    Network,
    User,
    File,
}

impl MigrateKind {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "PHONE" => Some(Self::Phone),
            "NETWORK" => Some(Self::Network),
            "USER" => Some(Self::User),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }
}

/// Errors surfaced by the messaging backend transport.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Throttled; the backend tells us how long to wait before retrying.
    #[error("flood wait: retry after {0}s")]
    FloodWait(u64),

    /// Wrong data center; the backend names the correct one.
    #[error("redirect to dc {dc} ({kind:?})")]
    Migrate { kind: MigrateKind, dc: i32 },

    /// Any other API-level error.
    #[error("rpc error {code}: {message}")]
    Api { code: i64, message: String },

    /// Transport-level failure (connection, serialization).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RpcError {
    /// Classify a backend error envelope into the two recoverable shapes
    /// or a plain API error.
    pub fn classify(code: i64, message: &str) -> Self {
        if code == 420 {
            if let Some(secs) = message
                .strip_prefix("FLOOD_WAIT_")
                .and_then(|s| s.parse().ok())
            {
                return Self::FloodWait(secs);
            }
        }

        if code == 303 {
            if let Some((prefix, dc)) = message.split_once("_MIGRATE_") {
                if let (Some(kind), Ok(dc)) = (MigrateKind::from_prefix(prefix), dc.parse()) {
                    return Self::Migrate { kind, dc };
                }
            }
        }

        Self::Api {
            code,
            message: message.to_string(),
        }
    }
}

/// Per-call options. A redirect on a non-code-request API pins the
/// corrected data center here instead of touching the session default.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub dc_id: Option<i32>,
}

/// One underlying transport call to the messaging backend.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn invoke(&self, method: &str, params: &Value, opts: &CallOptions)
        -> Result<Value, RpcError>;

    /// Persist a new default data center for all future calls.
    async fn set_default_dc(&self, dc: i32) -> Result<(), RpcError>;
}

/// Retrying wrapper over an [`RpcTransport`].
pub struct ResilientClient<T> {
    transport: T,
}

impl<T: RpcTransport> ResilientClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Invoke `method` with `params`, retrying through flood waits and
    /// redirects. The retry count is unbounded; the total wait is bounded
    /// by the durations the backend supplies.
    pub async fn call(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let mut opts = CallOptions::default();

        loop {
            match self.transport.invoke(method, params, &opts).await {
                Ok(value) => return Ok(value),
                Err(RpcError::FloodWait(secs)) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                Err(RpcError::Migrate { kind, dc }) => {
                    if kind == MigrateKind::Phone {
                        // Retrying code-request calls on the wrong DC would
                        // come back as an expired-code error, so the session
                        // default has to move.
                        self.transport.set_default_dc(dc).await?;
                    } else {
                        opts.dc_id = Some(dc);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
