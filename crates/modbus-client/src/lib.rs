#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext};
use tracing::{debug, warn};

use types::{Group, GroupKey};

/// Timing knobs shared by every group's connection. There is exactly one
/// Modbus client per group; all groups use the same timeout/backoff.
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct GroupEngineConfig {
    /// Per-request timeout for connect and `readDiscreteInputs`.
    pub request_timeout: Duration,
    /// Minimum interval between successive connect attempts on a group
    /// whose client is currently absent.
    pub reconnect_backoff: Duration,
}

impl Default for GroupEngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1_000),
            reconnect_backoff: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("modbus transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("discrete-input response was empty")]
    ShortResponse,
}

/// Outcome of a single `GroupEngine::read` call. Deliberately not a
/// `Result`: backoff is routine flow control, not an error, so the sync
/// loop branches on this tag rather than matching an error variant.
#[derive(Debug)]
pub enum ReadOutcome {
    Ok(Vec<bool>),
    Backoff,
    Error(String),
}

#[derive(Default)]
struct ConnState {
    client: Option<Context>,
    last_attempt_at: Option<Instant>,
}

/// Owns one lazily-connected Modbus/TCP client per (host, port, unit)
/// group. Connection state lives here, not in a process-global map.
pub struct GroupEngine {
    config: GroupEngineConfig,
    states: Mutex<HashMap<GroupKey, ConnState>>,
}

impl GroupEngine {
    pub fn new(config: GroupEngineConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Read the discrete inputs covering every site in `group`. Lazily
    /// connects, arms a backoff window on connect/read failure, and closes
    /// the client on any error so the next tick starts from a clean
    /// reconnect.
    ///
    /// A non-empty response shorter than `group.length()` is still returned
    /// as `ReadOutcome::Ok`: the caller resolves each site's bit by index
    /// and treats an out-of-range index as a missing value for that site
    /// alone, rather than failing the whole group. Only a fully empty
    /// response is treated as a group-level error.
    pub async fn read(&self, group: &Group) -> ReadOutcome {
        let mut states = self.states.lock().await;
        let state = states.entry(group.key.clone()).or_default();

        if state.client.is_none() {
            if let Some(last_attempt_at) = state.last_attempt_at {
                if last_attempt_at.elapsed() < self.config.reconnect_backoff {
                    return ReadOutcome::Backoff;
                }
            }

            state.last_attempt_at = Some(Instant::now());
            match Self::connect(&group.key, self.config.request_timeout).await {
                Ok(ctx) => {
                    debug!(group = %group.key, "modbus connected");
                    state.client = Some(ctx);
                }
                Err(err) => {
                    warn!(group = %group.key, error = %err, "modbus connect failed");
                    return ReadOutcome::Error(err.to_string());
                }
            }
        }

        let length = group.length();
        let ctx = state.client.as_mut().expect("client present after connect");
        ctx.set_slave(Slave(group.key.unit_id));

        let outcome = match timeout(
            self.config.request_timeout,
            ctx.read_discrete_inputs(group.min_offset, length),
        )
        .await
        {
            Ok(Ok(bits)) if !bits.is_empty() => {
                debug!(group = %group.key, length, returned = bits.len(), "modbus read ok");
                Ok(bits)
            }
            Ok(Ok(_)) => Err(ClientError::ShortResponse),
            Ok(Err(err)) => Err(ClientError::Io(err)),
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: self.config.request_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(bits) => ReadOutcome::Ok(bits),
            Err(err) => {
                warn!(group = %group.key, error = %err, "modbus read failed, closing client");
                state.client = None;
                state.last_attempt_at = Some(Instant::now());
                ReadOutcome::Error(err.to_string())
            }
        }
    }

    /// Best-effort close of every currently open client, called once on
    /// process shutdown.
    pub async fn close_all(&self) {
        let mut states = self.states.lock().await;
        for (key, state) in states.iter_mut() {
            if state.client.take().is_some() {
                debug!(group = %key, "closed modbus client");
            }
        }
    }

    async fn connect(key: &GroupKey, request_timeout: Duration) -> Result<Context, ClientError> {
        let addr = Self::resolve(&key.host, key.port).await?;
        let mut ctx = timeout(request_timeout, tcp::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout {
                timeout_ms: request_timeout.as_millis() as u64,
            })??;
        ctx.set_slave(Slave(key.unit_id));
        Ok(ctx)
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
        lookup_host((host, port))
            .await
            .map_err(|_| ClientError::InvalidAddress(host.to_string(), port))?
            .next()
            .ok_or_else(|| ClientError::InvalidAddress(host.to_string(), port))
    }
}
