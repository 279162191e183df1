#![allow(dead_code)]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, warn};

use debounce::Debouncer;
use modbus_client::{GroupEngine, ReadOutcome};
use rds_client::RdsSession;
use types::{Group, LogicalState, Site};

/// Abstracts the Modbus group engine so the tick procedure can be driven
/// by fakes in tests without a real PLC.
#[async_trait]
pub trait ModbusRead: Send + Sync {
    async fn read(&self, group: &Group) -> ReadOutcome;

    /// Best-effort teardown of any open connections. No-op by default;
    /// the real engine overrides it to close its Modbus clients.
    async fn close(&self) {}
}

#[async_trait]
impl ModbusRead for GroupEngine {
    async fn read(&self, group: &Group) -> ReadOutcome {
        GroupEngine::read(self, group).await
    }

    async fn close(&self) {
        GroupEngine::close_all(self).await;
    }
}

/// Abstracts the RDS session so the tick procedure can be driven by fakes
/// in tests without a real dispatcher server.
#[async_trait]
pub trait WorkSiteWriter: Send + Sync {
    async fn ensure_session(&self) -> Result<(), String>;
    async fn set_filled(&self, site_id: &str) -> Result<(), String>;
    async fn set_empty(&self, site_id: &str) -> Result<(), String>;
}

#[async_trait]
impl WorkSiteWriter for RdsSession {
    async fn ensure_session(&self) -> Result<(), String> {
        if self.has_session().await {
            return Ok(());
        }
        self.login().await.map_err(|err| err.to_string())
    }

    async fn set_filled(&self, site_id: &str) -> Result<(), String> {
        self.set_work_site_filled(site_id)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    async fn set_empty(&self, site_id: &str) -> Result<(), String> {
        self.set_work_site_empty(site_id)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SyncLoopConfig {
    pub poll_interval: Duration,
}

/// Ties the Modbus group engine, the per-site debouncer, and the RDS
/// session together into the periodic tick described by the design.
pub struct SyncLoop<E, W> {
    engine: E,
    writer: W,
    debouncer: Debouncer,
    groups: Vec<Group>,
    config: SyncLoopConfig,
}

impl<E, W> SyncLoop<E, W>
where
    E: ModbusRead,
    W: WorkSiteWriter,
{
    pub fn new(
        engine: E,
        writer: W,
        debouncer: Debouncer,
        groups: Vec<Group>,
        config: SyncLoopConfig,
    ) -> Self {
        Self {
            engine,
            writer,
            debouncer,
            groups,
            config,
        }
    }

    /// Run ticks forever until `shutdown` reports true. A tick that is
    /// already in flight always runs to completion; shutdown is only
    /// observed between ticks and while sleeping, never mid-I/O.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                self.engine.close().await;
                return;
            }

            let tick_start = Instant::now();
            self.sync_once().await;

            if *shutdown.borrow() {
                self.engine.close().await;
                return;
            }

            let elapsed = tick_start.elapsed();
            let remaining = self.config.poll_interval.saturating_sub(elapsed);
            if remaining.is_zero() {
                // The previous tick overran the poll interval: move straight
                // to the next tick instead of sleeping, and never queue up
                // catch-up ticks for the time that was lost.
                continue;
            }

            tokio::select! {
                _ = sleep(remaining) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Access the underlying writer, mainly so tests can inspect what a
    /// fake writer recorded after a tick.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// One tick of the sync loop: attempt login if needed, then read and
    /// publish every configured group in order.
    pub async fn sync_once(&mut self) {
        if let Err(err) = self.writer.ensure_session().await {
            warn!(error = %err, "rds login failed this tick, work-site writes will retry login on demand");
        }

        for group in &self.groups {
            match self.engine.read(group).await {
                ReadOutcome::Backoff => {
                    // RDS already holds the safe state from the failure
                    // that armed this backoff; re-writing would be noise.
                }
                ReadOutcome::Error(message) => {
                    error!(group = %group.key, message, "modbus read failed for group");
                    for site in &group.sites {
                        self.debouncer.reset(&site.site_id);
                        Self::publish(&self.writer, site, site.default).await;
                    }
                }
                ReadOutcome::Ok(bits) => {
                    let now = Instant::now();
                    for site in &group.sites {
                        let idx = group
                            .index_of(site)
                            .expect("site belongs to the group it is iterated from");
                        match bits.get(idx) {
                            None => {
                                error!(
                                    site_id = %site.site_id,
                                    offset = site.offset,
                                    idx,
                                    "raw bit missing from modbus response, probable misconfiguration"
                                );
                                self.debouncer.reset(&site.site_id);
                                Self::publish(&self.writer, site, site.default).await;
                            }
                            Some(&raw_bit) => {
                                let effective = self.debouncer.update(site, raw_bit, now);
                                Self::publish(&self.writer, site, effective).await;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn publish(writer: &W, site: &Site, state: LogicalState) {
        let result = match state {
            LogicalState::Filled => writer.set_filled(&site.site_id).await,
            LogicalState::Empty => writer.set_empty(&site.site_id).await,
        };
        if let Err(err) = result {
            warn!(site_id = %site.site_id, error = %err, "rds write failed");
        }
    }
}
