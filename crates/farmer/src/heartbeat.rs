//! Network presence: join via the configured seeds, keep probing them, and
//! give up after too many consecutive failures.

use {
    crate::engine::Engine,
    anyhow::{Context, Result},
    message::Contact,
    std::{net::IpAddr, sync::Arc, time::Duration},
};

const PROBE_INTERVAL: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
/// Port mappings are leased for twenty minutes and refreshed every fifteen.
const MAPPING_LEASE: Duration = Duration::from_secs(20 * 60);
const MAPPING_REFRESH: Duration = Duration::from_secs(15 * 60);

/// Seam for NAT traversal. Actual UPnP/NAT-PMP integrations live outside this
/// crate; a node on a public address runs with [`NoPortMapper`].
#[async_trait::async_trait]
pub trait PortMapper: Send + Sync {
    /// Requests an external mapping for `port` and returns the public address
    /// peers should use to reach us.
    async fn map(&self, port: u16, lease: Duration) -> Result<IpAddr>;
}

pub struct NoPortMapper;

#[async_trait::async_trait]
impl PortMapper for NoPortMapper {
    async fn map(&self, _port: u16, _lease: Duration) -> Result<IpAddr> {
        anyhow::bail!("no port mapper available")
    }
}

pub struct Heartbeat {
    engine: Engine,
    seeds: Vec<Contact>,
    mapper: Arc<dyn PortMapper>,
}

impl Heartbeat {
    pub fn new(engine: Engine, seeds: Vec<Contact>, mapper: Arc<dyn PortMapper>) -> Self {
        Self {
            engine,
            seeds,
            mapper,
        }
    }

    /// Joins the network and probes the seeds every ten seconds. Returns
    /// `Ok(())` once the network is considered lost so the caller can shut
    /// the node down; returns an error when joining never succeeded.
    pub async fn run(self) -> Result<()> {
        self.join().await?;
        tracing::info!("joined the network");

        let mut failures = 0u32;
        let mut ticks = tokio::time::interval(PROBE_INTERVAL);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; we just joined
        ticks.tick().await;
        loop {
            ticks.tick().await;
            if self.probe_any().await {
                failures = 0;
                continue;
            }
            failures += 1;
            tracing::warn!(failures, "no seed answered the probe");
            if failures >= MAX_CONSECUTIVE_FAILURES {
                tracing::error!("lost contact with every seed");
                return Ok(());
            }
        }
    }

    async fn join(&self) -> Result<()> {
        if self.probe_any().await {
            return Ok(());
        }
        // every seed is unreachable; assume we are behind NAT, acquire a
        // mapping, advertise the external address, and retry
        let port = self.engine.contact().port;
        let external = self
            .mapper
            .map(port, MAPPING_LEASE)
            .await
            .context("request port mapping")?;
        tracing::info!(%external, "advertising mapped external address");
        self.engine.set_address(external.to_string());
        self.spawn_mapping_refresh(port);

        if self.probe_any().await {
            return Ok(());
        }
        anyhow::bail!("could not reach any seed")
    }

    async fn probe_any(&self) -> bool {
        for seed in &self.seeds {
            match self.engine.probe(seed).await {
                Ok(()) => return true,
                Err(err) => {
                    tracing::debug!(seed = %seed.node_id, ?err, "seed probe failed");
                }
            }
        }
        false
    }

    fn spawn_mapping_refresh(&self, port: u16) {
        let mapper = self.mapper.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(MAPPING_REFRESH);
            // skip the immediate tick; the mapping was just acquired
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if let Err(err) = mapper.map(port, MAPPING_LEASE).await {
                    tracing::warn!(?err, "port mapping refresh failed");
                }
            }
        });
    }
}
