//! OSINT indicator store and feed refresh
//!
//! Two string sets, malicious IPs and malicious domains, fetched from
//! public blocklists and swapped wholesale under a short write lock. The
//! engine reads through an `Arc` snapshot so lookups never contend with
//! a refresh in progress.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OsintConfig;

/// Immutable snapshot of both indicator sets
#[derive(Debug, Default)]
pub struct IndicatorSet {
    pub ips: HashSet<String>,
    pub domains: HashSet<String>,
}

/// Shared store; refresh replaces the whole snapshot atomically
pub struct IndicatorStore {
    inner: RwLock<Arc<IndicatorSet>>,
}

impl IndicatorStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(IndicatorSet::default())),
        }
    }

    /// Cheap clone of the current snapshot
    pub fn load(&self) -> Arc<IndicatorSet> {
        self.inner.read().clone()
    }

    pub fn contains_ip(&self, ip: &str) -> bool {
        self.inner.read().ips.contains(ip)
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.inner.read().domains.contains(domain)
    }

    pub fn replace(&self, set: IndicatorSet) {
        *self.inner.write() = Arc::new(set);
    }

    #[cfg(test)]
    pub fn with_ips(ips: impl IntoIterator<Item = &'static str>) -> Self {
        let store = Self::new();
        store.replace(IndicatorSet {
            ips: ips.into_iter().map(String::from).collect(),
            domains: HashSet::new(),
        });
        store
    }
}

impl Default for IndicatorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a plain-text blocklist, skipping blanks and `#` comments
pub fn parse_blocklist(text: &str) -> HashSet<String> {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Fetches the configured blocklists
pub struct FeedClient {
    client: reqwest::Client,
    config: OsintConfig,
}

impl FeedClient {
    pub fn new(config: OsintConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("netwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_blocklist(&self, url: &str) -> Result<HashSet<String>> {
        let text = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("Failed to read blocklist body from {}", url))?;
        Ok(parse_blocklist(&text))
    }

    /// Fetch both feeds and swap the store. A document that fails to
    /// fetch leaves its previous set intact; the call only errors when
    /// both documents fail, and the store is untouched in that case.
    pub async fn refresh(&self, store: &IndicatorStore) -> Result<()> {
        let previous = store.load();

        let ips = self.fetch_blocklist(&self.config.feodo_tracker_url).await;
        let domains = self.fetch_blocklist(&self.config.urlhaus_url).await;

        if let (Err(ip_err), Err(domain_err)) = (&ips, &domains) {
            anyhow::bail!(
                "both blocklist fetches failed: {:#}; {:#}",
                ip_err,
                domain_err
            );
        }

        let ips = match ips {
            Ok(ips) => {
                info!("Loaded {} malicious IPs from Feodo Tracker", ips.len());
                ips
            }
            Err(e) => {
                warn!("OSINT IP feed fetch failed, keeping previous set: {:#}", e);
                previous.ips.clone()
            }
        };

        let domains = match domains {
            Ok(domains) => {
                info!("Loaded {} malicious domains from URLhaus", domains.len());
                domains
            }
            Err(e) => {
                warn!("OSINT domain feed fetch failed, keeping previous set: {:#}", e);
                previous.domains.clone()
            }
        };

        store.replace(IndicatorSet { ips, domains });
        Ok(())
    }
}

/// Background refresh loop; ticks every `update_interval_hours` and
/// exits promptly on shutdown.
pub fn spawn_refresh_task(
    client: FeedClient,
    store: Arc<IndicatorStore>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(client.config.update_interval_hours.max(1) * 3600);

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // The first tick fires immediately; the initial refresh already
        // ran during startup
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running scheduled OSINT refresh");
                    if let Err(e) = client.refresh(&store).await {
                        warn!("OSINT refresh failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Stopping OSINT refresh task");
                    break;
                }
            }
        }
    })
}
