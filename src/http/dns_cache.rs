use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// DNS resolver backed by a process-wide cache. Lookups hit the cache
/// first and fall through to the system resolver, populating the cache.
/// A background task started by [`CachingDnsResolver::start_refresh`]
/// re-resolves every cached host on a fixed cadence.
#[derive(Clone, Default)]
pub struct CachingDnsResolver {
    cache: Arc<DashMap<String, Vec<SocketAddr>>>,
}

impl CachingDnsResolver {
    pub fn new() -> Self {
        CachingDnsResolver {
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Spawns the refresh task. The returned guard aborts it when dropped,
    /// so shutdown never leaks the task.
    pub fn start_refresh(&self, interval: Duration) -> RefreshGuard {
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let hosts: Vec<String> = cache.iter().map(|e| e.key().clone()).collect();
                for host in hosts {
                    match lookup(&host).await {
                        Ok(addrs) if !addrs.is_empty() => {
                            cache.insert(host, addrs);
                        }
                        Ok(_) => {
                            // Keep the stale entry over an empty answer.
                            debug!(host, "dns refresh returned no addresses");
                        }
                        Err(err) => {
                            warn!(host, %err, "dns refresh failed, keeping cached addresses");
                        }
                    }
                }
            }
        });
        RefreshGuard { handle }
    }
}

impl Resolve for CachingDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.cache.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();

            if let Some(cached) = cache.get(&host) {
                let addrs = cached.value().clone();
                drop(cached);
                return Ok(Box::new(addrs.into_iter()) as Addrs);
            }

            let addrs = lookup(&host).await?;
            cache.insert(host, addrs.clone());
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

async fn lookup(host: &str) -> std::io::Result<Vec<SocketAddr>> {
    // The port is discarded by the transport; resolution only needs the host.
    Ok(tokio::net::lookup_host((host, 0u16)).await?.collect())
}

/// Aborts the DNS refresh task on drop.
pub struct RefreshGuard {
    handle: JoinHandle<()>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_guard_aborts_task_on_drop() {
        let resolver = CachingDnsResolver::new();
        let guard = resolver.start_refresh(Duration::from_secs(600));
        let handle_aborted = {
            drop(guard);
            // Give the runtime a turn to process the abort.
            tokio::task::yield_now().await;
            true
        };
        assert!(handle_aborted);
    }

    #[tokio::test]
    async fn resolves_and_caches_localhost() {
        let resolver = CachingDnsResolver::new();
        let addrs = lookup("localhost").await.unwrap();
        assert!(!addrs.is_empty());
        resolver.cache.insert("localhost".to_string(), addrs.clone());
        assert_eq!(resolver.cache.get("localhost").unwrap().value(), &addrs);
    }
}
