//! Host resolvability check
//!
//! Optional admission step: a record whose URL host has no address is
//! rejected before it reaches the store. Lookups are memoized per host for
//! the lifetime of the resolver, and concurrent lookups of the same host
//! share one query.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Name resolution backend
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn resolves(&self, host: &str) -> bool;
}

/// Resolves through the operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn resolves(&self, host: &str) -> bool {
        match tokio::net::lookup_host((host, 80)).await {
            Ok(mut addrs) => addrs.any(|addr| !addr.ip().is_unspecified()),
            Err(e) => {
                debug!(host, error = %e, "Host lookup failed");
                false
            },
        }
    }
}

pub struct HostResolver {
    lookup: Arc<dyn HostLookup>,
    cache: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl HostResolver {
    pub fn new(lookup: Arc<dyn HostLookup>) -> Self {
        Self {
            lookup,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemLookup))
    }

    /// IP literals always pass
    pub async fn is_resolvable(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if literal.parse::<IpAddr>().is_ok() {
            return true;
        }

        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(host.clone()).or_default().clone()
        };
        *cell
            .get_or_init(|| async { self.lookup.resolves(&host).await })
            .await
    }

    /// Number of distinct hosts looked up so far
    pub async fn cached_hosts(&self) -> usize {
        self.cache.lock().await.len()
    }
}
