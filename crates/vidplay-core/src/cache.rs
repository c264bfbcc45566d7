//! Content cache boundary
//!
//! The cache itself (storage, eviction, range fetches) lives outside this
//! crate. A session only asks it, by key, for a URL to hand to the engine: a
//! local file for cached content or a proxy URL that fills the cache while
//! streaming. The coordinator is shared between sessions and is never mutated
//! by them.

use crate::error::{Error, Result};
use crate::types::{CachePolicy, MediaLocation};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Supplies cache-backed URLs for remote sources
#[async_trait]
pub trait CacheCoordinator: Send + Sync {
    /// Resolve `remote_url` under `cache_key`.
    /// Fails with `Error::CacheUnavailable` when the cache cannot serve it.
    async fn resolve(
        &self,
        cache_key: &str,
        remote_url: &Url,
        headers: &HashMap<String, String>,
    ) -> Result<Url>;
}

/// Coordinator that never caches and streams straight from the network
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSource;

#[async_trait]
impl CacheCoordinator for DirectSource {
    async fn resolve(
        &self,
        _cache_key: &str,
        remote_url: &Url,
        _headers: &HashMap<String, String>,
    ) -> Result<Url> {
        Ok(remote_url.clone())
    }
}

/// Apply the cache policy to a location.
///
/// Without a policy the location is returned as is. When the cache fails, an
/// optional cache degrades to the remote URL and a required one fails the open.
pub async fn route_through_cache(
    cache: &dyn CacheCoordinator,
    location: MediaLocation,
    policy: Option<&CachePolicy>,
    headers: &HashMap<String, String>,
) -> Result<MediaLocation> {
    let (remote, policy) = match (location, policy) {
        (MediaLocation::Remote(url), Some(policy)) => (url, policy),
        (location, _) => return Ok(location),
    };

    match cache.resolve(&policy.cache_key, &remote, headers).await {
        Ok(url) => {
            debug!(cache_key = %policy.cache_key, url = %url, "Source routed through cache");
            Ok(MediaLocation::Remote(url))
        }
        Err(e) if policy.required => Err(match e {
            Error::CacheUnavailable(_) => e,
            other => Error::CacheUnavailable(other.to_string()),
        }),
        Err(e) => {
            warn!(cache_key = %policy.cache_key, error = %e, "Cache unavailable, using direct access");
            Ok(MediaLocation::Remote(remote))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct OfflineCache;

    #[async_trait]
    impl CacheCoordinator for OfflineCache {
        async fn resolve(
            &self,
            cache_key: &str,
            _remote_url: &Url,
            _headers: &HashMap<String, String>,
        ) -> Result<Url> {
            Err(Error::CacheUnavailable(format!("{cache_key} not cached")))
        }
    }

    struct ProxyCache;

    #[async_trait]
    impl CacheCoordinator for ProxyCache {
        async fn resolve(
            &self,
            cache_key: &str,
            _remote_url: &Url,
            _headers: &HashMap<String, String>,
        ) -> Result<Url> {
            Ok(Url::parse(&format!("http://127.0.0.1:8089/{cache_key}")).unwrap())
        }
    }

    fn remote() -> MediaLocation {
        MediaLocation::Remote(Url::parse("https://cdn.example.com/v.mp4").unwrap())
    }

    fn policy(required: bool) -> CachePolicy {
        CachePolicy {
            cache_key: "v1".into(),
            required,
        }
    }

    #[tokio::test]
    async fn test_proxy_rewrites_url() {
        let routed = route_through_cache(&ProxyCache, remote(), Some(&policy(false)), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(routed.to_string(), "http://127.0.0.1:8089/v1");
    }

    #[tokio::test]
    async fn test_optional_cache_falls_back() {
        let routed = route_through_cache(&OfflineCache, remote(), Some(&policy(false)), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(routed, remote());
    }

    #[tokio::test]
    async fn test_required_cache_fails() {
        let result =
            route_through_cache(&OfflineCache, remote(), Some(&policy(true)), &HashMap::new()).await;
        assert!(matches!(result, Err(Error::CacheUnavailable(_))));
    }

    #[tokio::test]
    async fn test_assets_bypass_cache() {
        let asset = MediaLocation::Asset(PathBuf::from("intro.mp4"));
        let routed = route_through_cache(&OfflineCache, asset.clone(), Some(&policy(true)), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(routed, asset);

        let routed = route_through_cache(&DirectSource, remote(), None, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(routed, remote());
    }
}
