use std::{fmt, sync::Arc, time::Duration};

use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use url::Url;

use crate::{jwks_cache::JwksCache, Error};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for configuring a `RemoteJwkSet`.
pub struct RemoteJwkSetBuilder {
    url: Url,
    http_client: Option<Client>,
    timeout: Duration,
    cache_ttl: Option<Duration>,
}

impl RemoteJwkSetBuilder {
    /// Creates a new builder with the given JWKS URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_client: None,
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: None,
        }
    }

    /// Reuses an existing HTTP client, e.g. the one used for OIDC discovery.
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Bounds the time spent on fetching the JWK set.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expires the cached JWK set after `time_to_live`, so that the next request fetches it again.
    ///
    /// By default the first fetched set is kept for the lifetime of the `RemoteJwkSet`.
    pub fn with_cache_ttl(mut self, time_to_live: Duration) -> Self {
        self.cache_ttl = Some(time_to_live);
        self
    }

    /// Builds the `RemoteJwkSet` with the configured options.
    pub fn build(self) -> RemoteJwkSet {
        RemoteJwkSet {
            request: Arc::new(JwkSetRequest {
                http_client: self.http_client.unwrap_or_default(),
                url: self.url,
                timeout: self.timeout,
            }),
            cache: JwksCache::new(self.cache_ttl),
        }
    }
}

/// JWK set published by an authorization server, fetched on first use and cached afterwards.
#[derive(Clone)]
pub struct RemoteJwkSet {
    request: Arc<JwkSetRequest>,
    cache: JwksCache,
}

impl RemoteJwkSet {
    /// Creates a builder for configuring a `RemoteJwkSet`.
    pub fn builder(url: Url) -> RemoteJwkSetBuilder {
        RemoteJwkSetBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.request.url
    }

    /// Returns the cached JWK set, fetching it if nothing is cached yet.
    pub async fn jwk_set(&self) -> Result<Arc<JwkSet>, Error> {
        let request = self.request.clone();
        self.cache.get_or_fetch(|| async move { request.send().await }).await
    }

    /// Drops the cached JWK set, e.g. after the authorization server rotated its keys.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

impl fmt::Debug for RemoteJwkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteJwkSet")
            .field("url", &self.request.url.as_str())
            .field("timeout", &self.request.timeout)
            .finish_non_exhaustive()
    }
}

/// Helper wrapping a `reqwest::Client` to fetch a JWK Set from a given URL.
struct JwkSetRequest {
    http_client: Client,
    url: Url,
    timeout: Duration,
}

impl JwkSetRequest {
    async fn send(&self) -> Result<JwkSet, Error> {
        let response = self
            .http_client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::retrieval(&self.url, e))?;

        tracing::debug!(status = %response.status(), jwks_uri = %self.url, "fetched JWK set");

        let body = response
            .error_for_status()
            .map_err(|e| Error::retrieval(&self.url, e))?
            .bytes()
            .await
            .map_err(|e| Error::retrieval(&self.url, e))?;

        serde_json::from_slice(&body).map_err(Error::MalformedKeySet)
    }
}
