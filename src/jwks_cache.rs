use std::{future::Future, sync::Arc, time::Duration};

use jsonwebtoken::jwk::JwkSet;

use crate::Error;

const JWK_SET_KEY: &str = "jwk_set";

/// Process-local cache holding at most one JWK set.
///
/// Without a time-to-live the first successfully fetched set is kept for the lifetime of the cache. Entries are only
/// inserted once a fetch has fully completed, so concurrent readers observe either no set or a complete one. Two
/// requests racing on an empty cache may both fetch; the last completed fetch wins.
///
/// Can safely be cloned and shared across threads since moka internally uses an Arc.
#[derive(Clone)]
pub(crate) struct JwksCache {
    cache: moka::future::Cache<&'static str, Arc<JwkSet>>,
}

impl JwksCache {
    pub(crate) fn new(time_to_live: Option<Duration>) -> Self {
        let builder = moka::future::Cache::builder().max_capacity(1);
        let cache = match time_to_live {
            Some(time_to_live) => builder.time_to_live(time_to_live).build(),
            None => builder.build(),
        };
        JwksCache { cache }
    }

    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<JwkSet>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JwkSet, Error>>,
    {
        if let Some(jwk_set) = self.cache.get(JWK_SET_KEY).await {
            return Ok(jwk_set);
        }

        let jwk_set = Arc::new(fetch().await?);
        self.cache.insert(JWK_SET_KEY, jwk_set.clone()).await;
        Ok(jwk_set)
    }

    pub(crate) async fn invalidate(&self) {
        self.cache.invalidate(JWK_SET_KEY).await;
    }
}
