use std::sync::Arc;

use jsonwebtoken::jwk::Jwk;

use crate::{remote_jwk_set::RemoteJwkSet, Error};

/// Convenience wrapper around either a [`RemoteJwkSet`] or a local [`jsonwebtoken::jwk::JwkSet`].
#[derive(Debug, Clone)]
pub enum KeySource {
    Local(Arc<jsonwebtoken::jwk::JwkSet>),
    Remote(RemoteJwkSet),
}

impl KeySource {
    pub async fn keys(&self) -> Result<Arc<jsonwebtoken::jwk::JwkSet>, Error> {
        match self {
            KeySource::Local(local_jwk_set) => Ok(local_jwk_set.clone()),
            KeySource::Remote(remote_jwk_set) => remote_jwk_set.jwk_set().await,
        }
    }

    pub async fn find(&self, kid: &str) -> Result<Option<Jwk>, Error> {
        Ok(self.keys().await?.find(kid).cloned())
    }
}

impl From<jsonwebtoken::jwk::JwkSet> for KeySource {
    fn from(jwk_set: jsonwebtoken::jwk::JwkSet) -> Self {
        KeySource::Local(Arc::new(jwk_set))
    }
}

impl From<RemoteJwkSet> for KeySource {
    fn from(remote_jwk_set: RemoteJwkSet) -> Self {
        KeySource::Remote(remote_jwk_set)
    }
}
