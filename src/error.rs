use std::fmt;

use url::Url;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Network failure, timeout or non-success status while fetching a discovery document or JWK set.
    #[error("failed to fetch {url}")]
    KeyRetrieval {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("malformed JWK set")]
    MalformedKeySet(#[source] serde_json::Error),
    #[error("malformed OpenID Connect discovery document")]
    MalformedDiscoveryDocument(#[source] serde_json::Error),
    #[error("invalid token: {0}")]
    TokenValidation(#[from] TokenRejection),
    #[error("missing required role `{role}`")]
    Authorization { role: String },
    #[error("missing bearer token")]
    MissingBearerToken,
    #[error("invalid authorization header")]
    InvalidAuthorizationHeader,
    #[error("invalid OIDC configuration")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub(crate) fn retrieval(url: &Url, source: reqwest::Error) -> Self {
        Error::KeyRetrieval {
            url: url.clone(),
            source,
        }
    }
}

/// Why a presented bearer token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenRejection {
    Malformed,
    BadSignature,
    UnknownKey,
    IssuerMismatch,
    AudienceMismatch,
    Expired,
    NotYetValid,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::UnknownKey => "unknown_key",
            TokenRejection::IssuerMismatch => "issuer_mismatch",
            TokenRejection::AudienceMismatch => "audience_mismatch",
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not_yet_valid",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for TokenRejection {}
