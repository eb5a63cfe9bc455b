use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{OidcSettings, ValidatorConfig};
use crate::remote_jwk_set::RemoteJwkSet;
use crate::validator::JwtValidator;
use crate::Error;

/// Response payload of the OpenID provider's `.well-known/openid-configuration` endpoint.
///
/// Only covers those fields that are relevant in our context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    /// Expected value of the `iss` claim of every token the provider issues.
    pub issuer: String,
    /// The URI where to retrieve the OIDC provider's signing keys.
    pub jwks_uri: Url,
}

/// Fetches the provider metadata from `well_known_url` with a single GET request.
pub async fn discover(
    http_client: &Client,
    well_known_url: &Url,
    timeout: Duration,
) -> Result<OpenIdConfiguration, Error> {
    let body = http_client
        .get(well_known_url.clone())
        .timeout(timeout)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| Error::retrieval(well_known_url, e))?
        .bytes()
        .await
        .map_err(|e| Error::retrieval(well_known_url, e))?;

    serde_json::from_slice(&body).map_err(Error::MalformedDiscoveryDocument)
}

/// Runs OIDC discovery and builds the validator for all protected routes.
///
/// Failing here means the provider is unreachable or misconfigured; protected routes must not be served then. The
/// JWK set itself is fetched lazily on the first validated token.
pub async fn initialize(settings: &OidcSettings) -> Result<JwtValidator, Error> {
    let http_client = Client::new();
    let configuration =
        discover(&http_client, &settings.well_known, settings.http_timeout()).await?;

    let expected_audience = settings.expected_audience();
    tracing::info!(
        issuer = %configuration.issuer,
        jwks_uri = %configuration.jwks_uri,
        audience = ?settings.audience,
        audience_check = if expected_audience.is_some() { "on" } else { "off" },
        "discovered OpenID Connect provider"
    );

    let mut remote_jwk_set = RemoteJwkSet::builder(configuration.jwks_uri.clone())
        .with_http_client(http_client)
        .with_timeout(settings.http_timeout());
    if let Some(time_to_live) = settings.jwks_cache_ttl() {
        remote_jwk_set = remote_jwk_set.with_cache_ttl(time_to_live);
    }

    let config = ValidatorConfig {
        issuer: configuration.issuer,
        jwks_uri: configuration.jwks_uri,
        expected_audience,
        http_timeout: settings.http_timeout(),
        leeway: settings.leeway_secs,
        debug_logging: settings.debug,
    };
    Ok(JwtValidator::new(config, remote_jwk_set.build()))
}
