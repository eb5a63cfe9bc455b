use std::collections::HashMap;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use url::Url;

use crate::Error;

/// Environment variable prefix, e.g. `OIDC_WELL_KNOWN`.
pub const ENV_PREFIX: &str = "OIDC";

/// Realm announced in `WWW-Authenticate` challenges and client whose roles are checked.
pub const DEFAULT_REALM: &str = "prodmanager-api";

/// Startup settings read from the environment.
///
/// | Variable                       | Field                    | Default           |
/// |--------------------------------|--------------------------|-------------------|
/// | `OIDC_WELL_KNOWN`              | `well_known`             | required          |
/// | `OIDC_AUDIENCE`                | `audience`               | none              |
/// | `OIDC_DISABLE_AUDIENCE_CHECK`  | `disable_audience_check` | `false`           |
/// | `OIDC_DEBUG`                   | `debug`                  | `false`           |
/// | `OIDC_HTTP_TIMEOUT_SECS`       | `http_timeout_secs`      | `5`               |
/// | `OIDC_LEEWAY_SECS`             | `leeway_secs`            | `60`              |
/// | `OIDC_REALM`                   | `realm`                  | `prodmanager-api` |
/// | `OIDC_CLIENT_ID`               | `client_id`              | `prodmanager-api` |
/// | `OIDC_JWKS_CACHE_TTL_SECS`     | `jwks_cache_ttl_secs`    | cache forever     |
///
/// Booleans accept `1`, `true`, `yes` and `on`.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcSettings {
    pub well_known: Url,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub disable_audience_check: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_realm")]
    pub client_id: String,
    #[serde(default)]
    pub jwks_cache_ttl_secs: Option<u64>,
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_leeway_secs() -> u64 {
    60
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

impl OidcSettings {
    /// Settings with defaults for everything but the discovery URL.
    pub fn new(well_known: Url) -> Self {
        Self {
            well_known,
            audience: None,
            disable_audience_check: false,
            debug: false,
            http_timeout_secs: default_http_timeout_secs(),
            leeway_secs: default_leeway_secs(),
            realm: default_realm(),
            client_id: default_realm(),
            jwks_cache_ttl_secs: None,
        }
    }

    /// Reads the `OIDC_*` variables of the current process.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_source(None)
    }

    /// Same as [`OidcSettings::from_env`], but reads from `vars` instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, Error> {
        Self::from_source(Some(vars))
    }

    fn from_source(source: Option<HashMap<String, String>>) -> Result<Self, Error> {
        let settings = Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(source),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Option<Duration> {
        self.jwks_cache_ttl_secs.map(Duration::from_secs)
    }

    /// `None` when the audience check is switched off, the configured audience otherwise.
    pub fn expected_audience(&self) -> Option<String> {
        if self.disable_audience_check {
            None
        } else {
            self.audience.clone()
        }
    }
}

/// Immutable validation parameters, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub issuer: String,
    pub jwks_uri: Url,
    pub expected_audience: Option<String>,
    pub http_timeout: Duration,
    pub leeway: u64,
    pub debug_logging: bool,
}

impl ValidatorConfig {
    pub fn new(issuer: impl Into<String>, jwks_uri: Url) -> Self {
        Self {
            issuer: issuer.into(),
            jwks_uri,
            expected_audience: None,
            http_timeout: Duration::from_secs(default_http_timeout_secs()),
            leeway: default_leeway_secs(),
            debug_logging: false,
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }
}
