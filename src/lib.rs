//! OAuth2 bearer-token authorization for the ProdManager API, as [middleware for
//! `axum`](https://docs.rs/axum/latest/axum/middleware/index.html) or as a framework-independent check.
//!
//! ## Overview
//!
//! Protected API routes accept access tokens issued by an OpenID Connect provider such as Keycloak. At startup, the
//! provider's [discovery document](https://openid.net/specs/openid-connect-discovery-1_0.html) is fetched once to learn
//! its issuer and the location of its [JSON Web Key Set](https://datatracker.ietf.org/doc/html/rfc7517). Per request,
//! the bearer token from the `Authorization` header is validated:
//!
//! - **Signature**: only `RS256` is accepted, verified with the JWK matching the token's `kid`.
//! - **Issuer**: `iss` must equal the discovered issuer.
//! - **Audience**: `aud` must equal or contain the configured audience, unless the check is disabled.
//! - **Time**: `exp`, `nbf` and `iat` are checked with a configurable leeway.
//!
//! Validated claims are attached to the request. Keycloak role grants (`resource_access.<client>.roles` and
//! `realm_access.roles`) can then be required per route.
//!
//! Failed authentication is answered with `401 Unauthorized` and an RFC 6750 `WWW-Authenticate` challenge, a missing
//! role with `403 Forbidden`.
//!
//! ## Caching
//!
//! The JWK set is fetched on the first validated token and cached for the lifetime of the validator. A time-to-live
//! can be configured via [`RemoteJwkSetBuilder::with_cache_ttl`] for providers that rotate keys.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use axum::{
//!     routing::{get, post},
//!     Router,
//! };
//! use prodmanager_auth::{Claims, OidcSettings, ResourceProtector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads OIDC_WELL_KNOWN, OIDC_AUDIENCE, OIDC_DISABLE_AUDIENCE_CHECK, OIDC_DEBUG, ...
//!     let settings = OidcSettings::from_env()?;
//!
//!     // Discovery failures are fatal: don't serve protected routes without a validator.
//!     let protector = ResourceProtector::initialize(&settings).await?;
//!
//!     let router = Router::new()
//!         .route(
//!             "/api/produtos",
//!             get(|claims: Claims| async move { format!("Hello {:?}", claims.subject()) })
//!                 .merge(
//!                     post(|| async { "created" })
//!                         .route_layer(protector.require_role("products:write")),
//!                 ),
//!         )
//!         .layer(protector.layer());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod authorization;
pub mod claims;
pub mod config;
pub mod oidc;
pub mod rbac;
pub mod validator;

pub use authorization::{Rejection, ResourceProtector};
pub use claims::{Claims, RawClaims};
pub use crate::config::{OidcSettings, ValidatorConfig};
pub use error::{Error, TokenRejection};
pub use jwk_set::KeySource;
pub use remote_jwk_set::{RemoteJwkSet, RemoteJwkSetBuilder};
pub use validator::{JwtValidator, TokenValidator};

mod error;
mod jwk_set;
mod jwks_cache;
mod remote_jwk_set;

#[cfg(test)]
mod testutil;
