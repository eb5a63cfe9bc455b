//! RS256 bearer-token validation against a JWK set.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::future::BoxFuture;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use serde_json::{Map, Value};

use crate::claims::{normalize, RawClaims};
use crate::config::ValidatorConfig;
use crate::jwk_set::KeySource;
use crate::remote_jwk_set::RemoteJwkSet;
use crate::{Claims, Error, TokenRejection};

/// The only accepted signing algorithm. Everything else is rejected before any key is looked up.
pub const ACCEPTED_ALGORITHM: Algorithm = Algorithm::RS256;

/// Turns a raw bearer token into verified [`Claims`].
pub trait TokenValidator: Send + Sync {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, Error>>;
}

/// Validates RS256-signed JWTs issued by a single OpenID Connect provider.
#[derive(Debug, Clone)]
pub struct JwtValidator {
    config: Arc<ValidatorConfig>,
    keys: KeySource,
}

impl JwtValidator {
    pub fn new(config: ValidatorConfig, keys: impl Into<KeySource>) -> Self {
        Self {
            config: Arc::new(config),
            keys: keys.into(),
        }
    }

    /// Validator fetching its keys from `config.jwks_uri`, honouring `config.http_timeout`.
    pub fn with_remote_jwk_set(config: ValidatorConfig) -> Self {
        let remote_jwk_set = RemoteJwkSet::builder(config.jwks_uri.clone())
            .with_timeout(config.http_timeout)
            .build();
        Self::new(config, remote_jwk_set)
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySource {
        &self.keys
    }

    pub(crate) async fn validate_at(&self, token: &str, now: u64) -> Result<Claims, Error> {
        let (header, payload) = parse_unverified(token)?;
        if self.config.debug_logging {
            tracing::debug!(
                alg = ?header.alg,
                kid = ?header.kid,
                iss = ?payload.get("iss"),
                aud = ?payload.get("aud"),
                exp = ?payload.get("exp"),
                nbf = ?payload.get("nbf"),
                "validating bearer token"
            );
        }

        if header.alg != ACCEPTED_ALGORITHM {
            return Err(TokenRejection::Malformed.into());
        }
        let kid = header.kid.ok_or(TokenRejection::Malformed)?;

        let jwk = self
            .keys
            .find(&kid)
            .await?
            .ok_or(TokenRejection::UnknownKey)?;
        let decoding_key = decoding_key(&jwk)?;
        let payload = verify_signature(token, &decoding_key)?;

        self.check_issuer(&payload)?;
        self.check_audience(&payload)?;
        check_time(&payload, now, self.config.leeway)?;

        Ok(normalize(RawClaims::Mapping(payload)))
    }

    fn check_issuer(&self, payload: &Map<String, Value>) -> Result<(), TokenRejection> {
        match payload.get("iss").and_then(Value::as_str) {
            Some(issuer) if issuer == self.config.issuer => Ok(()),
            _ => Err(TokenRejection::IssuerMismatch),
        }
    }

    fn check_audience(&self, payload: &Map<String, Value>) -> Result<(), TokenRejection> {
        let Some(expected) = self.config.expected_audience.as_deref() else {
            return Ok(());
        };
        let matches = match payload.get("aud") {
            Some(Value::String(audience)) => audience == expected,
            Some(Value::Array(audiences)) => audiences.iter().any(|a| a.as_str() == Some(expected)),
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(TokenRejection::AudienceMismatch)
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, Error>> {
        Box::pin(self.validate_at(token, jsonwebtoken::get_current_timestamp()))
    }
}

/// Decodes header and payload without looking at the signature.
fn parse_unverified(token: &str) -> Result<(Header, Map<String, Value>), TokenRejection> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, signature] = segments.as_slice() else {
        return Err(TokenRejection::Malformed);
    };
    if signature.is_empty() {
        return Err(TokenRejection::Malformed);
    }

    let header = decode_header(token).map_err(|_| TokenRejection::Malformed)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenRejection::Malformed)?;
    let payload = serde_json::from_slice(&payload).map_err(|_| TokenRejection::Malformed)?;
    Ok((header, payload))
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, TokenRejection> {
    if matches!(jwk.common.key_algorithm.as_ref(), Some(alg) if *alg != KeyAlgorithm::RS256) {
        return Err(TokenRejection::UnknownKey);
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|_| TokenRejection::UnknownKey),
        _ => Err(TokenRejection::UnknownKey),
    }
}

/// Checks the signature only; claim checks are done separately so that each failure maps to its own reason.
fn verify_signature(
    token: &str,
    decoding_key: &DecodingKey,
) -> Result<Map<String, Value>, TokenRejection> {
    let mut validation = Validation::new(ACCEPTED_ALGORITHM);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    decode::<Map<String, Value>>(token, decoding_key, &validation)
        .map(|token_data| token_data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenRejection::BadSignature,
            _ => TokenRejection::Malformed,
        })
}

/// `now` must lie within `[nbf - leeway, exp + leeway]`, both ends inclusive, and `iat` must not be more than
/// `leeway` seconds ahead of `now`.
fn check_time(payload: &Map<String, Value>, now: u64, leeway: u64) -> Result<(), TokenRejection> {
    let now = i64::try_from(now).unwrap_or(i64::MAX);
    let leeway = i64::try_from(leeway).unwrap_or(i64::MAX);

    if let Some(exp) = numeric_date(payload, "exp")? {
        if now > exp.saturating_add(leeway) {
            return Err(TokenRejection::Expired);
        }
    }
    if let Some(nbf) = numeric_date(payload, "nbf")? {
        if now < nbf.saturating_sub(leeway) {
            return Err(TokenRejection::NotYetValid);
        }
    }
    if let Some(iat) = numeric_date(payload, "iat")? {
        if iat > now.saturating_add(leeway) {
            return Err(TokenRejection::NotYetValid);
        }
    }
    Ok(())
}

fn numeric_date(payload: &Map<String, Value>, name: &str) -> Result<Option<i64>, TokenRejection> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|seconds| seconds as i64))
            .map(Some)
            .ok_or(TokenRejection::Malformed),
        Some(_) => Err(TokenRejection::Malformed),
    }
}
