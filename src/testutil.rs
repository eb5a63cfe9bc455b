//! Test keys, token signing and a mock identity provider.

use std::sync::LazyLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{jwk::JwkSet, Algorithm, EncodingKey, Header};
use reqwest::Client;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::oidc::{discover, OpenIdConfiguration};

pub(crate) const AUDIENCE: &str = "prodmanager-api";

const REALM_PATH: &str = "/realms/prodmanager";

static PRIMARY: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("k1"));
static SECONDARY: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("k2"));

pub(crate) fn now() -> u64 {
    jsonwebtoken::get_current_timestamp()
}

/// URL of the `/certs` endpoint of a bare mock server.
pub(crate) fn jwks_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/certs", server.uri())).unwrap()
}

pub(crate) struct TestKey {
    kid: &'static str,
    private_key: RsaPrivateKey,
}

impl TestKey {
    /// The key published by [`MockIdentityProvider`].
    pub(crate) fn primary() -> &'static TestKey {
        &PRIMARY
    }

    /// A key nobody publishes.
    pub(crate) fn secondary() -> &'static TestKey {
        &SECONDARY
    }

    fn generate(kid: &'static str) -> Self {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        Self { kid, private_key }
    }

    pub(crate) fn kid(&self) -> &str {
        self.kid
    }

    pub(crate) fn jwk_set_json(&self) -> Value {
        let public_key = self.private_key.to_public_key();
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": self.kid,
                "alg": "RS256",
                "use": "sig",
                "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }]
        })
    }

    pub(crate) fn jwk_set(&self) -> JwkSet {
        serde_json::from_value(self.jwk_set_json()).unwrap()
    }

    pub(crate) fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(self.kid, claims)
    }

    pub(crate) fn sign_with_kid(&self, kid: &str, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        self.sign_with_header(header, claims)
    }

    pub(crate) fn sign_with_header(&self, header: Header, claims: &Value) -> String {
        let pem = self.private_key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, claims, &encoding_key).unwrap()
    }
}

/// Keycloak-like provider publishing a discovery document and the primary test key.
pub(crate) struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    pub(crate) async fn start() -> Self {
        let provider = Self::start_without_jwks().await;
        Mock::given(method("GET"))
            .and(path(provider.jwks_uri().path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestKey::primary().jwk_set_json()))
            .mount(&provider.server)
            .await;
        provider
    }

    /// Provider whose JWKS endpoint answers with 404.
    pub(crate) async fn start_without_jwks() -> Self {
        let provider = Self {
            server: MockServer::start().await,
        };
        Mock::given(method("GET"))
            .and(path(provider.well_known_url().path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": provider.issuer(),
                "jwks_uri": provider.jwks_uri(),
                "token_endpoint": format!("{}/protocol/openid-connect/token", provider.issuer()),
            })))
            .mount(&provider.server)
            .await;
        provider
    }

    pub(crate) fn issuer(&self) -> String {
        format!("{}{REALM_PATH}", self.server.uri())
    }

    pub(crate) fn well_known_url(&self) -> Url {
        Url::parse(&format!("{}/.well-known/openid-configuration", self.issuer())).unwrap()
    }

    pub(crate) fn jwks_uri(&self) -> Url {
        Url::parse(&format!("{}/protocol/openid-connect/certs", self.issuer())).unwrap()
    }

    pub(crate) async fn discover(&self) -> OpenIdConfiguration {
        discover(
            &Client::new(),
            &self.well_known_url(),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    /// Number of requests the provider received for `url`.
    pub(crate) async fn requests_to(&self, url: &Url) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == url.path())
            .count()
    }
}
