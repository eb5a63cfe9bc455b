use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use futures::future::BoxFuture;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use tower::Layer;
use tower_service::Service;

use crate::config::{OidcSettings, DEFAULT_REALM};
use crate::validator::TokenValidator;
use crate::{oidc, rbac, Claims, Error};

/// Per-request entry point guarding protected routes with a single [`TokenValidator`].
///
/// Cloning is cheap; all clones share the validator and its key cache.
#[derive(Clone)]
pub struct ResourceProtector {
    validator: Arc<dyn TokenValidator>,
    realm: Arc<str>,
    client_id: Arc<str>,
}

impl ResourceProtector {
    pub fn new(validator: impl TokenValidator + 'static) -> Self {
        Self {
            validator: Arc::new(validator),
            realm: DEFAULT_REALM.into(),
            client_id: DEFAULT_REALM.into(),
        }
    }

    /// Discovers the provider configured in `settings` and protects routes with the resulting validator.
    pub async fn initialize(settings: &OidcSettings) -> Result<Self, Error> {
        let validator = oidc::initialize(settings).await?;
        Ok(Self::new(validator)
            .with_realm(&settings.realm)
            .with_client_id(&settings.client_id))
    }

    /// Realm announced in `WWW-Authenticate` challenges.
    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = realm.into();
        self
    }

    /// Client whose `resource_access` roles are checked by [`ResourceProtector::require_role`].
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Validates the bearer token in `headers`, independent of any web framework.
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<Claims, Error> {
        let token = bearer_token(headers)?;
        self.validator.validate(&token).await
    }

    /// Maps an authentication or authorization failure to the response sent to the client.
    pub fn reject(&self, error: Error) -> Rejection {
        Rejection {
            realm: Some(self.realm.clone()),
            error,
        }
    }

    /// Layer rejecting requests without a valid bearer token and attaching [`Claims`] to all others.
    pub fn layer(&self) -> AuthorizationLayer {
        AuthorizationLayer {
            protector: self.clone(),
        }
    }

    /// Layer rejecting requests whose claims do not grant `role`. Must run inside [`ResourceProtector::layer`].
    pub fn require_role(&self, role: &str) -> RequireRoleLayer {
        RequireRoleLayer {
            protector: self.clone(),
            role: role.into(),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, Error> {
    let Authorization(bearer) = headers
        .typed_try_get::<Authorization<Bearer>>()
        .map_err(|_| Error::InvalidAuthorizationHeader)?
        .ok_or(Error::MissingBearerToken)?;

    let token = bearer.token().trim();
    if token.is_empty() {
        return Err(Error::InvalidAuthorizationHeader);
    }
    Ok(token.to_string())
}

#[derive(Clone)]
pub struct AuthorizationLayer {
    protector: ResourceProtector,
}

impl<S> Layer<S> for AuthorizationLayer {
    type Service = AuthorizationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizationService {
            inner,
            protector: self.protector.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationService<S> {
    inner: S,
    protector: ResourceProtector,
}

impl<S> Service<Request> for AuthorizationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // Move the original service into the closure instead of its clone. This makes sure that the original service is
        // `call`ed instead of the cloned one, which might not be ready yet (`poll_ready` hasn't been called on the
        // clone yet).
        // See [docs](https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services).
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let protector = self.protector.clone();
        Box::pin(async move {
            match protector.authorize(req.headers()).await {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(auth_error) => {
                    log_rejection(&auth_error);
                    Ok(protector.reject(auth_error).into_response())
                }
            }
        })
    }
}

fn log_rejection(error: &Error) {
    match error {
        Error::KeyRetrieval { url, source } => {
            tracing::warn!(jwks_uri = %url, error = %source, "signing keys unavailable")
        }
        Error::MalformedKeySet(source) => {
            tracing::warn!(error = %source, "signing keys unusable")
        }
        _ => tracing::debug!(reason = %error, "rejected bearer token"),
    }
}

#[derive(Clone)]
pub struct RequireRoleLayer {
    protector: ResourceProtector,
    role: Arc<str>,
}

impl<S> Layer<S> for RequireRoleLayer {
    type Service = RequireRoleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRoleService {
            inner,
            protector: self.protector.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequireRoleService<S> {
    inner: S,
    protector: ResourceProtector,
    role: Arc<str>,
}

impl<S> Service<Request> for RequireRoleService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let granted = match req.extensions().get::<Claims>() {
            Some(claims) => rbac::require_role(claims, &self.role, self.protector.client_id()),
            None => Err(Error::MissingBearerToken),
        };
        let protector = self.protector.clone();
        Box::pin(async move {
            match granted {
                Ok(()) => inner.call(req).await,
                Err(auth_error) => {
                    log_rejection(&auth_error);
                    Ok(protector.reject(auth_error).into_response())
                }
            }
        })
    }
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or(Rejection {
                realm: Some(DEFAULT_REALM.into()),
                error: Error::MissingBearerToken,
            })
    }
}

/// HTTP response for a request that failed authentication (401) or authorization (403).
///
/// 401 responses carry an RFC 6750 `WWW-Authenticate` challenge. The description never contains token contents.
#[derive(Debug)]
pub struct Rejection {
    realm: Option<Arc<str>>,
    error: Error,
}

impl Rejection {
    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn status(&self) -> StatusCode {
        match self.error {
            Error::Authorization { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn challenge(&self, error: Option<(&str, &str)>) -> HeaderValue {
        let mut challenge = String::from("Bearer");
        let mut params = Vec::new();
        if let Some(realm) = &self.realm {
            params.push(format!("realm=\"{}\"", realm.replace('"', "'")));
        }
        if let Some((code, description)) = error {
            params.push(format!("error=\"{code}\""));
            params.push(format!("error_description=\"{description}\""));
        }
        if !params.is_empty() {
            challenge.push(' ');
            challenge.push_str(&params.join(", "));
        }
        HeaderValue::try_from(challenge).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let (challenge, body) = match &self.error {
            Error::Authorization { .. } => (
                self.challenge(Some(("insufficient_scope", "missing required role"))),
                json!({ "error": "forbidden" }),
            ),
            Error::MissingBearerToken | Error::InvalidAuthorizationHeader => (
                self.challenge(None),
                json!({ "error": "unauthorized", "error_description": self.error.to_string() }),
            ),
            error => {
                let description = match error {
                    Error::TokenValidation(reason) => reason.as_str(),
                    Error::KeyRetrieval { .. } | Error::MalformedKeySet(_) => {
                        "signing keys unavailable"
                    }
                    _ => "invalid token",
                };
                (
                    self.challenge(Some(("invalid_token", description))),
                    json!({ "error": "invalid_token", "error_description": description }),
                )
            }
        };

        let mut response = (self.status(), Json(body)).into_response();
        response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::routing::{get, post};
    use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use http::{HeaderMap, Request, StatusCode};
    use serde_json::{json, Value};
    use tokio::task;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use url::Url;

    use super::ResourceProtector;
    use crate::config::{OidcSettings, ValidatorConfig};
    use crate::testutil::{now, MockIdentityProvider, TestKey, AUDIENCE};
    use crate::validator::JwtValidator;
    use crate::{Claims, Error, TokenRejection};

    const ISSUER: &str = "https://idp/realms/prodmanager";

    fn protector() -> ResourceProtector {
        let config = ValidatorConfig::new(ISSUER, Url::parse("https://idp/certs").unwrap())
            .with_audience(AUDIENCE);
        ResourceProtector::new(JwtValidator::new(config, TestKey::primary().jwk_set()))
    }

    fn token(claims: Value) -> String {
        let mut claims = claims;
        claims["iss"] = json!(ISSUER);
        claims["aud"] = json!(AUDIENCE);
        claims["exp"] = json!(now() + 3600);
        TestKey::primary().sign(&claims)
    }

    fn router(protector: &ResourceProtector) -> axum::Router {
        axum::Router::new()
            .route(
                "/api/produtos",
                get(|claims: Claims| async move { claims.subject().unwrap_or_default().to_string() })
                    .merge(
                        post(|| async { StatusCode::CREATED })
                            .route_layer(protector.require_role("products:write")),
                    ),
            )
            .layer(protector.layer())
    }

    fn request(method: &str, token: Option<&str>) -> Request<Body> {
        let mut request = Request::builder().method(method).uri("/api/produtos");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn challenge(response: &axum::response::Response) -> &str {
        response.headers()[WWW_AUTHENTICATE].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler_with_claims() {
        let protector = protector();
        let token = token(json!({ "sub": "user-1" }));

        let response = router(&protector)
            .oneshot(request("GET", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"user-1");
    }

    #[tokio::test]
    async fn test_missing_header_is_challenged() {
        let response = router(&protector())
            .oneshot(request("GET", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), r#"Bearer realm="prodmanager-api""#);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "unauthorized", "error_description": "missing bearer token" })
        );
    }

    #[tokio::test]
    async fn test_extractor_without_layer_challenges_with_realm() {
        let router = axum::Router::new().route(
            "/api/produtos",
            get(|_claims: Claims| async { StatusCode::OK }),
        );

        let response = router.oneshot(request("GET", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), r#"Bearer realm="prodmanager-api""#);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_rejected() {
        let request = Request::builder()
            .uri("/api/produtos")
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();

        let response = router(&protector()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), r#"Bearer realm="prodmanager-api""#);
    }

    #[tokio::test]
    async fn test_invalid_token_names_the_reason() {
        let protector = protector().with_realm("products");
        let mut claims = json!({ "iss": ISSUER, "aud": AUDIENCE, "exp": now() - 3600 });
        let expired = TestKey::primary().sign(&claims);

        let response = router(&protector)
            .oneshot(request("GET", Some(&expired)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            challenge(&response),
            r#"Bearer realm="products", error="invalid_token", error_description="expired""#
        );
        assert_eq!(
            body_json(response).await,
            json!({ "error": "invalid_token", "error_description": "expired" })
        );

        claims["exp"] = json!(now() + 3600);
        let unknown_key = TestKey::secondary().sign(&claims);
        let response = router(&protector)
            .oneshot(request("GET", Some(&unknown_key)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["error_description"],
            json!("unknown_key")
        );
    }

    #[tokio::test]
    async fn test_role_is_required_for_writes() {
        let protector = protector();
        let writer = token(json!({
            "resource_access": { "prodmanager-api": { "roles": ["products:write"] } }
        }));
        let reader = token(json!({
            "resource_access": { "prodmanager-api": { "roles": ["products:read"] } }
        }));

        let response = router(&protector)
            .oneshot(request("POST", Some(&writer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router(&protector)
            .oneshot(request("POST", Some(&reader)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            challenge(&response),
            r#"Bearer realm="prodmanager-api", error="insufficient_scope", error_description="missing required role""#
        );
        assert_eq!(body_json(response).await, json!({ "error": "forbidden" }));

        // Reading only needs authentication.
        let response = router(&protector)
            .oneshot(request("GET", Some(&reader)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_role_check_uses_configured_client() {
        let protector = protector().with_client_id("inventory");
        let token = token(json!({
            "resource_access": {
                "prodmanager-api": { "roles": ["products:write"] },
                "inventory": { "roles": ["products:read"] },
            }
        }));

        let response = router(&protector)
            .oneshot(request("POST", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unavailable_keys_are_rejected_not_propagated() {
        let provider = MockIdentityProvider::start_without_jwks().await;
        let config = ValidatorConfig::new(provider.issuer(), provider.jwks_uri());
        let protector = ResourceProtector::new(JwtValidator::with_remote_jwk_set(config));
        let token = TestKey::primary().sign(&json!({ "iss": provider.issuer(), "exp": now() + 60 }));

        let response = router(&protector)
            .oneshot(request("GET", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "invalid_token", "error_description": "signing keys unavailable" })
        );
    }

    #[tokio::test]
    async fn test_authorize_without_tower() {
        let protector = protector();
        let mut headers = HeaderMap::new();

        assert!(matches!(
            protector.authorize(&headers).await,
            Err(Error::MissingBearerToken)
        ));

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(matches!(
            protector.authorize(&headers).await,
            Err(Error::InvalidAuthorizationHeader)
        ));

        headers.insert(AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());
        assert!(matches!(
            protector.authorize(&headers).await,
            Err(Error::TokenValidation(TokenRejection::Malformed))
        ));

        let token = token(json!({ "sub": "user-1" }));
        headers.insert(AUTHORIZATION, format!("bearer {token}").parse().unwrap());
        let claims = protector.authorize(&headers).await.unwrap();
        assert_eq!(claims.subject(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_initialized_protector_serves_requests() {
        let provider = MockIdentityProvider::start().await;
        let mut settings = OidcSettings::new(provider.well_known_url());
        settings.audience = Some(AUDIENCE.to_string());

        let protector = ResourceProtector::initialize(&settings).await.unwrap();
        let router = router(&protector);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let axum_server_addr = listener.local_addr().unwrap();

        let axum_shutdown_token = CancellationToken::new();
        let axum_shutdown_signal = axum_shutdown_token.clone().cancelled_owned();
        let _axum_shutdown_guard = axum_shutdown_token.drop_guard();
        task::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(axum_shutdown_signal)
                .await
                .unwrap();
        });

        let token = TestKey::primary().sign(&json!({
            "iss": provider.issuer(),
            "aud": AUDIENCE,
            "sub": "user-1",
            "exp": now() + 3600,
        }));
        let client = reqwest::Client::new();
        for _ in 0..3 {
            let response = client
                .get(format!("http://{axum_server_addr}/api/produtos"))
                .bearer_auth(&token)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.text().await.unwrap(), "user-1");
        }

        let response = client
            .get(format!("http://{axum_server_addr}/api/produtos"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(provider.requests_to(&provider.well_known_url()).await, 1);
        assert_eq!(provider.requests_to(&provider.jwks_uri()).await, 1);
    }
}
