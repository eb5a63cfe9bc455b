//! Shape-independent view of a token's claims.

use serde_json::{Map, Value};

/// Attributes under which wrapper objects expose the claims they carry, in lookup order.
const CLAIM_ATTRIBUTES: [&str; 3] = ["claims", "token", "_token"];

/// Claims of a verified token as a plain name to value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(pub Map<String, Value>);

/// The container shapes claims can arrive in.
#[derive(Debug, Clone)]
pub enum RawClaims {
    /// A JSON object of claims.
    Mapping(Map<String, Value>),
    /// An object carrying the actual claims under `claims`, `token` or `_token`.
    AttributeBag(Value),
    /// Name/value pairs; later pairs override earlier ones.
    Pairs(Vec<(String, Value)>),
    /// Any JSON value whose shape is not known up front.
    Json(Value),
}

impl From<Map<String, Value>> for RawClaims {
    fn from(mapping: Map<String, Value>) -> Self {
        RawClaims::Mapping(mapping)
    }
}

impl From<Value> for RawClaims {
    fn from(value: Value) -> Self {
        RawClaims::Json(value)
    }
}

impl From<Vec<(String, Value)>> for RawClaims {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        RawClaims::Pairs(pairs)
    }
}

/// Turns any supported claims container into [`Claims`].
///
/// Never fails: a shape that cannot be interpreted yields empty claims, which grant no roles.
pub fn normalize(raw: RawClaims) -> Claims {
    let mapping = match raw {
        RawClaims::Mapping(mapping) => Some(mapping),
        RawClaims::Pairs(pairs) => Some(pairs.into_iter().collect()),
        RawClaims::AttributeBag(bag) => CLAIM_ATTRIBUTES
            .iter()
            .filter_map(|attribute| bag.get(attribute))
            .filter(|inner| !inner.is_null())
            .find_map(as_mapping)
            .or_else(|| as_mapping(&bag)),
        RawClaims::Json(value) => as_mapping(&value),
    };
    Claims(mapping.unwrap_or_default())
}

/// Reads an object, or an array of `[name, value]` pairs, as a claim mapping.
fn as_mapping(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(mapping) => Some(mapping.clone()),
        Value::Array(entries) => entries
            .iter()
            .map(|entry| match entry.as_array().map(Vec::as_slice) {
                Some([Value::String(name), value]) => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

impl Claims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// All audiences, whether `aud` is a single string or a list.
    pub fn audiences(&self) -> Vec<&str> {
        match self.get("aud") {
            Some(Value::String(audience)) => vec![audience.as_str()],
            Some(Value::Array(audiences)) => audiences.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Roles granted realm-wide via `realm_access.roles`.
    pub fn realm_roles(&self) -> impl Iterator<Item = &str> {
        roles(self.get("realm_access"))
    }

    /// Roles granted for `client_id` via `resource_access.<client_id>.roles`.
    pub fn resource_roles<'a>(&'a self, client_id: &str) -> impl Iterator<Item = &'a str> {
        roles(
            self.get("resource_access")
                .and_then(|resource_access| resource_access.get(client_id)),
        )
    }
}

/// Strings of `access.roles`; anything missing or of the wrong type counts as no roles.
fn roles(access: Option<&Value>) -> impl Iterator<Item = &str> {
    access
        .and_then(|access| access.get("roles"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

impl From<Claims> for Value {
    fn from(claims: Claims) -> Self {
        Value::Object(claims.0)
    }
}
