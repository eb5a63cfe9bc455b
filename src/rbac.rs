//! Role checks against Keycloak-style `resource_access` and `realm_access` claims.

use crate::{Claims, Error};

/// Whether `claims` grant `role`, either for `client_id` or realm-wide.
///
/// Missing or mistyped claim structures grant nothing; this never fails.
pub fn has_role(claims: &Claims, role: &str, client_id: &str) -> bool {
    has_resource_role(claims, client_id, role) || has_realm_role(claims, role)
}

/// Whether `claims` grant `role` in `resource_access.<client_id>.roles`.
pub fn has_resource_role(claims: &Claims, client_id: &str, role: &str) -> bool {
    claims.resource_roles(client_id).any(|r| r == role)
}

/// Whether `claims` grant `role` in `realm_access.roles`.
pub fn has_realm_role(claims: &Claims, role: &str) -> bool {
    claims.realm_roles().any(|r| r == role)
}

/// Like [`has_role`], but fails with [`Error::Authorization`] when the role is missing.
pub fn require_role(claims: &Claims, role: &str, client_id: &str) -> Result<(), Error> {
    if has_role(claims, role, client_id) {
        Ok(())
    } else {
        Err(Error::Authorization {
            role: role.to_string(),
        })
    }
}
