//! Role checks on verified claims
//!
//! Roles come from `realm_access.roles`. These functions never touch keys or
//! signatures; they assume the [`ClaimSet`] already passed verification.

use tracing::warn;

use crate::error::{AuthError, Result};
use crate::jwt::ClaimSet;

/// Whether `claims` grants `role` (exact, case-sensitive)
pub fn has_role(claims: &ClaimSet, role: &str) -> bool {
    claims.roles().iter().any(|granted| granted == role)
}

/// Pass `claims` through if it grants `role`
///
/// # Errors
///
/// Returns [`AuthError::Forbidden`] if the role is not granted.
///
/// # Example
///
/// ```rust
/// use tokengate_auth::jwt::ClaimSet;
/// use tokengate_auth::rbac::require_role;
///
/// let claims: ClaimSet = serde_json::from_value(serde_json::json!({
///     "iss": "https://idp.example.com/realms/demo",
///     "exp": 1_900_000_000u64,
///     "realm_access": { "roles": ["user"] },
/// }))?;
///
/// let claims = require_role(claims, "user")?;
/// assert!(require_role(claims, "admin").is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn require_role(claims: ClaimSet, role: &str) -> Result<ClaimSet> {
    if has_role(&claims, role) {
        return Ok(claims);
    }

    warn!(
        sub = ?claims.sub,
        required_role = role,
        roles = ?claims.roles(),
        "Missing required role"
    );
    Err(AuthError::Forbidden {
        role: role.to_string(),
    })
}
