//! Authentication and role-gate stages of a route chain

use axum::{extract::Request, http::header::AUTHORIZATION};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::services::auth::{Identity, Role, TokenError, TokenVerifier};

/// Verify the bearer token and attach the caller's [`Identity`] to the request.
pub fn authenticate(verifier: &TokenVerifier, request: &mut Request) -> Result<()> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let identity = verifier.verify_header(header).map_err(|reason| {
        debug!(
            path = %request.uri().path(),
            reason = %reason,
            "Authentication failed"
        );
        GatewayError::Authentication(reason)
    })?;

    debug!(
        user_id = identity.id,
        role = %identity.role,
        "User authenticated successfully"
    );

    request.extensions_mut().insert(identity);
    Ok(())
}

/// Admit the request only if the attached identity holds one of `roles`.
pub fn require_roles(request: &Request, roles: &[Role]) -> Result<()> {
    let identity = extract_identity(request).ok_or(TokenError::Unverified)?;

    if !identity.has_any_role(roles) {
        warn!(
            user_id = identity.id,
            role = %identity.role,
            required = ?roles,
            path = %request.uri().path(),
            "Role check failed"
        );
        return Err(GatewayError::Authorization);
    }

    Ok(())
}

/// Identity attached by [`authenticate`], if any
pub fn extract_identity(request: &Request) -> Option<&Identity> {
    request.extensions().get::<Identity>()
}
