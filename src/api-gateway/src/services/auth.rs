//! Bearer token verification
//!
//! Tokens are issued by the auth backend and signed with a secret shared with the
//! gateway. The gateway only verifies them: signature and expiry are checked, the
//! claims become an [`Identity`] for the lifetime of one request, and nothing is
//! looked up in a user store.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Caller role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Usuario,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Usuario => write!(f, "usuario"),
        }
    }
}

/// Reasons a request fails authentication. Each one has its own message so
/// clients can tell "log in again" apart from "refresh".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token not provided")]
    Missing,

    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    /// The role gate ran without a verified identity on the request.
    #[error("token not verified")]
    Unverified,
}

/// Claims the auth backend signs into every token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: i64,
    pub email: String,
    #[serde(alias = "rol")]
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Verified caller identity, attached to the request extensions
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

impl TryFrom<TokenClaims> for Identity {
    type Error = TokenError;

    fn try_from(claims: TokenClaims) -> Result<Self, Self::Error> {
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::Invalid)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Invalid)?;

        Ok(Self {
            id: claims.id,
            email: claims.email,
            role: claims.role,
            issued_at,
            expires_at,
        })
    }
}

/// HS256 token verifier
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify the raw value of an `Authorization` header.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Identity, TokenError> {
        let mut parts = header.unwrap_or_default().split_whitespace();
        let scheme = parts.next();
        let token = parts.next().ok_or(TokenError::Missing)?;

        if !scheme.is_some_and(|s| s.eq_ignore_ascii_case("bearer")) {
            return Err(TokenError::Invalid);
        }

        self.verify(token)
    }

    /// Verify a bare token.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                kind => {
                    debug!(reason = ?kind, "Token rejected");
                    TokenError::Invalid
                }
            },
        )?;

        Identity::try_from(data.claims)
    }
}
