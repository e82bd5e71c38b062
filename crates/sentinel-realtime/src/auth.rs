//! Bearer-token admission for push sessions
//!
//! Token issuance belongs to the external auth surface; this module only
//! verifies. Admission requires an unexpired token whose tenant claim matches
//! the tenant in the requested path.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a push-channel bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user identifier).
    pub sub: String,
    /// Tenant the token grants access to.
    pub tenant_id: String,
    /// Expiration time (UTC timestamp).
    pub exp: usize,
    /// Issued at (UTC timestamp).
    pub iat: usize,
}

/// Admission failures map onto the documented close codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Close code 4001.
    #[error("token invalid or expired")]
    AuthFailure,

    /// Close code 4003.
    #[error("token tenant does not match requested channel")]
    TenantMismatch,
}

impl AdmissionError {
    pub fn close_code(&self) -> u16 {
        match self {
            AdmissionError::AuthFailure => 4001,
            AdmissionError::TenantMismatch => 4003,
        }
    }
}

pub fn verify_session_token(
    token: &str,
    secret: &str,
    expected_tenant: &str,
) -> Result<SessionClaims, AdmissionError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AdmissionError::AuthFailure)?;
    if data.claims.tenant_id != expected_tenant {
        return Err(AdmissionError::TenantMismatch);
    }
    Ok(data.claims)
}

/// Mint a session token. Kept next to verification for tooling and tests;
/// the production issuer lives in the external auth surface.
pub fn issue_session_token(
    subject: &str,
    tenant_id: &str,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = SessionClaims {
        sub: subject.to_string(),
        tenant_id: tenant_id.to_string(),
        exp: now + ttl_seconds as usize,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
