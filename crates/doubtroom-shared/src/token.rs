use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::{Role, UserId};

// Token signed by the identity service, presented when opening a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectToken {
    pub user_id: UserId,
    pub role: Role,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl ConnectToken {
    /// Compact form carried in a header or query string.
    pub fn encode(&self) -> Result<String, TokenError> {
        let json =
            serde_json::to_vec(self).map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

// payload = user_id || 0x00 || role || 0x00 || valid_until (rfc3339)
fn signing_payload(user_id: &UserId, role: Role, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.as_str().as_bytes());
    payload.push(0);
    payload.extend_from_slice(role.as_str().as_bytes());
    payload.push(0);
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

/// Check expiry, lifetime window and signature of a connection token.
///
/// `max_lifetime` bounds how far in the future `valid_until` may lie, so the
/// identity service cannot hand out effectively permanent tokens.
pub fn verify_connect_token(
    token: &ConnectToken,
    server_pubkey: &[u8; 32],
    max_lifetime: Duration,
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    if now > token.valid_until {
        return Err(TokenError::Expired);
    }
    if token.valid_until - now > max_lifetime {
        return Err(TokenError::LifetimeTooLong);
    }

    let verifying_key =
        VerifyingKey::from_bytes(server_pubkey).map_err(|_| TokenError::InvalidServerKey)?;
    let signature =
        Signature::from_slice(&token.signature).map_err(|_| TokenError::InvalidSignature)?;

    let payload = signing_payload(&token.user_id, token.role, &token.valid_until);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| TokenError::InvalidSignature)
}

pub fn create_connect_token(
    user_id: &UserId,
    role: Role,
    valid_until: DateTime<Utc>,
    server_signing_key: &ed25519_dalek::SigningKey,
) -> ConnectToken {
    use ed25519_dalek::Signer;

    let payload = signing_payload(user_id, role, &valid_until);
    let signature = server_signing_key.sign(&payload);

    ConnectToken {
        user_id: user_id.clone(),
        role,
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}
