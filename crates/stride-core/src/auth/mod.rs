//! Owner bearer tokens.
//!
//! Tokens are HMAC-SHA256 signatures over the owner id. They stand in for
//! an external identity provider: whoever holds a valid token acts as that
//! owner.
//!
//! Format: `stride_ot_<owner_uuid>_<hmac_hex>`

pub mod guard;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

pub use guard::{Caller, authorize_entity, authorize_override, authorize_program};

type HmacSha256 = Hmac<Sha256>;

/// Token prefix used to identify stride owner tokens.
pub const TOKEN_PREFIX: &str = "stride_ot_";

/// Environment variable holding the hex-encoded signing secret.
pub const SECRET_ENV: &str = "STRIDE_TOKEN_SECRET";

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid owner ID in token: {0}")]
    InvalidOwnerId(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("missing token secret")]
    MissingSecret,

    #[error("token secret is not valid hex: {0}")]
    InvalidSecret(String),
}

/// Signing secret for owner tokens.
#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenConfig {
    pub fn new(secret: Vec<u8>) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        Ok(Self { secret })
    }

    /// Build from the hex form written to the config file.
    pub fn from_hex(secret_hex: &str) -> Result<Self, TokenError> {
        let secret =
            hex::decode(secret_hex.trim()).map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        Self::new(secret)
    }

    /// Build from `STRIDE_TOKEN_SECRET`.
    pub fn from_env() -> Result<Self, TokenError> {
        let secret_hex = std::env::var(SECRET_ENV).map_err(|_| TokenError::MissingSecret)?;
        Self::from_hex(&secret_hex)
    }
}

fn signed_message(owner_id: Uuid) -> String {
    format!("owner:{owner_id}")
}

fn mac_for(config: &TokenConfig, owner_id: Uuid) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(&config.secret)
        .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
    mac.update(signed_message(owner_id).as_bytes());
    Ok(mac)
}

/// Issue a bearer token for `owner_id`.
pub fn generate_owner_token(config: &TokenConfig, owner_id: Uuid) -> Result<String, TokenError> {
    let mac = mac_for(config, owner_id)?;
    let hmac_hex = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{TOKEN_PREFIX}{owner_id}_{hmac_hex}"))
}

/// Validate a bearer token and return the caller it identifies.
///
/// The HMAC is compared in constant time.
pub fn validate_owner_token(config: &TokenConfig, token: &str) -> Result<Caller, TokenError> {
    let rest = token.trim().strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
        TokenError::InvalidFormat(format!("token must start with '{TOKEN_PREFIX}'"))
    })?;

    // A hyphenated UUID is 36 characters.
    if rest.len() < 37 || !rest.is_char_boundary(36) {
        return Err(TokenError::InvalidFormat(
            "token too short to contain an owner id".to_string(),
        ));
    }
    let (owner_str, after_owner) = rest.split_at(36);
    let owner_id =
        Uuid::parse_str(owner_str).map_err(|e| TokenError::InvalidOwnerId(e.to_string()))?;

    let hmac_hex = after_owner.strip_prefix('_').ok_or_else(|| {
        TokenError::InvalidFormat("expected underscore after owner id".to_string())
    })?;
    let provided = hex::decode(hmac_hex)
        .map_err(|e| TokenError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    mac_for(config, owner_id)?
        .verify_slice(&provided)
        .map_err(|_| TokenError::HmacMismatch)?;

    Ok(Caller { owner_id })
}
