//! JWT client assertions for the `private_key_jwt` client authentication
//! method (RFC 7523, SMART Backend Services).
//!
//! # Claims
//!
//! - `iss` / `sub`: the client id
//! - `aud`: the token endpoint URL
//! - `exp`: five minutes from now
//! - `jti`: 256 random bits, hex encoded
//!
//! Defaults are filled in by [`create_client_assertion`]; any claim the caller
//! passes replaces the default of the same name. The JWT header always
//! carries `kty` next to `alg`, `typ` and `kid`, and header overrides are
//! merged on top.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::key::{PrivateKey, SigningAlgorithm, SigningError};

/// Lifetime of a client assertion in seconds.
pub const ASSERTION_LIFETIME_SECONDS: i64 = 300;

/// `client_assertion_type` value for JWT bearer client assertions.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Claims of a client assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Issuer - the client id.
    pub iss: String,
    /// Subject - the client id.
    pub sub: String,
    /// Audience - the token endpoint URL.
    pub aud: String,
    /// Expiration time as Unix timestamp.
    pub exp: i64,
    /// Unique token identifier.
    pub jti: String,
}

impl ClientAssertionClaims {
    /// Claims identifying `client_id` to `token_endpoint`, expiring in five minutes.
    #[must_use]
    pub fn new(client_id: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            iss: client_id.clone(),
            sub: client_id,
            aud: token_endpoint.into(),
            exp: default_expiration(),
            jti: generate_jti(),
        }
    }

    /// Converts the claims into a JSON object for [`create_client_assertion`].
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Overrides for how an assertion is signed.
#[derive(Debug, Clone, Default)]
pub struct SigningOptions {
    /// Algorithm to sign with instead of the key's default.
    pub algorithm: Option<SigningAlgorithm>,
    /// `kid` to advertise instead of the key's own.
    pub key_id: Option<String>,
    /// Extra or replacement JWT header members.
    pub header: Map<String, Value>,
}

impl SigningOptions {
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: Value) -> Self {
        self.header.insert(name.into(), value);
        self
    }
}

/// Generates a fresh `jti`: 32 random bytes, hex encoded.
#[must_use]
pub fn generate_jti() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn default_expiration() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() + ASSERTION_LIFETIME_SECONDS
}

/// Builds and signs a client assertion.
///
/// `claims` override the default `exp` and `jti`; they normally carry `iss`,
/// `sub` and `aud`.
///
/// # Errors
///
/// Returns an error if the key cannot sign with the chosen algorithm.
pub fn create_client_assertion(
    claims: Map<String, Value>,
    options: SigningOptions,
    key: &PrivateKey,
) -> Result<String, SigningError> {
    let mut payload = Map::new();
    payload.insert("exp".into(), json!(default_expiration()));
    payload.insert("jti".into(), json!(generate_jti()));
    payload.extend(claims);

    let algorithm = options.algorithm.unwrap_or(key.alg);
    let key_id = options.key_id.or_else(|| key.kid.clone());

    let mut header = Map::new();
    header.insert("alg".into(), json!(algorithm.as_str()));
    header.insert("typ".into(), json!("JWT"));
    if let Some(kid) = key_id {
        header.insert("kid".into(), json!(kid));
    }
    header.insert("kty".into(), json!(key.kty.as_str()));
    header.extend(options.header);

    let encoding_key = key.encoding_key(algorithm)?;

    let signing_input = format!(
        "{}.{}",
        encode_segment(&header)?,
        encode_segment(&payload)?
    );
    let signature = jsonwebtoken::crypto::sign(
        signing_input.as_bytes(),
        &encoding_key,
        algorithm.to_jwt_algorithm(),
    )?;

    Ok(format!("{signing_input}.{signature}"))
}

fn encode_segment(segment: &Map<String, Value>) -> Result<String, SigningError> {
    let bytes = serde_json::to_vec(segment).map_err(|e| SigningError::signing(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Produces signed client assertions.
///
/// The authorizer depends on this trait rather than on a JWT library so tests
/// can substitute a deterministic signer.
pub trait AssertionSigner: Send + Sync {
    /// Signs `claims` with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    fn sign(&self, claims: Map<String, Value>, key: &PrivateKey) -> Result<String, SigningError>;
}

/// [`AssertionSigner`] backed by [`create_client_assertion`].
#[derive(Debug, Clone, Default)]
pub struct JwtAssertionSigner {
    options: SigningOptions,
}

impl JwtAssertionSigner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `options` to every assertion this signer produces.
    #[must_use]
    pub fn with_options(options: SigningOptions) -> Self {
        Self { options }
    }
}

impl AssertionSigner for JwtAssertionSigner {
    fn sign(&self, claims: Map<String, Value>, key: &PrivateKey) -> Result<String, SigningError> {
        create_client_assertion(claims, self.options.clone(), key)
    }
}
