//! Private signing keys for client assertions.
//!
//! A [`PrivateKey`] pairs key material with the metadata a JWT header needs
//! (`alg`, `kid`, `kty`). Material is either a PKCS#8 PEM document or a
//! private JWK as published by SMART Backend Services clients. JWKs are
//! converted to PKCS#8 because `jsonwebtoken` only reads PEM/DER keys.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};
use p256::pkcs8::EncodePrivateKey as _;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while preparing a key or signing an assertion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SigningError {
    /// The key material cannot be parsed.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },

    /// The algorithm requires a different key type.
    #[error("Algorithm {algorithm} cannot be used with a {key_type} key")]
    AlgorithmMismatch {
        /// Requested algorithm.
        algorithm: SigningAlgorithm,
        /// Key type of the descriptor.
        key_type: KeyType,
    },

    /// The algorithm name is not supported.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Serialisation or signing failed.
    #[error("Failed to sign client assertion: {message}")]
    Signing {
        /// Description of the failure.
        message: String,
    },
}

impl SigningError {
    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for SigningError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::signing(err.to_string()),
        }
    }
}

// ============================================================================
// Algorithms and key types
// ============================================================================

/// Key family, as found in the JWK `kty` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "EC")]
    Ec,
}

impl KeyType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithms accepted for client assertions.
///
/// SMART Backend Services requires servers to support RS384 and ES384.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::RS512 => Algorithm::RS512,
            Self::ES256 => Algorithm::ES256,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
        }
    }

    /// The key family this algorithm signs with.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::RS256 | Self::RS384 | Self::RS512 => KeyType::Rsa,
            Self::ES256 | Self::ES384 => KeyType::Ec,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            _ => Err(SigningError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

// ============================================================================
// Key material
// ============================================================================

/// Private JSON Web Key. Public-only members are ignored.
#[derive(Clone, Deserialize)]
pub struct PrivateJwk {
    pub kty: KeyType,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    d: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    p: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

impl fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .field("crv", &self.crv)
            .finish_non_exhaustive()
    }
}

impl PrivateJwk {
    fn member(&self, name: &str) -> Result<Vec<u8>, SigningError> {
        let value = match name {
            "d" => self.d.as_deref(),
            "n" => self.n.as_deref(),
            "e" => self.e.as_deref(),
            "p" => self.p.as_deref(),
            "q" => self.q.as_deref(),
            _ => None,
        };
        let value = value.ok_or_else(|| SigningError::invalid_key(format!("JWK is missing '{name}'")))?;
        URL_SAFE_NO_PAD
            .decode(value.trim_end_matches('='))
            .map_err(|e| SigningError::invalid_key(format!("JWK member '{name}': {e}")))
    }

    fn uint(&self, name: &str) -> Result<BigUint, SigningError> {
        Ok(BigUint::from_bytes_be(&self.member(name)?))
    }

    /// Default algorithm for this JWK when none is declared.
    fn default_algorithm(&self) -> SigningAlgorithm {
        match (self.kty, self.crv.as_deref()) {
            (KeyType::Ec, Some("P-256")) => SigningAlgorithm::ES256,
            (KeyType::Ec, _) => SigningAlgorithm::ES384,
            (KeyType::Rsa, _) => SigningAlgorithm::RS384,
        }
    }

    fn to_encoding_key(&self) -> Result<EncodingKey, SigningError> {
        match self.kty {
            KeyType::Rsa => {
                let key = RsaPrivateKey::from_components(
                    self.uint("n")?,
                    self.uint("e")?,
                    self.uint("d")?,
                    vec![self.uint("p")?, self.uint("q")?],
                )
                .map_err(|e| SigningError::invalid_key(e.to_string()))?;
                let pem = key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| SigningError::invalid_key(e.to_string()))?;
                Ok(EncodingKey::from_rsa_pem(pem.as_bytes())?)
            }
            KeyType::Ec => {
                let d = self.member("d")?;
                let pem = match self.crv.as_deref() {
                    Some("P-384") => p384::SecretKey::from_slice(&d)
                        .map_err(|e| SigningError::invalid_key(e.to_string()))?
                        .to_pkcs8_pem(LineEnding::LF),
                    Some("P-256") => p256::SecretKey::from_slice(&d)
                        .map_err(|e| SigningError::invalid_key(e.to_string()))?
                        .to_pkcs8_pem(LineEnding::LF),
                    other => {
                        return Err(SigningError::invalid_key(format!(
                            "Unsupported EC curve: {}",
                            other.unwrap_or("(none)")
                        )));
                    }
                }
                .map_err(|e| SigningError::invalid_key(e.to_string()))?;
                Ok(EncodingKey::from_ec_pem(pem.as_bytes())?)
            }
        }
    }
}

/// Where the private key bytes come from.
#[derive(Clone)]
pub enum KeyMaterial {
    /// PKCS#8 PEM document.
    Pem(String),
    /// Private JWK.
    Jwk(PrivateJwk),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem(_) => f.write_str("Pem(<redacted>)"),
            Self::Jwk(jwk) => f.debug_tuple("Jwk").field(jwk).finish(),
        }
    }
}

/// Private key descriptor used to sign client assertions.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    /// Default signing algorithm.
    pub alg: SigningAlgorithm,
    /// Key id advertised in the JWT header (`kid`).
    pub kid: Option<String>,
    /// Key family, advertised in the JWT header (`kty`).
    pub kty: KeyType,
    pub material: KeyMaterial,
}

impl PrivateKey {
    /// Creates a descriptor from a PKCS#8 PEM document.
    ///
    /// The key type follows from the algorithm.
    #[must_use]
    pub fn from_pem(
        alg: SigningAlgorithm,
        kid: Option<String>,
        pem: impl Into<String>,
    ) -> Self {
        Self {
            alg,
            kid,
            kty: alg.key_type(),
            material: KeyMaterial::Pem(pem.into()),
        }
    }

    /// Creates a descriptor from a private JWK.
    ///
    /// `alg` and `kid` default to the JWK's own members; without an `alg`
    /// member RSA keys use RS384 and EC keys pick ES256/ES384 by curve.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWK names an unsupported algorithm.
    pub fn from_jwk(
        jwk: PrivateJwk,
        alg: Option<SigningAlgorithm>,
        kid: Option<String>,
    ) -> Result<Self, SigningError> {
        let alg = match (alg, jwk.alg.as_deref()) {
            (Some(alg), _) => alg,
            (None, Some(declared)) => declared.parse()?,
            (None, None) => jwk.default_algorithm(),
        };
        Ok(Self {
            alg,
            kid: kid.or_else(|| jwk.kid.clone()),
            kty: jwk.kty,
            material: KeyMaterial::Jwk(jwk),
        })
    }

    /// Parses a private JWK document and builds a descriptor from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a private JWK.
    pub fn from_jwk_json(
        json: &str,
        alg: Option<SigningAlgorithm>,
        kid: Option<String>,
    ) -> Result<Self, SigningError> {
        let jwk: PrivateJwk = serde_json::from_str(json)
            .map_err(|e| SigningError::invalid_key(format!("Invalid JWK: {e}")))?;
        Self::from_jwk(jwk, alg, kid)
    }

    /// Builds the `jsonwebtoken` key for signing with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm needs another key type or the
    /// material cannot be parsed.
    pub fn encoding_key(&self, algorithm: SigningAlgorithm) -> Result<EncodingKey, SigningError> {
        if algorithm.key_type() != self.kty {
            return Err(SigningError::AlgorithmMismatch {
                algorithm,
                key_type: self.kty,
            });
        }
        match &self.material {
            KeyMaterial::Pem(pem) => match self.kty {
                KeyType::Rsa => Ok(EncodingKey::from_rsa_pem(pem.as_bytes())?),
                KeyType::Ec => Ok(EncodingKey::from_ec_pem(pem.as_bytes())?),
            },
            KeyMaterial::Jwk(jwk) => {
                if jwk.kty != self.kty {
                    return Err(SigningError::invalid_key(format!(
                        "Descriptor declares {} but the JWK is {}",
                        self.kty, jwk.kty
                    )));
                }
                jwk.to_encoding_key()
            }
        }
    }
}
