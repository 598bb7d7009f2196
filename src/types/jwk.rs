use crate::helpers::{deserialize_option_or_none, Base64UrlEncodedBytes};

use chrono::{DateTime, Utc};
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

new_type![
    /// ID of a JSON Web Key.
    #[derive(Deserialize, Hash, Ord, PartialOrd, Serialize)]
    pub JsonWebKeyId(String)
];

new_type![
    /// Base64url-encoded X.509 certificate thumbprint (`x5t`) of a JSON Web Key.
    #[derive(Deserialize, Hash, Serialize)]
    pub JsonWebKeyThumbprint(String)
];

/// Key type (`kty`) of a JSON Web Key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum JsonWebKeyType {
    /// RSA key pair.
    Rsa,
    /// Elliptic curve key pair.
    EllipticCurve,
    /// Any key type this crate cannot verify signatures with.
    Unsupported(String),
}
impl JsonWebKeyType {
    /// Maps a raw `kty` member to a key type.
    pub fn from_kty(kty: &str) -> Self {
        match kty {
            "RSA" => JsonWebKeyType::Rsa,
            "EC" => JsonWebKeyType::EllipticCurve,
            other => JsonWebKeyType::Unsupported(other.to_string()),
        }
    }

    /// Returns the `kty` member value.
    pub fn as_str(&self) -> &str {
        match self {
            JsonWebKeyType::Rsa => "RSA",
            JsonWebKeyType::EllipticCurve => "EC",
            JsonWebKeyType::Unsupported(kty) => kty,
        }
    }
}

/// Public key material derived from a JSON Web Key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    /// RSA public key.
    Rsa(RsaPublicKey),
    /// ECDSA public key on the NIST P-256 curve.
    P256(p256::ecdsa::VerifyingKey),
    /// ECDSA public key on the NIST P-384 curve.
    P384(p384::ecdsa::VerifyingKey),
}
impl PublicKey {
    /// Key type this key material belongs to.
    pub fn key_type(&self) -> JsonWebKeyType {
        match self {
            PublicKey::Rsa(_) => JsonWebKeyType::Rsa,
            PublicKey::P256(_) | PublicKey::P384(_) => JsonWebKeyType::EllipticCurve,
        }
    }
}

/// Error constructing a [`Jwk`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwkError {
    /// The JWK could not be deserialized.
    #[error("failed to parse JWK")]
    Parse(#[source] serde_json::Error),
    /// The `kty` member names a key type that is not supported.
    #[error("unsupported key type `{0}`")]
    UnsupportedKeyType(String),
    /// The `crv` member names a curve that is not supported.
    #[error("unsupported curve `{0}`")]
    UnsupportedCurve(String),
    /// A member required by the key type is absent.
    #[error("missing key parameter `{0}`")]
    MissingParameter(&'static str),
    /// The key members do not describe a valid public key.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    /// A PEM document could not be decoded as an RSA or EC public key.
    #[error("failed to decode PEM public key: {0}")]
    Pem(String),
}

// Members that do not parse as the expected type are ignored rather than failing the key, since
// member names are only meaningful relative to `kty`.
#[derive(Clone, Debug, Deserialize)]
struct RawJsonWebKey {
    kty: String,
    #[serde(default, rename = "use", deserialize_with = "deserialize_option_or_none")]
    use_: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    kid: Option<JsonWebKeyId>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    x5t: Option<JsonWebKeyThumbprint>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    alg: Option<String>,

    // RSA
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    n: Option<Base64UrlEncodedBytes>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    e: Option<Base64UrlEncodedBytes>,

    // Elliptic Curve
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    crv: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    x: Option<Base64UrlEncodedBytes>,
    #[serde(default, deserialize_with = "deserialize_option_or_none")]
    y: Option<Base64UrlEncodedBytes>,
}

/// Decoded public JSON Web Key, ready to verify signatures.
///
/// Every `Jwk` carries usable public key material; a JWK document that does not yield one is
/// rejected at construction time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Jwk {
    kid: Option<JsonWebKeyId>,
    x5t: Option<JsonWebKeyThumbprint>,
    use_: Option<String>,
    alg: Option<String>,
    created: DateTime<Utc>,
    public_key: PublicKey,
}
impl Jwk {
    /// Wraps existing public key material, stamped with the given creation time.
    pub fn new(public_key: PublicKey, created: DateTime<Utc>) -> Self {
        Self {
            kid: None,
            x5t: None,
            use_: None,
            alg: None,
            created,
            public_key,
        }
    }

    /// Builds an RSA key from the big-endian modulus (`n`) and public exponent (`e`).
    pub fn new_rsa(n: &[u8], e: &[u8], created: DateTime<Utc>) -> Result<Self, JwkError> {
        let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
            .map_err(|err| JwkError::InvalidKeyMaterial(err.to_string()))?;
        Ok(Self::new(PublicKey::Rsa(key), created))
    }

    /// Builds an EC key from the curve name (`P-256` or `P-384`) and affine coordinates.
    pub fn new_ec(crv: &str, x: &[u8], y: &[u8], created: DateTime<Utc>) -> Result<Self, JwkError> {
        let coordinate_len = match crv {
            "P-256" => 32,
            "P-384" => 48,
            other => return Err(JwkError::UnsupportedCurve(other.to_string())),
        };
        if x.len() != coordinate_len || y.len() != coordinate_len {
            return Err(JwkError::InvalidKeyMaterial(format!(
                "expected {} byte coordinates for curve `{}` (found {} and {})",
                coordinate_len,
                crv,
                x.len(),
                y.len()
            )));
        }

        // Uncompressed SEC1 point.
        let mut point = Vec::with_capacity(1 + 2 * coordinate_len);
        point.push(0x04);
        point.extend_from_slice(x);
        point.extend_from_slice(y);

        let public_key = if coordinate_len == 32 {
            p256::ecdsa::VerifyingKey::from_sec1_bytes(&point).map(PublicKey::P256)
        } else {
            p384::ecdsa::VerifyingKey::from_sec1_bytes(&point).map(PublicKey::P384)
        }
        .map_err(|err| JwkError::InvalidKeyMaterial(err.to_string()))?;

        Ok(Self::new(public_key, created))
    }

    /// Parses a single JWK JSON object.
    pub fn from_value(value: serde_json::Value, created: DateTime<Utc>) -> Result<Self, JwkError> {
        let raw: RawJsonWebKey = serde_json::from_value(value).map_err(JwkError::Parse)?;

        let jwk = match JsonWebKeyType::from_kty(&raw.kty) {
            JsonWebKeyType::Rsa => {
                let n = raw.n.as_ref().ok_or(JwkError::MissingParameter("n"))?;
                let e = raw.e.as_ref().ok_or(JwkError::MissingParameter("e"))?;
                Self::new_rsa(n, e, created)?
            }
            JsonWebKeyType::EllipticCurve => {
                let crv = raw.crv.as_ref().ok_or(JwkError::MissingParameter("crv"))?;
                let x = raw.x.as_ref().ok_or(JwkError::MissingParameter("x"))?;
                let y = raw.y.as_ref().ok_or(JwkError::MissingParameter("y"))?;
                Self::new_ec(crv, x, y, created)?
            }
            JsonWebKeyType::Unsupported(kty) => return Err(JwkError::UnsupportedKeyType(kty)),
        };

        Ok(jwk
            .set_key_id(raw.kid)
            .set_thumbprint(raw.x5t)
            .set_key_use(raw.use_)
            .set_algorithm(raw.alg))
    }

    /// Decodes a PEM-encoded SubjectPublicKeyInfo holding an RSA, P-256 or P-384 public key.
    pub fn from_pem(pem: &str, created: DateTime<Utc>) -> Result<Self, JwkError> {
        use rsa::pkcs8::DecodePublicKey;

        let public_key = match RsaPublicKey::from_public_key_pem(pem) {
            Ok(key) => PublicKey::Rsa(key),
            Err(rsa_err) => {
                if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
                    PublicKey::P256(key)
                } else if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_pem(pem) {
                    PublicKey::P384(key)
                } else {
                    return Err(JwkError::Pem(rsa_err.to_string()));
                }
            }
        };
        Ok(Self::new(public_key, created))
    }

    /// Sets the key ID (`kid`).
    pub fn set_key_id(mut self, kid: Option<JsonWebKeyId>) -> Self {
        self.kid = kid;
        self
    }

    /// Sets the certificate thumbprint (`x5t`).
    pub fn set_thumbprint(mut self, x5t: Option<JsonWebKeyThumbprint>) -> Self {
        self.x5t = x5t;
        self
    }

    /// Sets the intended key use (`use`).
    pub fn set_key_use(mut self, use_: Option<String>) -> Self {
        self.use_ = use_;
        self
    }

    /// Sets the intended algorithm (`alg`).
    pub fn set_algorithm(mut self, alg: Option<String>) -> Self {
        self.alg = alg;
        self
    }

    pub fn key_type(&self) -> JsonWebKeyType {
        self.public_key.key_type()
    }

    pub fn key_id(&self) -> Option<&JsonWebKeyId> {
        self.kid.as_ref()
    }

    pub fn thumbprint(&self) -> Option<&JsonWebKeyThumbprint> {
        self.x5t.as_ref()
    }

    pub fn key_use(&self) -> Option<&str> {
        self.use_.as_deref()
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Time at which this key was decoded.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}
