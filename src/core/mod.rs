use crate::helpers::join_vec;
use crate::types::jwk::{JsonWebKeyType, PublicKey};
use crate::verification::{
    ClaimsVerificationError, KeyMaterialError, SignatureCheck, SignatureEngine,
    SignatureVerificationError, VerificationKey,
};

use serde::{Deserialize, Serialize};

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

mod crypto;


/// Signature algorithm used to sign a JSON Web Token (see
/// [RFC 7518](https://tools.ietf.org/html/rfc7518#section-3.1)).
#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub enum CoreJwsSigningAlgorithm {
    /// HMAC using SHA-256.
    #[serde(rename = "HS256")]
    HmacSha256,
    /// HMAC using SHA-384.
    #[serde(rename = "HS384")]
    HmacSha384,
    /// HMAC using SHA-512.
    #[serde(rename = "HS512")]
    HmacSha512,
    /// RSA SSA PKCS#1 v1.5 using SHA-256.
    #[serde(rename = "RS256")]
    RsaSsaPkcs1V15Sha256,
    /// RSA SSA PKCS#1 v1.5 using SHA-384.
    #[serde(rename = "RS384")]
    RsaSsaPkcs1V15Sha384,
    /// RSA SSA PKCS#1 v1.5 using SHA-512.
    #[serde(rename = "RS512")]
    RsaSsaPkcs1V15Sha512,
    /// ECDSA using P-256 and SHA-256.
    #[serde(rename = "ES256")]
    EcdsaP256Sha256,
    /// ECDSA using P-384 and SHA-384.
    #[serde(rename = "ES384")]
    EcdsaP384Sha384,
    /// RSA SSA-PSS using SHA-256 and MGF1 with SHA-256.
    #[serde(rename = "PS256")]
    RsaSsaPssSha256,
    /// RSA SSA-PSS using SHA-384 and MGF1 with SHA-384.
    #[serde(rename = "PS384")]
    RsaSsaPssSha384,
    /// RSA SSA-PSS using SHA-512 and MGF1 with SHA-512.
    #[serde(rename = "PS512")]
    RsaSsaPssSha512,
    ///
    /// No digital signature or MAC performed.
    ///
    /// # Security Warning
    ///
    /// This algorithm provides no security over the integrity of the JSON Web Token. Configuring
    /// it disables signature verification altogether. See
    /// [Critical vulnerabilities in JSON Web Token libraries](
    ///     https://auth0.com/blog/critical-vulnerabilities-in-json-web-token-libraries/) for
    /// further discussion.
    ///
    #[serde(rename = "none")]
    None,
}
impl CoreJwsSigningAlgorithm {
    /// Algorithm name as it appears in the JOSE `alg` header.
    pub fn as_str(&self) -> &'static str {
        match *self {
            CoreJwsSigningAlgorithm::HmacSha256 => "HS256",
            CoreJwsSigningAlgorithm::HmacSha384 => "HS384",
            CoreJwsSigningAlgorithm::HmacSha512 => "HS512",
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256 => "RS256",
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384 => "RS384",
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512 => "RS512",
            CoreJwsSigningAlgorithm::EcdsaP256Sha256 => "ES256",
            CoreJwsSigningAlgorithm::EcdsaP384Sha384 => "ES384",
            CoreJwsSigningAlgorithm::RsaSsaPssSha256 => "PS256",
            CoreJwsSigningAlgorithm::RsaSsaPssSha384 => "PS384",
            CoreJwsSigningAlgorithm::RsaSsaPssSha512 => "PS512",
            CoreJwsSigningAlgorithm::None => "none",
        }
    }

    /// Key type required by this algorithm, or `None` for algorithms that do not use a JWK.
    pub fn key_type(&self) -> Option<JsonWebKeyType> {
        match *self {
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256
            | CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384
            | CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512
            | CoreJwsSigningAlgorithm::RsaSsaPssSha256
            | CoreJwsSigningAlgorithm::RsaSsaPssSha384
            | CoreJwsSigningAlgorithm::RsaSsaPssSha512 => Some(JsonWebKeyType::Rsa),
            CoreJwsSigningAlgorithm::EcdsaP256Sha256 | CoreJwsSigningAlgorithm::EcdsaP384Sha384 => {
                Some(JsonWebKeyType::EllipticCurve)
            }
            CoreJwsSigningAlgorithm::HmacSha256
            | CoreJwsSigningAlgorithm::HmacSha384
            | CoreJwsSigningAlgorithm::HmacSha512
            | CoreJwsSigningAlgorithm::None => None,
        }
    }

    /// Whether this is one of the `ES*` algorithms.
    pub fn is_ecdsa(&self) -> bool {
        self.key_type() == Some(JsonWebKeyType::EllipticCurve)
    }

    /// Whether this is one of the `HS*` algorithms, keyed by the client secret.
    pub fn uses_shared_secret(&self) -> bool {
        matches!(
            *self,
            CoreJwsSigningAlgorithm::HmacSha256
                | CoreJwsSigningAlgorithm::HmacSha384
                | CoreJwsSigningAlgorithm::HmacSha512
        )
    }
}
impl FromStr for CoreJwsSigningAlgorithm {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_plain::from_str(s)
    }
}
impl Display for CoreJwsSigningAlgorithm {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        f.write_str(self.as_str())
    }
}

/// Checks whether a key can be used with a given signing algorithm.
pub(crate) fn check_key_compatibility(
    key: &VerificationKey,
    signing_algorithm: &CoreJwsSigningAlgorithm,
) -> Result<(), KeyMaterialError> {
    let jwk = match (key, signing_algorithm.uses_shared_secret()) {
        (VerificationKey::SharedSecret(_), true) => return Ok(()),
        (VerificationKey::SharedSecret(_), false) => {
            return Err(KeyMaterialError::Incompatible(format!(
                "shared secret cannot verify `{}` signatures",
                signing_algorithm
            )))
        }
        (VerificationKey::Jwk(_), true) => {
            return Err(KeyMaterialError::Incompatible(format!(
                "`{}` requires the client secret",
                signing_algorithm
            )))
        }
        (VerificationKey::Jwk(jwk), false) => jwk,
    };

    // if this key isn't suitable for signing
    if let Some(use_) = jwk.key_use() {
        if use_ != "sig" {
            return Err(KeyMaterialError::Incompatible(
                "key usage not permitted for digital signatures".to_string(),
            ));
        }
    }

    // if no specific algorithm is mandated, any will do
    if let Some(alg) = jwk.algorithm() {
        if alg != signing_algorithm.as_str() {
            return Err(KeyMaterialError::Incompatible(format!(
                "key is restricted to `{}` (found `{}`)",
                alg, signing_algorithm
            )));
        }
    }

    let curve_matches = match (jwk.public_key(), signing_algorithm) {
        (PublicKey::Rsa(_), alg) => alg.key_type() == Some(JsonWebKeyType::Rsa),
        (PublicKey::P256(_), CoreJwsSigningAlgorithm::EcdsaP256Sha256) => true,
        (PublicKey::P384(_), CoreJwsSigningAlgorithm::EcdsaP384Sha384) => true,
        (PublicKey::P256(_), _) | (PublicKey::P384(_), _) => false,
    };
    if !curve_matches {
        return Err(KeyMaterialError::Incompatible(format!(
            "`{}` key does not match signature algorithm `{}`",
            jwk.key_type().as_str(),
            signing_algorithm
        )));
    }

    Ok(())
}

/// Default [`SignatureEngine`], verifying RSA, ECDSA and HMAC signatures.
///
/// Besides the signature itself, the engine requires a subject when asked to, checks that the
/// expected audience is listed, and re-validates `exp` and `nbf` against the clock skew.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoreSignatureEngine;
impl CoreSignatureEngine {
    fn verify_crypto(&self, check: &SignatureCheck<'_>) -> Result<(), Box<dyn Error + Send + Sync>> {
        let key = check.key.as_ref().ok_or(KeyMaterialError::Missing)?;
        check_key_compatibility(key, check.signature_alg)?;

        // The signing input is everything before the final `.`.
        let (message, _) = check.compact.rsplit_once('.').ok_or_else(|| {
            ClaimsVerificationError::SignatureVerification(SignatureVerificationError::CryptoError(
                "token is not in compact serialization".to_string(),
            ))
        })?;
        let message = message.as_bytes();
        let signature = &check.signature.signature;

        let verified = match *key {
            VerificationKey::SharedSecret(secret) => {
                crypto::verify_hmac_signature(secret, check.signature_alg, message, signature)
            }
            VerificationKey::Jwk(jwk) => match jwk.public_key() {
                PublicKey::Rsa(public_key) => crypto::verify_rsa_signature(
                    public_key,
                    check.signature_alg,
                    message,
                    signature,
                ),
                PublicKey::P256(public_key) => {
                    crypto::verify_p256_signature(public_key, message, signature)
                }
                PublicKey::P384(public_key) => {
                    crypto::verify_p384_signature(public_key, message, signature)
                }
            },
        };
        verified.map_err(|err| ClaimsVerificationError::SignatureVerification(err).into())
    }
}
impl SignatureEngine for CoreSignatureEngine {
    fn verify(&self, check: &SignatureCheck<'_>) -> Result<(), Box<dyn Error + Send + Sync>> {
        if *check.signature_alg != CoreJwsSigningAlgorithm::None {
            self.verify_crypto(check)?;
        } else {
            log::debug!("skipping signature verification for algorithm `none`");
        }

        if check.require_subject
            && check
                .claims
                .subject()
                .map_or(true, |subject| subject.is_empty())
        {
            return Err(
                ClaimsVerificationError::InvalidSubject("missing subject claim".to_string()).into(),
            );
        }

        if let Some(expected) = check.expected_audience {
            let audiences = check.claims.audiences();
            if !audiences.map_or(false, |audiences| audiences.contains(expected)) {
                return Err(ClaimsVerificationError::InvalidAudience(format!(
                    "must contain `{}` (found audiences: {})",
                    **expected,
                    audiences
                        .map(|audiences| join_vec(audiences))
                        .unwrap_or_default()
                ))
                .into());
            }
        }

        if let Some(expiration) = check.claims.expiration() {
            if expiration
                .checked_add_signed(check.clock_skew)
                .map_or(false, |latest| check.now > latest)
            {
                return Err(ClaimsVerificationError::Expired(format!(
                    "expiration ({:?}) is not later than current time ({:?})",
                    expiration, check.now
                ))
                .into());
            }
        }

        if let Some(not_before) = check.claims.not_before() {
            if check
                .now
                .checked_add_signed(check.clock_skew)
                .map_or(false, |latest| not_before > latest)
            {
                return Err(ClaimsVerificationError::NotYetValid(format!(
                    "not before ({:?}) is later than current time ({:?})",
                    not_before, check.now
                ))
                .into());
            }
        }

        Ok(())
    }
}
