use crate::core::CoreJwsSigningAlgorithm;
use crate::verification::SignatureVerificationError;

use hmac::Mac;
use rsa::traits::SignatureScheme;
use rsa::RsaPublicKey;
use sha2::Digest;

fn verify_rsa<S>(
    key: &RsaPublicKey,
    scheme: S,
    hashed: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError>
where
    S: SignatureScheme,
{
    key.verify(scheme, hashed, signature)
        .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
}

pub fn verify_rsa_signature(
    key: &RsaPublicKey,
    signature_alg: &CoreJwsSigningAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    use rsa::{Pkcs1v15Sign, Pss};
    use sha2::{Sha256, Sha384, Sha512};

    match *signature_alg {
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256 => verify_rsa(
            key,
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(message),
            signature,
        ),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384 => verify_rsa(
            key,
            Pkcs1v15Sign::new::<Sha384>(),
            &Sha384::digest(message),
            signature,
        ),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512 => verify_rsa(
            key,
            Pkcs1v15Sign::new::<Sha512>(),
            &Sha512::digest(message),
            signature,
        ),
        CoreJwsSigningAlgorithm::RsaSsaPssSha256 => verify_rsa(
            key,
            Pss::new::<Sha256>(),
            &Sha256::digest(message),
            signature,
        ),
        CoreJwsSigningAlgorithm::RsaSsaPssSha384 => verify_rsa(
            key,
            Pss::new::<Sha384>(),
            &Sha384::digest(message),
            signature,
        ),
        CoreJwsSigningAlgorithm::RsaSsaPssSha512 => verify_rsa(
            key,
            Pss::new::<Sha512>(),
            &Sha512::digest(message),
            signature,
        ),
        ref other => Err(SignatureVerificationError::CryptoError(format!(
            "`{}` is not an RSA algorithm",
            other.as_str()
        ))),
    }
}

pub fn verify_p256_signature(
    key: &p256::ecdsa::VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    use p256::ecdsa::signature::Verifier;

    let signature = p256::ecdsa::Signature::from_slice(signature).map_err(|_| {
        SignatureVerificationError::CryptoError("malformed ES256 signature".to_string())
    })?;
    key.verify(message, &signature)
        .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
}

pub fn verify_p384_signature(
    key: &p384::ecdsa::VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    use p384::ecdsa::signature::Verifier;

    let signature = p384::ecdsa::Signature::from_slice(signature).map_err(|_| {
        SignatureVerificationError::CryptoError("malformed ES384 signature".to_string())
    })?;
    key.verify(message, &signature)
        .map_err(|_| SignatureVerificationError::CryptoError("bad signature".to_string()))
}

macro_rules! verify_hmac {
    ($digest:ty, $secret:expr, $message:expr, $signature:expr) => {{
        let mut mac = hmac::Hmac::<$digest>::new_from_slice($secret).map_err(|e| {
            SignatureVerificationError::CryptoError(format!("Could not create key: {}", e))
        })?;
        mac.update($message);
        mac.verify_slice($signature)
            .map_err(|_| SignatureVerificationError::CryptoError("bad HMAC".to_string()))
    }};
}

pub fn verify_hmac_signature(
    secret: &[u8],
    signature_alg: &CoreJwsSigningAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureVerificationError> {
    match *signature_alg {
        CoreJwsSigningAlgorithm::HmacSha256 => {
            verify_hmac!(sha2::Sha256, secret, message, signature)
        }
        CoreJwsSigningAlgorithm::HmacSha384 => {
            verify_hmac!(sha2::Sha384, secret, message, signature)
        }
        CoreJwsSigningAlgorithm::HmacSha512 => {
            verify_hmac!(sha2::Sha512, secret, message, signature)
        }
        ref other => Err(SignatureVerificationError::CryptoError(format!(
            "`{}` is not an HMAC algorithm",
            other.as_str()
        ))),
    }
}
