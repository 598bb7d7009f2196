use crate::core::CoreJwsSigningAlgorithm;
use crate::types::jwk::{JsonWebKeyType, Jwk};

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct RawJsonWebKeySet {
    keys: Vec<serde_json::Value>,
}

/// Decoded JSON Web Key Set, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonWebKeySet {
    keys: Vec<Jwk>,
}
impl JsonWebKeySet {
    /// Create a new JSON Web Key Set.
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Parses a JWKS document (`{"keys": [...]}`).
    ///
    /// The document itself must be a JSON object with a `keys` array. Within that array, elements
    /// without a `kty` or with a key type other than `RSA` or `EC` are skipped, as are `EC` keys
    /// unless `signature_alg` is an ECDSA algorithm. Elements whose key material cannot be
    /// decoded are skipped with a warning.
    pub fn parse(
        body: &[u8],
        signature_alg: &CoreJwsSigningAlgorithm,
        created: DateTime<Utc>,
    ) -> Result<Self, serde_path_to_error::Error<serde_json::Error>> {
        let deserializer = &mut serde_json::Deserializer::from_slice(body);
        let raw: RawJsonWebKeySet = serde_path_to_error::deserialize(deserializer)?;

        let keys = raw
            .keys
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| {
                let kty = match value.get("kty").and_then(serde_json::Value::as_str) {
                    Some(kty) => JsonWebKeyType::from_kty(kty),
                    None => {
                        log::debug!("skipping JWK at index {} without `kty`", index);
                        return None;
                    }
                };
                match kty {
                    JsonWebKeyType::Rsa => {}
                    JsonWebKeyType::EllipticCurve if signature_alg.is_ecdsa() => {}
                    other => {
                        log::debug!(
                            "skipping JWK at index {} with key type `{}` (signature algorithm `{}`)",
                            index,
                            other.as_str(),
                            signature_alg.as_str()
                        );
                        return None;
                    }
                }

                Jwk::from_value(value, created)
                    .map_err(|err| log::warn!("ignoring invalid JWK at index {}: {}", index, err))
                    .ok()
            })
            .collect();

        Ok(Self { keys })
    }

    /// Return the keys in this set.
    pub fn keys(&self) -> &Vec<Jwk> {
        &self.keys
    }

    pub(crate) fn into_keys(self) -> Vec<Jwk> {
        self.keys
    }
}
