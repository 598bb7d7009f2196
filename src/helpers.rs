use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Accepts a JSON string, an array of strings, or `null` (e.g., the `aud` claim).
pub(crate) fn deserialize_string_or_vec_opt<'de, T, D>(
    deserializer: D,
) -> Result<Option<Vec<T>>, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    Ok(
        match Option::<OneOrMany<T>>::deserialize(deserializer)? {
            Some(OneOrMany::Many(values)) => Some(values),
            Some(OneOrMany::One(value)) => Some(vec![value]),
            None => None,
        },
    )
}

// JWK members are only meaningful relative to `kty`, so a member of an unexpected shape is
// treated as absent instead of failing the whole key.
pub(crate) fn deserialize_option_or_none<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value::<Option<T>>(value).unwrap_or(None))
}

pub(crate) fn join_vec<T>(entries: &[T]) -> String
where
    T: AsRef<str>,
{
    entries
        .iter()
        .map(|entry| format!("`{}`", entry.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Optional `NumericDate` claims (`iat`, `exp`, `nbf`).
///
/// Fractional seconds are kept when reading and dropped when writing. With the
/// `accept-rfc3339-timestamps` feature, RFC 3339 strings are accepted too.
pub(crate) mod serde_utc_seconds_opt {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum NumericDate {
        Seconds(serde_json::Number),
        #[cfg(feature = "accept-rfc3339-timestamps")]
        Rfc3339(String),
    }
    impl NumericDate {
        fn to_utc(&self) -> Option<DateTime<Utc>> {
            match self {
                NumericDate::Seconds(seconds) => match seconds.as_i64() {
                    Some(whole) => Utc.timestamp_opt(whole, 0).single(),
                    None => {
                        let seconds = seconds.as_f64()?;
                        let nanos = (seconds.fract() * 1_000_000_000.).floor() as u32;
                        Utc.timestamp_opt(seconds.trunc() as i64, nanos).single()
                    }
                },
                #[cfg(feature = "accept-rfc3339-timestamps")]
                NumericDate::Rfc3339(rfc3339) => DateTime::parse_from_rfc3339(rfc3339)
                    .ok()
                    .map(|datetime| datetime.with_timezone(&Utc)),
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NumericDate>::deserialize(deserializer)?
            .map(|date| {
                date.to_utc().ok_or_else(|| {
                    D::Error::custom(format!("`{:?}` is not a valid timestamp", date))
                })
            })
            .transpose()
    }

    pub fn serialize<S>(v: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        v.map(|datetime| datetime.timestamp()).serialize(serializer)
    }
}

pub(crate) fn base64_url_decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL_SAFE_NO_PAD.decode(encoded)
}

new_type![
    /// Bytes decoded from an unpadded base64url JSON string.
    pub(crate) Base64UrlEncodedBytes(Vec<u8>)
];
impl<'de> Deserialize<'de> for Base64UrlEncodedBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        base64_url_decode(&encoded)
            .map(Self::new)
            .map_err(|err| D::Error::custom(format!("invalid base64url `{}`: {}", encoded, err)))
    }
}

/// Converts a configured duration to a signed one, saturating at the largest representable value.
pub(crate) fn signed_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}

/// Truncates a response body for inclusion in error messages.
pub(crate) fn truncate_body(body: &[u8], max_chars: usize) -> String {
    let body = String::from_utf8_lossy(body);
    if body.chars().count() <= max_chars {
        body.into_owned()
    } else {
        format!("{}...", body.chars().take(max_chars).collect::<String>())
    }
}
