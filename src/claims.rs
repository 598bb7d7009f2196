use crate::helpers::{base64_url_decode, deserialize_string_or_vec_opt, serde_utc_seconds_opt};
use crate::types::jwk::{JsonWebKeyId, JsonWebKeyThumbprint};
use crate::{Audience, ClientId, SubjectIdentifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by an ID token or JWT, before any verification has taken place.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct JwtClaims {
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    issuer: Option<String>,
    #[serde(
        rename = "aud",
        default,
        deserialize_with = "deserialize_string_or_vec_opt",
        skip_serializing_if = "Option::is_none"
    )]
    audiences: Option<Vec<Audience>>,
    #[serde(
        rename = "iat",
        default,
        with = "serde_utc_seconds_opt",
        skip_serializing_if = "Option::is_none"
    )]
    issue_time: Option<DateTime<Utc>>,
    #[serde(
        rename = "exp",
        default,
        with = "serde_utc_seconds_opt",
        skip_serializing_if = "Option::is_none"
    )]
    expiration: Option<DateTime<Utc>>,
    #[serde(
        rename = "nbf",
        default,
        with = "serde_utc_seconds_opt",
        skip_serializing_if = "Option::is_none"
    )]
    not_before: Option<DateTime<Utc>>,
    #[serde(rename = "azp", default, skip_serializing_if = "Option::is_none")]
    authorized_party: Option<ClientId>,
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    subject: Option<SubjectIdentifier>,

    #[serde(flatten)]
    additional_claims: serde_json::Map<String, serde_json::Value>,
}
impl JwtClaims {
    /// Returns an empty claims set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issuer (`iss`) claim.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }
    pub fn set_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Audience (`aud`) claim. On the wire this is either a single string or an array.
    pub fn audiences(&self) -> Option<&Vec<Audience>> {
        self.audiences.as_ref()
    }
    pub fn set_audiences(mut self, audiences: Option<Vec<Audience>>) -> Self {
        self.audiences = audiences;
        self
    }

    /// Issue time (`iat`) claim.
    pub fn issue_time(&self) -> Option<DateTime<Utc>> {
        self.issue_time
    }
    pub fn set_issue_time(mut self, issue_time: Option<DateTime<Utc>>) -> Self {
        self.issue_time = issue_time;
        self
    }

    /// Expiration time (`exp`) claim.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }
    pub fn set_expiration(mut self, expiration: Option<DateTime<Utc>>) -> Self {
        self.expiration = expiration;
        self
    }

    /// Not-before (`nbf`) claim.
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }
    pub fn set_not_before(mut self, not_before: Option<DateTime<Utc>>) -> Self {
        self.not_before = not_before;
        self
    }

    /// Authorized party (`azp`) claim.
    pub fn authorized_party(&self) -> Option<&ClientId> {
        self.authorized_party.as_ref()
    }
    pub fn set_authorized_party(mut self, authorized_party: Option<ClientId>) -> Self {
        self.authorized_party = authorized_party;
        self
    }

    /// Subject (`sub`) claim.
    pub fn subject(&self) -> Option<&SubjectIdentifier> {
        self.subject.as_ref()
    }
    pub fn set_subject(mut self, subject: Option<SubjectIdentifier>) -> Self {
        self.subject = subject;
        self
    }

    /// Claims not modelled above, keyed by claim name.
    pub fn additional_claims(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.additional_claims
    }
    pub fn add_additional_claim(mut self, name: &str, value: serde_json::Value) -> Self {
        self.additional_claims.insert(name.to_string(), value);
        self
    }
}

/// JOSE header of a signed JWT.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct JoseHeader {
    /// Signature algorithm name (e.g., `RS256`), exactly as sent.
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<JsonWebKeyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<JsonWebKeyThumbprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}
impl JoseHeader {
    pub fn new(alg: &str) -> Self {
        Self {
            alg: alg.to_string(),
            kid: None,
            x5t: None,
            typ: None,
        }
    }

    pub fn set_key_id(mut self, kid: Option<JsonWebKeyId>) -> Self {
        self.kid = kid;
        self
    }

    pub fn set_thumbprint(mut self, x5t: Option<JsonWebKeyThumbprint>) -> Self {
        self.x5t = x5t;
        self
    }
}

/// JOSE header together with the raw signature bytes of a compact JWS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwsSignature {
    pub header: JoseHeader,
    pub signature: Vec<u8>,
}

/// Error splitting a compact-serialized JWS into its parts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwtParseError {
    /// The token does not have three dot-separated segments.
    #[error("expected 3 dot-separated segments (found {0})")]
    Format(usize),
    /// A segment is not valid unpadded base64url.
    #[error("invalid base64url in {segment} segment")]
    Base64 {
        segment: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    /// The header or payload is not the expected JSON.
    #[error("invalid JSON in {segment} segment")]
    Json {
        segment: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Splits a compact JWS (`header.payload.signature`) into unverified claims and signature
/// metadata.
///
/// The signature is NOT verified and no claims are checked; pass the result to
/// [`ClaimsValidator::validate`](crate::verification::ClaimsValidator::validate) or
/// [`TokenConsumer::consume`](crate::consumer::TokenConsumer::consume). Callers with their own
/// JOSE parser can build [`JwtClaims`] and [`JwsSignature`] directly instead.
pub fn decode_compact(compact: &str) -> Result<(JwtClaims, JwsSignature), JwtParseError> {
    let segments = compact.split('.').collect::<Vec<_>>();
    if segments.len() != 3 {
        return Err(JwtParseError::Format(segments.len()));
    }

    let decode = |segment: &'static str, encoded: &str| {
        base64_url_decode(encoded).map_err(|source| JwtParseError::Base64 { segment, source })
    };

    let header: JoseHeader = serde_json::from_slice(&decode("header", segments[0])?)
        .map_err(|source| JwtParseError::Json {
            segment: "header",
            source,
        })?;
    let claims: JwtClaims = serde_json::from_slice(&decode("payload", segments[1])?)
        .map_err(|source| JwtParseError::Json {
            segment: "payload",
            source,
        })?;
    let signature = decode("signature", segments[2])?;

    Ok((claims, JwsSignature { header, signature }))
}
