#![allow(clippy::unreadable_literal, clippy::type_complexity)]
#![cfg_attr(test, allow(clippy::cognitive_complexity))]

//!
//! Consumer-side validation of [OpenID Connect](https://openid.net/connect/) ID tokens and other
//! signed JSON Web Tokens.
//!
//! The crate is split along the three steps of accepting a token:
//!
//!  * [`cache::JwkCache`] holds the decoded signing keys of one issuer configuration and evicts
//!    keys older than a staleness window.
//!  * [`resolver::JwkResolver`] looks keys up in the cache, fetching the issuer's JSON Web Key
//!    Set (or reading a local key file) on a miss.
//!  * [`verification::ClaimsValidator`] checks the issuer, audience, timing and algorithm
//!    policies and then delegates signature verification to a
//!    [`verification::SignatureEngine`].
//!
//! [`consumer::TokenConsumer`] ties the resolver and the validator together.
//!
//! # Example
//!
//! ```rust,no_run
//! use oidc_consumer::cache::JwkCache;
//! use oidc_consumer::claims::decode_compact;
//! use oidc_consumer::consumer::TokenConsumer;
//! use oidc_consumer::resolver::JwkResolver;
//! use oidc_consumer::verification::{ClaimsValidator, TokenType, ValidationContext};
//! use oidc_consumer::{ClientId, JsonWebKeySetUrl, ReqwestHttpClientFactory};
//!
//! use std::sync::Arc;
//!
//! # fn err_wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = JwkResolver::new(Arc::new(JwkCache::new()), ReqwestHttpClientFactory::new())
//!     .set_jwks_uri(Some(JsonWebKeySetUrl::parse(
//!         "https://accounts.example.com/.well-known/jwks.json",
//!     )?));
//! let validator = ClaimsValidator::new(ValidationContext::new(
//!     ClientId::new("client_id".to_string()),
//!     TokenType::IdToken,
//!     "https://accounts.example.com".to_string(),
//! ));
//! let consumer = TokenConsumer::new(validator, resolver);
//!
//! let compact = "eyJhbGciOiJSUzI1NiJ9.e30.c2lnbmF0dXJl";
//! let (claims, signature) = decode_compact(compact)?;
//! let verified = consumer.consume(compact, claims, &signature)?;
//! println!("subject: {:?}", verified.claims().subject());
//! # Ok(())
//! # }
//! ```
//!

// Defined first since other modules need the macros, and definition order is significant for
// macros.
#[macro_use]
mod macros;

pub mod cache;
pub mod claims;
pub mod consumer;
pub mod core;
pub mod resolver;
pub mod verification;

mod helpers;
mod http_utils;
#[cfg(all(
    feature = "reqwest-blocking",
    any(feature = "rustls-tls", feature = "native-tls")
))]
mod reqwest;
mod types;

pub use oauth2::{ClientId, ClientSecret, HttpRequest, HttpResponse, SyncHttpClient};

#[cfg(all(
    feature = "reqwest-blocking",
    any(feature = "rustls-tls", feature = "native-tls")
))]
pub use crate::reqwest::ReqwestHttpClientFactory;
pub use crate::types::jwk::{
    JsonWebKeyId, JsonWebKeyThumbprint, JsonWebKeyType, Jwk, JwkError, PublicKey,
};
pub use crate::types::jwks::JsonWebKeySet;
pub use crate::types::{Audience, JsonWebKeySetUrl, SubjectIdentifier};
