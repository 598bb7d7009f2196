use crate::claims::{JwsSignature, JwtClaims};
use crate::core::{CoreJwsSigningAlgorithm, CoreSignatureEngine};
use crate::resolver::{HttpClientFactory, JwkResolver, JwkRetrievalError};
use crate::verification::{
    ClaimsValidator, ClaimsVerificationError, SignatureEngine, VerifiedClaims,
};
use crate::SyncHttpClient;

use thiserror::Error;

use std::fmt::{Debug, Formatter};

/// Error consuming a token.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenConsumerError<RE>
where
    RE: std::error::Error + 'static,
{
    /// The signing key could not be retrieved.
    #[error("Failed to retrieve signing key")]
    KeyRetrieval(#[from] JwkRetrievalError<RE>),
    /// The token failed validation.
    #[error("Token validation failed")]
    Verification(#[from] ClaimsVerificationError),
}

/// Validates tokens for one issuer configuration, resolving signing keys as needed.
///
/// Claims are checked before any key is looked up, so that tokens from untrusted issuers never
/// trigger a JWKS fetch.
pub struct TokenConsumer<F, E = CoreSignatureEngine> {
    validator: ClaimsValidator<E>,
    resolver: JwkResolver<F>,
}
impl<F, E> TokenConsumer<F, E>
where
    F: HttpClientFactory,
    E: SignatureEngine,
{
    pub fn new(validator: ClaimsValidator<E>, resolver: JwkResolver<F>) -> Self {
        Self {
            validator,
            resolver,
        }
    }

    pub fn validator(&self) -> &ClaimsValidator<E> {
        &self.validator
    }

    pub fn resolver(&self) -> &JwkResolver<F> {
        &self.resolver
    }

    /// Validates a parsed token, returning its claims and effective audience.
    ///
    /// `compact` must be the token exactly as received, since the signature covers its first two
    /// segments.
    pub fn consume(
        &self,
        compact: &str,
        claims: JwtClaims,
        signature: &JwsSignature,
    ) -> Result<VerifiedClaims, TokenConsumerError<<F::Client as SyncHttpClient>::Error>> {
        let audience = self.validator.verify_claims(&claims, signature)?;

        let signature_alg = self.validator.context().signature_alg();
        let key = if *signature_alg == CoreJwsSigningAlgorithm::None
            || signature_alg.uses_shared_secret()
        {
            None
        } else {
            let header = &signature.header;
            match header.x5t {
                Some(ref x5t) => self.resolver.resolve_public_key(None, Some(x5t))?,
                None => self.resolver.resolve_public_key(header.kid.as_ref(), None)?,
            }
        };

        self.validator.verify_signature(
            compact,
            &claims,
            signature,
            key.as_deref(),
            audience.as_ref(),
        )?;

        log::debug!(
            "accepted token for client `{}`",
            **self.validator.context().client_id()
        );
        Ok(VerifiedClaims::new(claims, audience))
    }
}
impl<F, E> Debug for TokenConsumer<F, E>
where
    E: SignatureEngine,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConsumer")
            .field("client_id", self.validator.context().client_id())
            .field("resolver", &self.resolver)
            .finish()
    }
}
