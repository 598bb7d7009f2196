use crate::claims::{JwsSignature, JwtClaims};
use crate::core::{CoreJwsSigningAlgorithm, CoreSignatureEngine};
use crate::helpers::{join_vec, signed_duration};
use crate::types::jwk::Jwk;
use crate::{Audience, ClientId, ClientSecret};

use chrono::{DateTime, Utc};
use thiserror::Error;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Configured audience value that disables audience restrictions for JWTs.
pub const ALL_AUDIENCES: &str = "ALL_AUDIENCES";

/// Default tolerance applied to every time-based check.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(180);

/// Error verifying claims.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClaimsVerificationError {
    /// Claims have expired, or were issued in the future.
    #[error("Expired: {0}")]
    Expired(String),
    /// Audience claim is invalid.
    #[error("Invalid audiences: {0}")]
    InvalidAudience(String),
    /// Authorized party (`azp`) claim is invalid.
    #[error("Invalid authorized party: {0}")]
    InvalidAuthorizedParty(String),
    /// Issuer claim is invalid.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),
    /// Subject claim is invalid.
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
    /// ID token lacks the mandatory issue time (`iat`) claim.
    #[error("Missing issue time")]
    MissingIssueTime,
    /// Claims are not valid yet (`nbf` is in the future).
    #[error("Not yet valid: {0}")]
    NotYetValid(String),
    /// Failed to verify the claims signature.
    #[error("Signature verification failed")]
    SignatureVerification(#[source] SignatureVerificationError),
}

/// Error verifying claims signature.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureVerificationError {
    /// Invalid signature for the supplied claims and signing key.
    #[error("Crypto error: {0}")]
    CryptoError(String),
    /// The supplied signature algorithm is disallowed by the verifier.
    #[error("Disallowed signature algorithm: {0}")]
    DisallowedAlg(String),
    /// No usable key was available to verify the signature. Either the key could not be
    /// resolved, or the resolved key does not fit the signature algorithm.
    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),
    /// No signature present but claims must be signed.
    #[error("No signature found")]
    NoSignature,
}

/// Failure reported by a [`SignatureEngine`] when it has no key it can use.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyMaterialError {
    /// No key was supplied.
    #[error("no key available to verify the signature")]
    Missing,
    /// The supplied key does not fit the signature algorithm.
    #[error("key cannot be used: {0}")]
    Incompatible(String),
}

/// Kind of token being validated, which selects the issuer/audience policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenType {
    /// OpenID Connect ID token.
    IdToken,
    /// Any other JWT, such as a propagation token.
    Jwt,
}

/// Which issuers are trusted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssuerPolicy {
    /// Issuer checking is disabled. JWTs must then carry no issuer, and ID tokens are never
    /// trusted.
    Disabled,
    /// One issuer, or several delimited by spaces (or, for JWTs, commas).
    Trusted(String),
}

/// Which audiences are trusted for JWTs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudiencePolicy {
    /// Any audience is accepted.
    AcceptAll,
    /// No list is configured; audiences must prefix one of the registered service URLs.
    Unconfigured,
    /// Only the listed audiences are accepted.
    AllowList(Vec<Audience>),
}
impl AudiencePolicy {
    /// Builds a policy from configured audience strings. An empty list means
    /// [`AudiencePolicy::Unconfigured`], and a list containing [`ALL_AUDIENCES`] means
    /// [`AudiencePolicy::AcceptAll`].
    pub fn from_configured<I, S>(audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let audiences = audiences
            .into_iter()
            .map(Into::into)
            .filter(|aud| !aud.is_empty())
            .collect::<Vec<String>>();
        if audiences.is_empty() {
            AudiencePolicy::Unconfigured
        } else if audiences.iter().any(|aud| aud == ALL_AUDIENCES) {
            AudiencePolicy::AcceptAll
        } else {
            AudiencePolicy::AllowList(audiences.into_iter().map(Audience::new).collect())
        }
    }
}

/// Per-configuration validation settings.
#[derive(Clone, Debug)]
pub struct ValidationContext {
    client_id: ClientId,
    token_type: TokenType,
    issuer: IssuerPolicy,
    audiences: AudiencePolicy,
    service_urls: Vec<String>,
    clock_skew: Duration,
    signature_alg: CoreJwsSigningAlgorithm,
    client_secret: Option<ClientSecret>,
}
impl ValidationContext {
    /// Creates a context trusting `issuer`, with the `RS256` algorithm, no audience list and a
    /// three minute clock skew.
    pub fn new(client_id: ClientId, token_type: TokenType, issuer: String) -> Self {
        Self {
            client_id,
            token_type,
            issuer: IssuerPolicy::Trusted(issuer),
            audiences: AudiencePolicy::Unconfigured,
            service_urls: Vec::new(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            signature_alg: CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
            client_secret: None,
        }
    }

    /// Disables issuer checking.
    ///
    /// # Security Warning
    ///
    /// JWTs are then only accepted if they carry no issuer at all, and ID tokens are always
    /// rejected.
    pub fn insecure_disable_issuer_check(mut self) -> Self {
        self.issuer = IssuerPolicy::Disabled;
        self
    }

    pub fn set_audiences(mut self, audiences: AudiencePolicy) -> Self {
        self.audiences = audiences;
        self
    }

    /// Registers the service URLs used to match JWT audiences when no audience list is
    /// configured.
    pub fn set_service_urls(mut self, service_urls: Vec<String>) -> Self {
        self.service_urls = service_urls;
        self
    }

    pub fn set_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Sets the only signature algorithm accepted. [`CoreJwsSigningAlgorithm::None`] turns off
    /// signature enforcement entirely.
    pub fn set_signature_alg(mut self, signature_alg: CoreJwsSigningAlgorithm) -> Self {
        if signature_alg == CoreJwsSigningAlgorithm::None {
            log::warn!(
                "signature algorithm `none` configured for client `{}`; token signatures will not \
                 be verified",
                *self.client_id
            );
        }
        self.signature_alg = signature_alg;
        self
    }

    /// Sets the client secret, used as the key for `HS*` algorithms.
    pub fn set_client_secret(mut self, client_secret: ClientSecret) -> Self {
        self.client_secret = Some(client_secret);
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn issuer(&self) -> &IssuerPolicy {
        &self.issuer
    }

    pub fn audiences(&self) -> &AudiencePolicy {
        &self.audiences
    }

    pub fn service_urls(&self) -> &[String] {
        &self.service_urls
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    pub fn signature_alg(&self) -> &CoreJwsSigningAlgorithm {
        &self.signature_alg
    }

    fn issuer_trusted(&self, issuer: &str) -> bool {
        let IssuerPolicy::Trusted(ref trusted) = self.issuer else {
            return false;
        };
        match self.token_type {
            TokenType::Jwt => {
                trusted == issuer
                    || trusted
                        .split(&[' ', ','][..])
                        .filter(|token| !token.is_empty())
                        .any(|token| token == issuer)
            }
            TokenType::IdToken => trusted
                .split(' ')
                .filter(|token| !token.is_empty())
                .any(|token| token == issuer),
        }
    }
}

/// Key handed to a [`SignatureEngine`].
#[derive(Clone, Copy, Debug)]
pub enum VerificationKey<'a> {
    /// Public key resolved from a JWK set or key file.
    Jwk(&'a Jwk),
    /// Shared secret for `HS*` algorithms.
    SharedSecret(&'a [u8]),
}

/// Everything a [`SignatureEngine`] needs to verify one token.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct SignatureCheck<'a> {
    /// The compact-serialized token exactly as received.
    pub compact: &'a str,
    pub signature_alg: &'a CoreJwsSigningAlgorithm,
    pub key: Option<VerificationKey<'a>>,
    pub claims: &'a JwtClaims,
    pub signature: &'a JwsSignature,
    /// Whether a non-empty `sub` claim is required.
    pub require_subject: bool,
    /// Audience the token must list, if any was selected by the policy checks.
    pub expected_audience: Option<&'a Audience>,
    pub now: DateTime<Utc>,
    pub clock_skew: chrono::Duration,
}

/// Performs the cryptographic part of token validation.
///
/// Errors are classified by their source chain: a [`KeyMaterialError`] anywhere in the chain
/// is reported as [`SignatureVerificationError::MissingKeyMaterial`], a
/// [`ClaimsVerificationError`] is reported as is, and anything else is reported as
/// [`SignatureVerificationError::CryptoError`].
pub trait SignatureEngine {
    fn verify(&self, check: &SignatureCheck<'_>) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Claims that passed validation, with the audience selected for them.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedClaims {
    claims: JwtClaims,
    audience: Option<Audience>,
}
impl VerifiedClaims {
    pub(crate) fn new(claims: JwtClaims, audience: Option<Audience>) -> Self {
        Self { claims, audience }
    }

    pub fn claims(&self) -> &JwtClaims {
        &self.claims
    }

    /// Effective audience, if the token named one.
    pub fn audience(&self) -> Option<&Audience> {
        self.audience.as_ref()
    }

    pub fn into_claims(self) -> JwtClaims {
        self.claims
    }
}

/// Ordered, fail-fast claims validation for one [`ValidationContext`].
#[derive(Clone)]
pub struct ClaimsValidator<E = CoreSignatureEngine> {
    context: ValidationContext,
    engine: E,
    time_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}
impl ClaimsValidator<CoreSignatureEngine> {
    /// Creates a validator backed by [`CoreSignatureEngine`].
    pub fn new(context: ValidationContext) -> Self {
        Self::with_engine(context, CoreSignatureEngine)
    }
}
impl<E> ClaimsValidator<E>
where
    E: SignatureEngine,
{
    pub fn with_engine(context: ValidationContext, engine: E) -> Self {
        Self {
            context,
            engine,
            time_fn: Arc::new(Utc::now),
        }
    }

    /// Specifies a function for returning the current time.
    ///
    /// This function is used for validating the issue, expiration and not-before times.
    pub fn set_time_fn<T>(mut self, time_fn: T) -> Self
    where
        T: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.time_fn = Arc::new(time_fn);
        self
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Runs the issuer, audience, timing and algorithm checks, returning the effective audience.
    ///
    /// No signature is verified here.
    pub fn verify_claims(
        &self,
        claims: &JwtClaims,
        signature: &JwsSignature,
    ) -> Result<Option<Audience>, ClaimsVerificationError> {
        self.verify_claims_at(claims, signature, (*self.time_fn)())
    }

    /// Verifies the signature and re-checks the claims the engine is responsible for.
    ///
    /// `key` is ignored for `HS*` algorithms, which use the configured client secret.
    pub fn verify_signature(
        &self,
        compact: &str,
        claims: &JwtClaims,
        signature: &JwsSignature,
        key: Option<&Jwk>,
        audience: Option<&Audience>,
    ) -> Result<(), ClaimsVerificationError> {
        self.verify_signature_at(compact, claims, signature, key, audience, (*self.time_fn)())
    }

    /// Runs [`verify_claims`](Self::verify_claims) followed by
    /// [`verify_signature`](Self::verify_signature).
    pub fn validate(
        &self,
        compact: &str,
        claims: JwtClaims,
        signature: &JwsSignature,
        key: Option<&Jwk>,
    ) -> Result<VerifiedClaims, ClaimsVerificationError> {
        let now = (*self.time_fn)();
        let audience = self.verify_claims_at(&claims, signature, now)?;
        self.verify_signature_at(compact, &claims, signature, key, audience.as_ref(), now)?;
        Ok(VerifiedClaims::new(claims, audience))
    }

    fn verify_claims_at(
        &self,
        claims: &JwtClaims,
        signature: &JwsSignature,
        now: DateTime<Utc>,
    ) -> Result<Option<Audience>, ClaimsVerificationError> {
        let audiences = claims.audiences().filter(|audiences| !audiences.is_empty());

        let audience = match self.context.token_type {
            TokenType::Jwt => {
                self.verify_jwt_issuer(claims.issuer())?;
                self.select_jwt_audience(audiences)?
            }
            TokenType::IdToken => self.verify_id_token_policy(claims, audiences)?,
        };

        self.verify_time_window(claims, now)?;
        self.verify_alg(signature)?;

        Ok(audience)
    }

    fn verify_jwt_issuer(&self, issuer: Option<&str>) -> Result<(), ClaimsVerificationError> {
        match (&self.context.issuer, issuer) {
            (IssuerPolicy::Disabled, Some(issuer)) if !issuer.is_empty() => {
                Err(ClaimsVerificationError::InvalidIssuer(format!(
                    "issuer checking is disabled for client `{}` but token has issuer `{}`",
                    *self.context.client_id, issuer
                )))
            }
            (IssuerPolicy::Disabled, _) => Ok(()),
            (IssuerPolicy::Trusted(_), Some(issuer)) if self.context.issuer_trusted(issuer) => {
                Ok(())
            }
            (IssuerPolicy::Trusted(trusted), Some(issuer)) => {
                Err(ClaimsVerificationError::InvalidIssuer(format!(
                    "expected `{}` (found `{}`)",
                    trusted, issuer
                )))
            }
            (IssuerPolicy::Trusted(_), None) => Err(ClaimsVerificationError::InvalidIssuer(
                "missing issuer claim".to_string(),
            )),
        }
    }

    fn select_jwt_audience(
        &self,
        audiences: Option<&Vec<Audience>>,
    ) -> Result<Option<Audience>, ClaimsVerificationError> {
        let Some(audiences) = audiences else {
            return match self.context.audiences {
                AudiencePolicy::AllowList(ref allowed) => {
                    Err(ClaimsVerificationError::InvalidAudience(format!(
                        "missing audiences claim (client `{}` allows: {})",
                        *self.context.client_id,
                        join_vec(allowed)
                    )))
                }
                AudiencePolicy::AcceptAll | AudiencePolicy::Unconfigured => Ok(None),
            };
        };

        let selected = match self.context.audiences {
            AudiencePolicy::AcceptAll => audiences.first(),
            AudiencePolicy::Unconfigured => audiences.iter().find(|aud| {
                self.context
                    .service_urls
                    .iter()
                    .any(|url| url.starts_with(aud.as_str()))
            }),
            AudiencePolicy::AllowList(ref allowed) => {
                audiences.iter().find(|aud| allowed.contains(*aud))
            }
        };

        match selected {
            Some(audience) => {
                log::debug!("selected audience `{}`", **audience);
                Ok(Some(audience.clone()))
            }
            None => {
                let trusted = match self.context.audiences {
                    AudiencePolicy::AllowList(ref allowed) => join_vec(allowed),
                    _ => format!(
                        "service URLs {}",
                        join_vec(&self.context.service_urls)
                    ),
                };
                Err(ClaimsVerificationError::InvalidAudience(format!(
                    "{} not trusted by client `{}` (allowed: {})",
                    join_vec(audiences),
                    *self.context.client_id,
                    trusted
                )))
            }
        }
    }

    fn verify_id_token_policy(
        &self,
        claims: &JwtClaims,
        audiences: Option<&Vec<Audience>>,
    ) -> Result<Option<Audience>, ClaimsVerificationError> {
        if claims.issue_time().is_none() {
            return Err(ClaimsVerificationError::MissingIssueTime);
        }

        match claims.issuer() {
            Some(issuer) if self.context.issuer_trusted(issuer) => {}
            Some(issuer) => {
                return Err(ClaimsVerificationError::InvalidIssuer(match self.context.issuer {
                    IssuerPolicy::Trusted(ref trusted) => {
                        format!("expected `{}` (found `{}`)", trusted, issuer)
                    }
                    IssuerPolicy::Disabled => format!(
                        "no issuer is trusted for client `{}` (found `{}`)",
                        *self.context.client_id, issuer
                    ),
                }))
            }
            None => {
                return Err(ClaimsVerificationError::InvalidIssuer(
                    "missing issuer claim".to_string(),
                ))
            }
        }

        let client_id = self.context.client_id.as_str();
        let audience = match audiences {
            Some(audiences) if audiences.iter().any(|aud| aud.as_str() == client_id) => {
                Some(Audience::new(client_id.to_string()))
            }
            Some(audiences) => {
                return Err(ClaimsVerificationError::InvalidAudience(format!(
                    "must contain `{}` (found audiences: {})",
                    client_id,
                    join_vec(audiences)
                )))
            }
            None => None,
        };

        if let Some(authorized_party) = claims.authorized_party() {
            if authorized_party.as_str() != client_id {
                return Err(ClaimsVerificationError::InvalidAuthorizedParty(format!(
                    "expected `{}` (found `{}`)",
                    client_id,
                    authorized_party.as_str()
                )));
            }
        }

        Ok(audience)
    }

    fn verify_time_window(
        &self,
        claims: &JwtClaims,
        now: DateTime<Utc>,
    ) -> Result<(), ClaimsVerificationError> {
        let skew = signed_duration(self.context.clock_skew);

        // Without `exp` the window is unbounded; without `iat` it starts at the epoch.
        if let Some(issue_time) = claims.issue_time() {
            if let Some(expiration) = claims.expiration() {
                if issue_time > expiration {
                    return Err(ClaimsVerificationError::Expired(format!(
                        "issue time ({:?}) is later than expiration ({:?})",
                        issue_time, expiration
                    )));
                }
            }
            if issue_time
                .checked_sub_signed(skew)
                .map_or(false, |earliest| now < earliest)
            {
                return Err(ClaimsVerificationError::Expired(format!(
                    "issue time ({:?}) is later than current time ({:?})",
                    issue_time, now
                )));
            }
        }
        if let Some(expiration) = claims.expiration() {
            if expiration
                .checked_add_signed(skew)
                .map_or(false, |latest| now > latest)
            {
                return Err(ClaimsVerificationError::Expired(format!(
                    "expiration ({:?}) is not later than current time ({:?})",
                    expiration, now
                )));
            }
        }

        if let Some(not_before) = claims.not_before() {
            if now
                .checked_add_signed(skew)
                .map_or(false, |latest| not_before > latest)
            {
                return Err(ClaimsVerificationError::NotYetValid(format!(
                    "not before ({:?}) is later than current time ({:?})",
                    not_before, now
                )));
            }
        }

        Ok(())
    }

    fn verify_alg(&self, signature: &JwsSignature) -> Result<(), ClaimsVerificationError> {
        let expected = &self.context.signature_alg;
        if *expected == CoreJwsSigningAlgorithm::None {
            return Ok(());
        }

        if signature.signature.is_empty() {
            return Err(ClaimsVerificationError::SignatureVerification(
                SignatureVerificationError::NoSignature,
            ));
        }
        if signature.header.alg != expected.as_str() {
            return Err(ClaimsVerificationError::SignatureVerification(
                SignatureVerificationError::DisallowedAlg(format!(
                    "expected `{}` (found `{}`)",
                    expected.as_str(),
                    signature.header.alg
                )),
            ));
        }
        Ok(())
    }

    fn verify_signature_at(
        &self,
        compact: &str,
        claims: &JwtClaims,
        signature: &JwsSignature,
        key: Option<&Jwk>,
        audience: Option<&Audience>,
        now: DateTime<Utc>,
    ) -> Result<(), ClaimsVerificationError> {
        let signature_alg = &self.context.signature_alg;

        let key = if signature_alg.uses_shared_secret() {
            match self.context.client_secret {
                Some(ref client_secret) => Some(VerificationKey::SharedSecret(
                    client_secret.secret().as_bytes(),
                )),
                // Without a client secret there is nothing confidential to key the MAC with.
                None => {
                    return Err(ClaimsVerificationError::SignatureVerification(
                        SignatureVerificationError::DisallowedAlg(
                            "symmetric signatures are disallowed for public clients".to_string(),
                        ),
                    ))
                }
            }
        } else {
            key.map(VerificationKey::Jwk)
        };

        let check = SignatureCheck {
            compact,
            signature_alg,
            key,
            claims,
            signature,
            require_subject: self.context.token_type == TokenType::IdToken,
            expected_audience: audience,
            now,
            clock_skew: signed_duration(self.context.clock_skew),
        };

        self.engine.verify(&check).map_err(classify_engine_error)
    }
}

fn classify_engine_error(err: Box<dyn Error + Send + Sync>) -> ClaimsVerificationError {
    let chain = || {
        std::iter::successors(
            Some(err.as_ref() as &(dyn Error + 'static)),
            |current: &&(dyn Error + 'static)| (*current).source(),
        )
    };

    if let Some(key_err) = chain().find_map(|current| current.downcast_ref::<KeyMaterialError>())
    {
        return ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::MissingKeyMaterial(key_err.to_string()),
        );
    }
    if let Some(claims_err) =
        chain().find_map(|current| current.downcast_ref::<ClaimsVerificationError>())
    {
        return claims_err.clone();
    }

    ClaimsVerificationError::SignatureVerification(SignatureVerificationError::CryptoError(
        err.to_string(),
    ))
}
