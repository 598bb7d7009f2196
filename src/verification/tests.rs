use crate::claims::{decode_compact, JoseHeader, JwsSignature, JwtClaims};
use crate::core::tests::{sign_hs256, sign_rs256, TEST_HMAC_SECRET};
use crate::core::CoreJwsSigningAlgorithm;
use crate::types::tests::test_rsa_jwk;
use crate::verification::{
    AudiencePolicy, ClaimsValidator, ClaimsVerificationError, IssuerPolicy, KeyMaterialError,
    SignatureCheck, SignatureEngine, SignatureVerificationError, TokenType, ValidationContext,
    ALL_AUDIENCES, DEFAULT_CLOCK_SKEW,
};
use crate::{Audience, ClientId, ClientSecret, SubjectIdentifier};

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ISSUER: &str = "https://idp.example.com";
const CLIENT_ID: &str = "my_client";

// What the validator handed to the engine on each call.
#[derive(Clone, Debug, PartialEq)]
struct RecordedCheck {
    signature_alg: CoreJwsSigningAlgorithm,
    has_key: bool,
    require_subject: bool,
    expected_audience: Option<Audience>,
}

#[derive(Clone, Default)]
struct MockEngine {
    checks: Arc<Mutex<Vec<RecordedCheck>>>,
    failure: Option<fn() -> Box<dyn Error + Send + Sync>>,
}
impl MockEngine {
    fn failing(failure: fn() -> Box<dyn Error + Send + Sync>) -> Self {
        Self {
            checks: Arc::default(),
            failure: Some(failure),
        }
    }

    fn checks(&self) -> Vec<RecordedCheck> {
        self.checks.lock().unwrap().clone()
    }
}
impl SignatureEngine for MockEngine {
    fn verify(&self, check: &SignatureCheck<'_>) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.checks.lock().unwrap().push(RecordedCheck {
            signature_alg: check.signature_alg.clone(),
            has_key: check.key.is_some(),
            require_subject: check.require_subject,
            expected_audience: check.expected_audience.cloned(),
        });
        match self.failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp")
}

fn seconds(secs: i64) -> chrono::Duration {
    chrono::Duration::seconds(secs)
}

fn rs256_signature() -> JwsSignature {
    JwsSignature {
        header: JoseHeader::new("RS256"),
        signature: vec![0x5a; 256],
    }
}

fn jwt_context() -> ValidationContext {
    ValidationContext::new(
        ClientId::new(CLIENT_ID.to_string()),
        TokenType::Jwt,
        ISSUER.to_string(),
    )
}

fn id_token_context() -> ValidationContext {
    ValidationContext::new(
        ClientId::new(CLIENT_ID.to_string()),
        TokenType::IdToken,
        ISSUER.to_string(),
    )
}

fn jwt_claims() -> JwtClaims {
    JwtClaims::new()
        .set_issuer(Some(ISSUER.to_string()))
        .set_issue_time(Some(now() - seconds(60)))
        .set_expiration(Some(now() + seconds(600)))
}

fn id_token_claims() -> JwtClaims {
    jwt_claims()
        .set_audiences(Some(vec![Audience::new(CLIENT_ID.to_string())]))
        .set_subject(Some(SubjectIdentifier::new("alice".to_string())))
}

fn validator(context: ValidationContext, engine: &MockEngine) -> ClaimsValidator<MockEngine> {
    ClaimsValidator::with_engine(context, engine.clone()).set_time_fn(now)
}

fn validate(
    context: ValidationContext,
    engine: &MockEngine,
    claims: JwtClaims,
) -> Result<Option<Audience>, ClaimsVerificationError> {
    validator(context, engine)
        .validate("header.payload.signature", claims, &rs256_signature(), None)
        .map(|verified| verified.audience().cloned())
}

#[test]
fn test_untrusted_issuer_skips_engine() {
    for context in [jwt_context(), id_token_context()] {
        let engine = MockEngine::default();
        let result = validate(
            context,
            &engine,
            id_token_claims().set_issuer(Some("https://evil.example.com".to_string())),
        );
        assert_eq!(
            result,
            Err(ClaimsVerificationError::InvalidIssuer(
                "expected `https://idp.example.com` (found `https://evil.example.com`)".to_string()
            ))
        );
        assert!(engine.checks().is_empty());
    }
}

#[test]
fn test_jwt_issuer_lists() {
    let context = ValidationContext::new(
        ClientId::new(CLIENT_ID.to_string()),
        TokenType::Jwt,
        "https://a.example.com, https://b.example.com".to_string(),
    );
    let engine = MockEngine::default();
    for issuer in ["https://a.example.com", "https://b.example.com"] {
        validate(
            context.clone(),
            &engine,
            jwt_claims().set_issuer(Some(issuer.to_string())),
        )
        .expect("listed issuer should be trusted");
    }
    // The whole configured string is also accepted as is.
    validate(
        context.clone(),
        &engine,
        jwt_claims().set_issuer(Some("https://a.example.com, https://b.example.com".to_string())),
    )
    .expect("full issuer string should be trusted");
    assert!(matches!(
        validate(
            context,
            &engine,
            jwt_claims().set_issuer(Some("https://c.example.com".to_string())),
        ),
        Err(ClaimsVerificationError::InvalidIssuer(_))
    ));

    // ID tokens only split on spaces.
    let context = ValidationContext::new(
        ClientId::new(CLIENT_ID.to_string()),
        TokenType::IdToken,
        "https://a.example.com https://b.example.com,https://c.example.com".to_string(),
    );
    validate(
        context.clone(),
        &engine,
        id_token_claims().set_issuer(Some("https://a.example.com".to_string())),
    )
    .expect("space-delimited issuer should be trusted");
    assert!(matches!(
        validate(
            context,
            &engine,
            id_token_claims().set_issuer(Some("https://c.example.com".to_string())),
        ),
        Err(ClaimsVerificationError::InvalidIssuer(_))
    ));
}

#[test]
fn test_missing_and_disabled_issuer() {
    let engine = MockEngine::default();

    assert_eq!(
        validate(jwt_context(), &engine, jwt_claims().set_issuer(None)),
        Err(ClaimsVerificationError::InvalidIssuer(
            "missing issuer claim".to_string()
        ))
    );

    let disabled = jwt_context().insecure_disable_issuer_check();
    assert_eq!(disabled.issuer(), &IssuerPolicy::Disabled);
    validate(disabled.clone(), &engine, jwt_claims().set_issuer(None))
        .expect("issuer-less JWT should be accepted");
    assert!(matches!(
        validate(disabled, &engine, jwt_claims()),
        Err(ClaimsVerificationError::InvalidIssuer(_))
    ));

    // With issuer checking disabled, no ID token issuer is trusted.
    assert!(matches!(
        validate(
            id_token_context().insecure_disable_issuer_check(),
            &engine,
            id_token_claims()
        ),
        Err(ClaimsVerificationError::InvalidIssuer(_))
    ));
}

#[test]
fn test_jwt_audience_from_service_urls() {
    let engine = MockEngine::default();
    let context = jwt_context().set_service_urls(vec![
        "https://other.example.com/".to_string(),
        "https://service.example.com/api/resource".to_string(),
    ]);
    let claims = jwt_claims().set_audiences(Some(vec![
        Audience::new("https://unrelated.example.com".to_string()),
        Audience::new("https://service.example.com/api".to_string()),
    ]));

    let audience = validate(context.clone(), &engine, claims).expect("audience should match");
    let expected = Audience::new("https://service.example.com/api".to_string());
    assert_eq!(audience, Some(expected.clone()));
    assert_eq!(
        engine.checks(),
        vec![RecordedCheck {
            signature_alg: CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
            has_key: false,
            require_subject: false,
            expected_audience: Some(expected),
        }]
    );

    let err = validate(
        context,
        &engine,
        jwt_claims().set_audiences(Some(vec![Audience::new(
            "https://service.example.com/admin".to_string(),
        )])),
    )
    .unwrap_err();
    assert!(matches!(err, ClaimsVerificationError::InvalidAudience(_)));
    assert_eq!(engine.checks().len(), 1);
}

#[test]
fn test_jwt_audience_policies() {
    let engine = MockEngine::default();
    let first = Audience::new("aud1".to_string());
    let second = Audience::new("aud2".to_string());
    let claims = jwt_claims().set_audiences(Some(vec![first.clone(), second.clone()]));

    let accept_all = jwt_context().set_audiences(AudiencePolicy::AcceptAll);
    assert_eq!(
        validate(accept_all.clone(), &engine, claims.clone()),
        Ok(Some(first.clone()))
    );
    assert_eq!(
        validate(accept_all, &engine, jwt_claims()),
        Ok(None),
        "tokens without audiences are accepted"
    );

    let allow_list = jwt_context().set_audiences(AudiencePolicy::AllowList(vec![second.clone()]));
    assert_eq!(
        validate(allow_list.clone(), &engine, claims),
        Ok(Some(second))
    );
    assert!(matches!(
        validate(
            allow_list.clone(),
            &engine,
            jwt_claims().set_audiences(Some(vec![first]))
        ),
        Err(ClaimsVerificationError::InvalidAudience(_))
    ));
    assert!(matches!(
        validate(allow_list, &engine, jwt_claims()),
        Err(ClaimsVerificationError::InvalidAudience(_))
    ));

    // An empty audience list counts as no audiences.
    assert_eq!(
        validate(jwt_context(), &engine, jwt_claims().set_audiences(Some(vec![]))),
        Ok(None)
    );
}

#[test]
fn test_audience_policy_from_configured() {
    assert_eq!(
        AudiencePolicy::from_configured(Vec::<String>::new()),
        AudiencePolicy::Unconfigured
    );
    assert_eq!(
        AudiencePolicy::from_configured([""]),
        AudiencePolicy::Unconfigured
    );
    assert_eq!(
        AudiencePolicy::from_configured(["aud1", ALL_AUDIENCES]),
        AudiencePolicy::AcceptAll
    );
    assert_eq!(
        AudiencePolicy::from_configured(["aud1", "aud2"]),
        AudiencePolicy::AllowList(vec![
            Audience::new("aud1".to_string()),
            Audience::new("aud2".to_string())
        ])
    );
}

#[test]
fn test_id_token_policy() {
    let engine = MockEngine::default();

    let audience = validate(id_token_context(), &engine, id_token_claims())
        .expect("valid ID token");
    assert_eq!(audience, Some(Audience::new(CLIENT_ID.to_string())));
    assert!(engine.checks()[0].require_subject);

    assert_eq!(
        validate(
            id_token_context(),
            &engine,
            id_token_claims().set_issue_time(None)
        ),
        Err(ClaimsVerificationError::MissingIssueTime)
    );

    assert_eq!(
        validate(
            id_token_context(),
            &engine,
            id_token_claims().set_audiences(Some(vec![Audience::new("other".to_string())]))
        ),
        Err(ClaimsVerificationError::InvalidAudience(
            "must contain `my_client` (found audiences: `other`)".to_string()
        ))
    );

    assert_eq!(
        validate(
            id_token_context(),
            &engine,
            id_token_claims().set_authorized_party(Some(ClientId::new("other".to_string())))
        ),
        Err(ClaimsVerificationError::InvalidAuthorizedParty(
            "expected `my_client` (found `other`)".to_string()
        ))
    );
    validate(
        id_token_context(),
        &engine,
        id_token_claims().set_authorized_party(Some(ClientId::new(CLIENT_ID.to_string()))),
    )
    .expect("matching authorized party");
}

#[test]
fn test_expired_token() {
    let engine = MockEngine::default();
    let claims = jwt_claims()
        .set_issue_time(Some(now() - seconds(3600)))
        .set_expiration(Some(now() - seconds(1800)));

    assert!(matches!(
        validate(
            jwt_context().set_clock_skew(Duration::from_secs(0)),
            &engine,
            claims.clone()
        ),
        Err(ClaimsVerificationError::Expired(_))
    ));
    assert!(engine.checks().is_empty());

    // A skew larger than the overrun hides it.
    validate(
        jwt_context().set_clock_skew(Duration::from_secs(3600)),
        &engine,
        claims,
    )
    .expect("within clock skew");
}

#[test]
fn test_time_window() {
    let engine = MockEngine::default();
    assert_eq!(jwt_context().clock_skew(), DEFAULT_CLOCK_SKEW);

    // Issued in the future, within the default skew.
    validate(
        jwt_context(),
        &engine,
        jwt_claims().set_issue_time(Some(now() + seconds(120))),
    )
    .expect("issue time within clock skew");
    assert!(matches!(
        validate(
            jwt_context(),
            &engine,
            jwt_claims().set_issue_time(Some(now() + seconds(300))),
        ),
        Err(ClaimsVerificationError::Expired(_))
    ));

    assert!(matches!(
        validate(
            jwt_context(),
            &engine,
            jwt_claims()
                .set_issue_time(Some(now() + seconds(700)))
                .set_expiration(Some(now() + seconds(600))),
        ),
        Err(ClaimsVerificationError::Expired(_))
    ));

    assert!(matches!(
        validate(
            jwt_context(),
            &engine,
            jwt_claims().set_not_before(Some(now() + seconds(300))),
        ),
        Err(ClaimsVerificationError::NotYetValid(_))
    ));

    // Without `exp`, the window still starts at the issue time.
    validate(
        jwt_context(),
        &engine,
        jwt_claims().set_expiration(None),
    )
    .expect("no expiration");
    assert!(matches!(
        validate(
            jwt_context(),
            &engine,
            jwt_claims()
                .set_expiration(None)
                .set_issue_time(Some(now() + seconds(3600))),
        ),
        Err(ClaimsVerificationError::Expired(_))
    ));
}

#[test]
fn test_future_issue_time_without_expiration() {
    let engine = MockEngine::default();
    let context = id_token_context().set_clock_skew(Duration::from_secs(0));

    assert!(matches!(
        validate(
            context.clone(),
            &engine,
            id_token_claims()
                .set_expiration(None)
                .set_issue_time(Some(now() + seconds(86400))),
        ),
        Err(ClaimsVerificationError::Expired(_))
    ));
    assert_eq!(engine.checks(), vec![]);

    assert_eq!(
        validate(
            context,
            &engine,
            id_token_claims()
                .set_expiration(None)
                .set_issue_time(Some(now())),
        ),
        Ok(Some(Audience::new(CLIENT_ID.to_string())))
    );
    assert_eq!(engine.checks().len(), 1);
}

#[test]
fn test_disallowed_alg_skips_engine() {
    let engine = MockEngine::default();
    let signature = JwsSignature {
        header: JoseHeader::new("HS256"),
        signature: vec![1, 2, 3],
    };

    let result = validator(jwt_context(), &engine).validate(
        "header.payload.signature",
        jwt_claims(),
        &signature,
        None,
    );
    assert_eq!(
        result,
        Err(ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::DisallowedAlg(
                "expected `RS256` (found `HS256`)".to_string()
            )
        ))
    );
    assert!(engine.checks().is_empty());
}

#[test]
fn test_missing_signature() {
    let engine = MockEngine::default();
    let signature = JwsSignature {
        header: JoseHeader::new("RS256"),
        signature: Vec::new(),
    };

    assert_eq!(
        validator(jwt_context(), &engine)
            .verify_claims(&jwt_claims(), &signature)
            .unwrap_err(),
        ClaimsVerificationError::SignatureVerification(SignatureVerificationError::NoSignature)
    );

    // `none` doesn't look at the signature at all.
    let unsigned = JwsSignature {
        header: JoseHeader::new("none"),
        signature: Vec::new(),
    };
    let validator = validator(
        jwt_context().set_signature_alg(CoreJwsSigningAlgorithm::None),
        &engine,
    );
    validator
        .validate("header.payload.", jwt_claims(), &unsigned, None)
        .expect("unsigned token accepted");
    assert_eq!(
        engine.checks()[0].signature_alg,
        CoreJwsSigningAlgorithm::None
    );
}

#[test]
fn test_engine_error_classification() {
    let validate_with = |engine: MockEngine| {
        validator(jwt_context(), &engine)
            .validate("header.payload.signature", jwt_claims(), &rs256_signature(), None)
            .unwrap_err()
    };

    assert_eq!(
        validate_with(MockEngine::failing(|| KeyMaterialError::Missing.into())),
        ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::MissingKeyMaterial(
                "no key available to verify the signature".to_string()
            )
        )
    );
    assert_eq!(
        validate_with(MockEngine::failing(|| {
            ClaimsVerificationError::InvalidSubject("missing subject claim".to_string()).into()
        })),
        ClaimsVerificationError::InvalidSubject("missing subject claim".to_string())
    );
    assert_eq!(
        validate_with(MockEngine::failing(|| "hardware token unavailable".into())),
        ClaimsVerificationError::SignatureVerification(SignatureVerificationError::CryptoError(
            "hardware token unavailable".to_string()
        ))
    );
}

#[test]
fn test_rs256_validation() {
    let claims = id_token_claims();
    let compact = sign_rs256(&JoseHeader::new("RS256"), &claims);
    let (claims, signature) = decode_compact(&compact).unwrap();
    let validator = ClaimsValidator::new(id_token_context()).set_time_fn(now);

    let verified = validator
        .validate(&compact, claims.clone(), &signature, Some(&test_rsa_jwk()))
        .expect("valid token");
    assert_eq!(verified.claims(), &claims);
    assert_eq!(
        verified.audience(),
        Some(&Audience::new(CLIENT_ID.to_string()))
    );

    assert!(matches!(
        validator.validate(&compact, claims, &signature, None),
        Err(ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::MissingKeyMaterial(_)
        ))
    ));
}

#[test]
fn test_hs256_validation() {
    let claims = id_token_claims();
    let compact = sign_hs256(TEST_HMAC_SECRET, &JoseHeader::new("HS256"), &claims);
    let (claims, signature) = decode_compact(&compact).unwrap();

    let public_client = ClaimsValidator::new(
        id_token_context().set_signature_alg(CoreJwsSigningAlgorithm::HmacSha256),
    )
    .set_time_fn(now);
    assert!(matches!(
        public_client.validate(&compact, claims.clone(), &signature, None),
        Err(ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::DisallowedAlg(_)
        ))
    ));

    let confidential_client = ClaimsValidator::new(
        id_token_context()
            .set_signature_alg(CoreJwsSigningAlgorithm::HmacSha256)
            .set_client_secret(ClientSecret::new(
                String::from_utf8(TEST_HMAC_SECRET.to_vec()).unwrap(),
            )),
    )
    .set_time_fn(now);
    // Any resolved key is ignored in favor of the client secret.
    confidential_client
        .validate(&compact, claims.clone(), &signature, Some(&test_rsa_jwk()))
        .expect("valid MAC");

    let wrong_secret = ClaimsValidator::new(
        id_token_context()
            .set_signature_alg(CoreJwsSigningAlgorithm::HmacSha256)
            .set_client_secret(ClientSecret::new("not the secret".to_string())),
    )
    .set_time_fn(now);
    assert!(matches!(
        wrong_secret.validate(&compact, claims, &signature, None),
        Err(ClaimsVerificationError::SignatureVerification(
            SignatureVerificationError::CryptoError(_)
        ))
    ));
}
