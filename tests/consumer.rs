use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use oidc_consumer::cache::JwkCache;
use oidc_consumer::claims::{decode_compact, JoseHeader, JwtClaims};
use oidc_consumer::consumer::{TokenConsumer, TokenConsumerError};
use oidc_consumer::core::CoreJwsSigningAlgorithm;
use oidc_consumer::resolver::{HttpClientFactory, JwkResolver, SslConfig};
use oidc_consumer::verification::{
    AudiencePolicy, ClaimsValidator, ClaimsVerificationError, TokenType, ValidationContext,
};
use oidc_consumer::{
    Audience, ClientId, HttpRequest, HttpResponse, JsonWebKeyId, JsonWebKeySetUrl,
    SubjectIdentifier,
};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::SigningKey;
use pretty_assertions::assert_eq;
use thiserror::Error;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

const ISSUER: &str = "https://idp.example.com";
const JWKS_URI: &str = "https://idp.example.com/jwks";
const SERVICE_URL: &str = "https://service.example.com/api/resource";

static INIT_LOG: Once = Once::new();

fn init_log() {
    INIT_LOG.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Debug, Error)]
#[error("connection refused")]
struct FakeError;

type MockClient = Box<dyn Fn(HttpRequest) -> Result<HttpResponse, FakeError> + Send + Sync>;

// Serves whatever JWKS document is currently published.
#[derive(Clone, Default)]
struct MockIdentityProvider {
    jwks: Arc<Mutex<String>>,
    fetches: Arc<AtomicUsize>,
}
impl MockIdentityProvider {
    fn publish(&self, keys: &[(&str, &SigningKey)]) {
        let keys = keys
            .iter()
            .map(|(kid, key)| ec_jwk(kid, key))
            .collect::<Vec<_>>();
        *self.jwks.lock().unwrap() = serde_json::json!({ "keys": keys }).to_string();
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}
impl HttpClientFactory for MockIdentityProvider {
    type Client = MockClient;

    fn http_client(&self, _: Option<&SslConfig>, verify_hostname: bool) -> Result<MockClient, String> {
        assert!(verify_hostname);
        let provider = self.clone();
        Ok(Box::new(move |request: HttpRequest| {
            assert_eq!(request.uri().to_string(), JWKS_URI);
            provider.fetches.fetch_add(1, Ordering::SeqCst);
            let body = provider.jwks.lock().unwrap().clone();
            Ok(http::Response::builder()
                .status(http::StatusCode::OK)
                .body(body.into_bytes())
                .unwrap())
        }))
    }
}

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp")
}

fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("invalid key")
}

fn ec_jwk(kid: &str, key: &SigningKey) -> serde_json::Value {
    let point = key.verifying_key().to_encoded_point(false);
    serde_json::json!({
        "kty": "EC",
        "kid": kid,
        "use": "sig",
        "crv": "P-256",
        "x": BASE64_URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point")),
        "y": BASE64_URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point")),
    })
}

fn sign_es256(kid: &str, key: &SigningKey, claims: &JwtClaims) -> String {
    let header = JoseHeader::new("ES256").set_key_id(Some(JsonWebKeyId::new(kid.to_string())));
    let input = format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
        BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap())
    );
    let signature: p256::ecdsa::Signature = key.sign(input.as_bytes());
    format!(
        "{}.{}",
        input,
        BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

fn claims() -> JwtClaims {
    JwtClaims::new()
        .set_issuer(Some(ISSUER.to_string()))
        .set_audiences(Some(vec![Audience::new(
            "https://service.example.com/api".to_string(),
        )]))
        .set_subject(Some(SubjectIdentifier::new("alice".to_string())))
        .set_issue_time(Some(now() - Duration::seconds(30)))
        .set_expiration(Some(now() + Duration::seconds(300)))
        .add_additional_claim("scope", serde_json::json!("read write"))
}

fn consumer(provider: &MockIdentityProvider) -> TokenConsumer<MockIdentityProvider> {
    let resolver = JwkResolver::new(
        Arc::new(JwkCache::new().set_time_fn(now)),
        provider.clone(),
    )
    .set_jwks_uri(Some(JsonWebKeySetUrl::parse(JWKS_URI).unwrap()))
    .set_signature_alg(CoreJwsSigningAlgorithm::EcdsaP256Sha256);

    let context = ValidationContext::new(
        ClientId::new("service".to_string()),
        TokenType::Jwt,
        ISSUER.to_string(),
    )
    .set_audiences(AudiencePolicy::from_configured(Vec::<String>::new()))
    .set_service_urls(vec![SERVICE_URL.to_string()])
    .set_signature_alg(CoreJwsSigningAlgorithm::EcdsaP256Sha256);

    TokenConsumer::new(ClaimsValidator::new(context).set_time_fn(now), resolver)
}

#[test]
fn test_consume_es256_with_key_rotation() {
    init_log();

    let first_key = signing_key(0x11);
    let second_key = signing_key(0x22);
    let provider = MockIdentityProvider::default();
    provider.publish(&[("k1", &first_key)]);
    let consumer = consumer(&provider);

    let compact = sign_es256("k1", &first_key, &claims());
    let (claims_in, signature) = decode_compact(&compact).unwrap();
    let verified = consumer
        .consume(&compact, claims_in, &signature)
        .expect("token signed by the published key");
    assert_eq!(
        verified.audience(),
        Some(&Audience::new("https://service.example.com/api".to_string()))
    );
    assert_eq!(
        verified.claims().additional_claims().get("scope"),
        Some(&serde_json::json!("read write"))
    );
    assert_eq!(provider.fetches(), 1);

    // The issuer rotates to a new key; the unknown key ID triggers one more fetch.
    provider.publish(&[("k2", &second_key), ("k1", &first_key)]);
    let compact = sign_es256("k2", &second_key, &claims());
    let (claims_in, signature) = decode_compact(&compact).unwrap();
    consumer
        .consume(&compact, claims_in, &signature)
        .expect("token signed by the rotated key");
    assert_eq!(provider.fetches(), 2);
    assert_eq!(consumer.resolver().cache().len(), 2);

    let compact = sign_es256("k1", &first_key, &claims());
    let (claims_in, signature) = decode_compact(&compact).unwrap();
    consumer
        .consume(&compact, claims_in, &signature)
        .expect("token signed by the old key");
    assert_eq!(provider.fetches(), 2);
}

#[test]
fn test_consume_rejects_forged_token() {
    init_log();

    let provider = MockIdentityProvider::default();
    provider.publish(&[("k1", &signing_key(0x11))]);
    let consumer = consumer(&provider);

    // Signed by a key the issuer never published, under a published key ID.
    let compact = sign_es256("k1", &signing_key(0x33), &claims());
    let (claims_in, signature) = decode_compact(&compact).unwrap();
    match consumer.consume(&compact, claims_in, &signature) {
        Err(TokenConsumerError::Verification(ClaimsVerificationError::SignatureVerification(
            _,
        ))) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_consume_rejects_foreign_audience() {
    init_log();

    let key = signing_key(0x11);
    let provider = MockIdentityProvider::default();
    provider.publish(&[("k1", &key)]);
    let consumer = consumer(&provider);

    let compact = sign_es256(
        "k1",
        &key,
        &claims().set_audiences(Some(vec![Audience::new(
            "https://billing.example.com".to_string(),
        )])),
    );
    let (claims_in, signature) = decode_compact(&compact).unwrap();
    match consumer.consume(&compact, claims_in, &signature) {
        Err(TokenConsumerError::Verification(ClaimsVerificationError::InvalidAudience(_))) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(provider.fetches(), 0);
}
