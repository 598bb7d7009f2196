use crate::cache::JwkCache;
use crate::core::CoreJwsSigningAlgorithm;
use crate::helpers::truncate_body;
use crate::http_utils::{auth_basic, is_http_url, MAX_ERROR_BODY_CHARS, MIME_TYPE_JSON};
use crate::types::jwk::{JsonWebKeyId, JsonWebKeyThumbprint, Jwk};
use crate::types::jwks::JsonWebKeySet;
use crate::{ClientId, ClientSecret, HttpRequest, HttpResponse, JsonWebKeySetUrl, SyncHttpClient};

use chrono::{DateTime, Utc};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::method::Method;
use http::status::StatusCode;
use thiserror::Error;

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;


/// Named TLS trust configuration used when fetching a JWKS over `https`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SslConfig {
    name: String,
    root_certificates: Vec<Vec<u8>>,
}
impl SslConfig {
    pub fn new(name: String) -> Self {
        Self {
            name,
            root_certificates: Vec::new(),
        }
    }

    /// Adds a PEM-encoded root certificate to trust.
    pub fn add_root_certificate(mut self, pem: Vec<u8>) -> Self {
        self.root_certificates.push(pem);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PEM-encoded root certificates, in the order they were added.
    pub fn root_certificates(&self) -> &[Vec<u8>] {
        &self.root_certificates
    }
}

/// Provider of named [`SslConfig`]s.
pub trait SslSupport: Send + Sync {
    /// Returns the configuration registered under `reference`, or the provider's default when
    /// `reference` is `None` or unknown.
    fn ssl_config(&self, reference: Option<&str>) -> Option<SslConfig>;
}

/// Map-backed [`SslSupport`] with an optional default configuration.
#[derive(Clone, Debug, Default)]
pub struct SslConfigurations {
    configs: HashMap<String, SslConfig>,
    default: Option<String>,
}
impl SslConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `config` under its name, replacing any previous configuration of that name.
    pub fn add(mut self, config: SslConfig) -> Self {
        self.configs.insert(config.name().to_string(), config);
        self
    }

    /// Names the configuration used when no (or an unknown) reference is requested.
    pub fn set_default(mut self, name: Option<String>) -> Self {
        self.default = name;
        self
    }
}
impl SslSupport for SslConfigurations {
    fn ssl_config(&self, reference: Option<&str>) -> Option<SslConfig> {
        reference
            .and_then(|reference| self.configs.get(reference))
            .or_else(|| {
                self.default
                    .as_deref()
                    .and_then(|default| self.configs.get(default))
            })
            .cloned()
    }
}

/// Builds the HTTP client used for a JWKS fetch.
pub trait HttpClientFactory {
    type Client: SyncHttpClient;

    /// Returns a client trusting `ssl_config` (platform defaults when `None`). Hostname
    /// verification is skipped when `verify_hostname` is `false`.
    fn http_client(
        &self,
        ssl_config: Option<&SslConfig>,
        verify_hostname: bool,
    ) -> Result<Self::Client, String>;
}

/// Error retrieving signing keys.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwkRetrievalError<RE>
where
    RE: std::error::Error + 'static,
{
    /// The TLS configuration or HTTP client is missing or unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// An error occurred while sending the request.
    #[error("Request to `{url}` failed")]
    Request {
        url: String,
        #[source]
        source: RE,
    },
    /// The server returned a non-200 status or an empty body.
    #[error("Server returned invalid response from `{url}` (HTTP status {status}): `{body}`")]
    Response {
        url: String,
        status: StatusCode,
        body: String,
    },
    /// The response body is not a JSON Web Key Set.
    #[error("Failed to parse JWKS from `{url}`")]
    Parse {
        url: String,
        #[source]
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    /// The local key file could not be read or decoded.
    #[error("Failed to load key file `{}`: {message}", .path.display())]
    KeyFile { path: PathBuf, message: String },
    /// An unexpected error occurred.
    #[error("Other error: {0}")]
    Other(String),
}

/// Resolves signing keys for one issuer configuration.
///
/// Lookups go to the shared [`JwkCache`] first. On a miss the key set is loaded from the
/// configured JWKS URL (or the local key file) while holding the cache's fetch guard, so
/// concurrent misses trigger a single request.
pub struct JwkResolver<F> {
    cache: Arc<JwkCache>,
    http_client_factory: F,
    jwks_uri: Option<JsonWebKeySetUrl>,
    key_file: Option<PathBuf>,
    ssl_support: Option<Arc<dyn SslSupport>>,
    ssl_ref: Option<String>,
    signature_alg: CoreJwsSigningAlgorithm,
    verify_hostname: bool,
    basic_auth: Option<(ClientId, ClientSecret)>,
    request_params: Vec<(String, String)>,
}
impl<F> JwkResolver<F>
where
    F: HttpClientFactory,
{
    /// Creates a resolver with no key source configured, expecting `RS256` signatures.
    pub fn new(cache: Arc<JwkCache>, http_client_factory: F) -> Self {
        Self {
            cache,
            http_client_factory,
            jwks_uri: None,
            key_file: None,
            ssl_support: None,
            ssl_ref: None,
            signature_alg: CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
            verify_hostname: true,
            basic_auth: None,
            request_params: Vec::new(),
        }
    }

    pub fn set_jwks_uri(mut self, jwks_uri: Option<JsonWebKeySetUrl>) -> Self {
        self.jwks_uri = jwks_uri;
        self
    }

    /// Local JWKS document or PEM public key, used when no `http`/`https` JWKS URL is set or
    /// the remote fetch fails.
    pub fn set_key_file(mut self, key_file: Option<PathBuf>) -> Self {
        self.key_file = key_file;
        self
    }

    pub fn set_ssl_support(mut self, ssl_support: Option<Arc<dyn SslSupport>>) -> Self {
        self.ssl_support = ssl_support;
        self
    }

    pub fn set_ssl_ref(mut self, ssl_ref: Option<String>) -> Self {
        self.ssl_ref = ssl_ref;
        self
    }

    /// Signature algorithm tokens are expected to use. `EC` keys are only loaded for the `ES*`
    /// family.
    pub fn set_signature_alg(mut self, signature_alg: CoreJwsSigningAlgorithm) -> Self {
        self.signature_alg = signature_alg;
        self
    }

    /// Disables TLS hostname verification for JWKS requests.
    ///
    /// With `ReqwestHttpClientFactory` under `rustls-tls`
    /// (without `native-tls`), this disables certificate validation entirely.
    ///
    /// # Security Warning
    ///
    /// This exposes key retrieval to man-in-the-middle attacks and should only be used for
    /// testing.
    pub fn insecure_disable_hostname_verification(mut self) -> Self {
        self.verify_hostname = false;
        self
    }

    /// Sends HTTP basic authentication with every JWKS request.
    pub fn set_jwks_basic_auth(mut self, basic_auth: Option<(ClientId, ClientSecret)>) -> Self {
        self.basic_auth = basic_auth;
        self
    }

    /// Appends a query parameter to the JWKS URL.
    pub fn add_jwks_request_param(mut self, name: String, value: String) -> Self {
        self.request_params.push((name, value));
        self
    }

    pub fn cache(&self) -> &Arc<JwkCache> {
        &self.cache
    }

    /// Returns the key identified by `x5t` if given, otherwise by `kid`, loading the key set on
    /// a cache miss. With neither, the sole cached key is returned.
    ///
    /// `Ok(None)` means no matching key is available and the signature cannot be verified.
    pub fn resolve_public_key(
        &self,
        kid: Option<&JsonWebKeyId>,
        x5t: Option<&JsonWebKeyThumbprint>,
    ) -> Result<Option<Arc<Jwk>>, JwkRetrievalError<<F::Client as SyncHttpClient>::Error>> {
        let lookup = || match x5t {
            Some(_) => self.cache.key_by_x5t(x5t),
            None => self.cache.key_by_kid(kid),
        };

        if let Some(jwk) = lookup() {
            return Ok(Some(jwk));
        }

        {
            let _guard = self.cache.fetch_guard();
            // Another caller may have loaded the keys while we waited.
            if let Some(jwk) = lookup() {
                return Ok(Some(jwk));
            }
            self.load_keys()?;
        }

        let jwk = lookup();
        if jwk.is_none() {
            log::debug!(
                "no key found for {}",
                KeyReference {
                    kid,
                    x5t
                }
            );
        }
        Ok(jwk)
    }

    fn load_keys(&self) -> Result<(), JwkRetrievalError<<F::Client as SyncHttpClient>::Error>> {
        let remote = self
            .jwks_uri
            .as_ref()
            .filter(|jwks_uri| is_http_url(jwks_uri.url()));

        match (remote, self.key_file.as_deref()) {
            (Some(jwks_uri), key_file) => match self.fetch_jwks(jwks_uri) {
                Ok(()) => Ok(()),
                Err(err) => match key_file {
                    Some(key_file) => {
                        log::warn!(
                            "failed to fetch JWKS from `{}`, falling back to key file `{}`: {}",
                            jwks_uri,
                            key_file.display(),
                            err
                        );
                        self.load_key_file(key_file)
                    }
                    None => Err(err),
                },
            },
            (None, Some(key_file)) => self.load_key_file(key_file),
            (None, None) => {
                log::debug!("no JWKS URL or key file configured");
                Ok(())
            }
        }
    }

    fn fetch_jwks(
        &self,
        jwks_uri: &JsonWebKeySetUrl,
    ) -> Result<(), JwkRetrievalError<<F::Client as SyncHttpClient>::Error>> {
        let ssl_config = match self.ssl_support {
            Some(ref ssl_support) => {
                let ssl_config = ssl_support.ssl_config(self.ssl_ref.as_deref());
                if ssl_config.is_none() && jwks_uri.url().scheme() == "https" {
                    return Err(JwkRetrievalError::Configuration(format!(
                        "no SSL configuration found for reference `{}`",
                        self.ssl_ref.as_deref().unwrap_or("<default>")
                    )));
                }
                ssl_config
            }
            None => None,
        };

        let http_client = self
            .http_client_factory
            .http_client(ssl_config.as_ref(), self.verify_hostname)
            .map_err(JwkRetrievalError::Configuration)?;

        let request = self.jwks_request(jwks_uri)?;
        log::debug!("fetching JWKS from `{}`", jwks_uri);
        let response = http_client
            .call(request)
            .map_err(|source| JwkRetrievalError::Request {
                url: jwks_uri.to_string(),
                source,
            })?;

        let jwks = self.jwks_response(jwks_uri, response)?;
        self.store_keys(jwks, jwks_uri);
        Ok(())
    }

    fn jwks_request<RE>(&self, jwks_uri: &JsonWebKeySetUrl) -> Result<HttpRequest, JwkRetrievalError<RE>>
    where
        RE: std::error::Error + 'static,
    {
        let mut url = jwks_uri.url().clone();
        if !self.request_params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.request_params);
        }

        let mut builder = http::Request::builder()
            .uri(url.to_string())
            .method(Method::GET)
            .header(CONTENT_TYPE, HeaderValue::from_static(MIME_TYPE_JSON));

        if let Some((ref client_id, ref client_secret)) = self.basic_auth {
            let (name, value) = auth_basic(client_id, client_secret.secret()).map_err(|err| {
                JwkRetrievalError::Other(format!("invalid basic auth credentials: {err}"))
            })?;
            builder = builder.header(name, value);
        }

        builder
            .body(Vec::new())
            .map_err(|err| JwkRetrievalError::Other(format!("failed to prepare request: {err}")))
    }

    fn jwks_response<RE>(
        &self,
        jwks_uri: &JsonWebKeySetUrl,
        response: HttpResponse,
    ) -> Result<JsonWebKeySet, JwkRetrievalError<RE>>
    where
        RE: std::error::Error + 'static,
    {
        if response.status() != StatusCode::OK || response.body().is_empty() {
            return Err(JwkRetrievalError::Response {
                url: jwks_uri.to_string(),
                status: response.status(),
                body: truncate_body(response.body(), MAX_ERROR_BODY_CHARS),
            });
        }

        JsonWebKeySet::parse(response.body(), &self.signature_alg, self.cache.now()).map_err(
            |source| JwkRetrievalError::Parse {
                url: jwks_uri.to_string(),
                source,
            },
        )
    }

    fn load_key_file<RE>(&self, path: &Path) -> Result<(), JwkRetrievalError<RE>>
    where
        RE: std::error::Error + 'static,
    {
        let key_file_error = |message: String| JwkRetrievalError::KeyFile {
            path: path.to_path_buf(),
            message,
        };

        let contents = std::fs::read_to_string(path).map_err(|err| key_file_error(err.to_string()))?;
        let created: DateTime<Utc> = self.cache.now();

        let jwks = if contents.trim_start().starts_with("-----BEGIN") {
            Jwk::from_pem(&contents, created)
                .map(|jwk| JsonWebKeySet::new(vec![jwk]))
                .map_err(|err| key_file_error(err.to_string()))?
        } else {
            JsonWebKeySet::parse(contents.as_bytes(), &self.signature_alg, created)
                .map_err(|err| key_file_error(err.to_string()))?
        };

        self.store_keys(jwks, path.display());
        Ok(())
    }

    fn store_keys<S>(&self, jwks: JsonWebKeySet, source: S)
    where
        S: Display,
    {
        let keys = jwks.into_keys();
        if keys.is_empty() {
            log::warn!("no usable keys found in `{}`", source);
            return;
        }

        log::debug!("caching {} key(s) from `{}`", keys.len(), source);
        for key in keys {
            self.cache.refresh(key);
        }
    }
}
impl<F> Debug for JwkResolver<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkResolver")
            .field("cache", &self.cache)
            .field("jwks_uri", &self.jwks_uri)
            .field("key_file", &self.key_file)
            .field("ssl_ref", &self.ssl_ref)
            .field("signature_alg", &self.signature_alg)
            .field("verify_hostname", &self.verify_hostname)
            .finish()
    }
}

struct KeyReference<'a> {
    kid: Option<&'a JsonWebKeyId>,
    x5t: Option<&'a JsonWebKeyThumbprint>,
}
impl Display for KeyReference<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.x5t, self.kid) {
            (Some(x5t), _) => write!(f, "thumbprint `{}`", x5t.as_str()),
            (None, Some(kid)) => write!(f, "key ID `{}`", kid.as_str()),
            (None, None) => f.write_str("unidentified key"),
        }
    }
}
