use crate::resolver::{HttpClientFactory, SslConfig};

/// [`HttpClientFactory`] building blocking `reqwest` clients.
///
/// Redirects are never followed, since following them would allow the JWKS endpoint to point the
/// resolver at an unrelated host.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClientFactory;
impl ReqwestHttpClientFactory {
    pub fn new() -> Self {
        Self
    }
}
impl HttpClientFactory for ReqwestHttpClientFactory {
    type Client = reqwest::blocking::Client;

    fn http_client(
        &self,
        ssl_config: Option<&SslConfig>,
        verify_hostname: bool,
    ) -> Result<Self::Client, String> {
        let mut builder =
            reqwest::blocking::ClientBuilder::new().redirect(reqwest::redirect::Policy::none());

        if let Some(ssl_config) = ssl_config {
            for pem in ssl_config.root_certificates() {
                let certificate = reqwest::Certificate::from_pem(pem).map_err(|err| {
                    format!(
                        "invalid root certificate in SSL configuration `{}`: {}",
                        ssl_config.name(),
                        err
                    )
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }

        if !verify_hostname {
            #[cfg(feature = "native-tls")]
            {
                log::warn!("TLS hostname verification is disabled for JWKS requests");
                builder = builder.danger_accept_invalid_hostnames(true);
            }
            // rustls offers no hostname-only override.
            #[cfg(not(feature = "native-tls"))]
            {
                log::warn!(
                    "TLS certificate validation (including hostname verification) is disabled \
                     for JWKS requests"
                );
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|err| format!("failed to build HTTP client: {}", err))
    }
}
