use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};

pub const MIME_TYPE_JSON: &str = "application/json";

pub const BASIC: &str = "Basic";

/// Longest response body (in characters) echoed back in retrieval errors.
pub const MAX_ERROR_BODY_CHARS: usize = 256;

pub fn auth_basic(
    username: &str,
    password: &str,
) -> Result<(HeaderName, HeaderValue), http::header::InvalidHeaderValue> {
    let credentials = BASE64_STANDARD.encode(format!("{}:{}", username, password));
    let mut value = HeaderValue::from_str(&format!("{} {}", BASIC, credentials))?;
    value.set_sensitive(true);
    Ok((AUTHORIZATION, value))
}

pub fn is_http_url(url: &url::Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
