use serde::{Deserialize, Serialize};
use url::Url;

pub(crate) mod jwk;
pub(crate) mod jwks;


new_type![
    /// Audience claim value.
    #[derive(Deserialize, Hash, Ord, PartialOrd, Serialize)]
    pub Audience(String)
];
impl AsRef<str> for Audience {
    fn as_ref(&self) -> &str {
        self
    }
}

new_type![
    /// Unique identifier of the end user (`sub` claim) within the issuer.
    #[derive(Deserialize, Hash, Ord, PartialOrd, Serialize)]
    pub SubjectIdentifier(String)
];

new_type![
    /// JSON Web Key Set URL.
    #[derive(Deserialize, Hash, Serialize)]
    pub JsonWebKeySetUrl(Url)
    impl {
        /// Parses a string as a JSON Web Key Set URL.
        pub fn parse(url: &str) -> Result<Self, url::ParseError> {
            Url::parse(url).map(Self)
        }

        /// Returns the wrapped URL.
        pub fn url(&self) -> &Url {
            &self.0
        }
    }
];
impl std::fmt::Display for JsonWebKeySetUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
