//! Tokens which stay out of logs and are wiped when dropped.

use std::borrow::Cow;
use std::fmt;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use http::header::InvalidHeaderValue;
use http::HeaderValue;
use zeroize::Zeroize as _;

/// An access token.
///
/// `Debug` never shows the value, and owned values are zeroed on drop. Use
/// [`Secret::revealed`] where the raw value has to leave the process.
#[derive(Clone)]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// The raw value.
    pub fn revealed(&self) -> &str {
        &self.0
    }

    /// Standard base64 of the value, as a new secret.
    pub fn base64(&self) -> Secret {
        Secret(BASE64_STANDARD.encode(self.revealed()).into())
    }

    /// A sensitive `Bearer <value>` header value.
    pub fn bearer(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut header = HeaderValue::try_from(format!("Bearer {}", self.revealed()))?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(value) = &mut self.0 {
            value.zeroize();
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(Cow::Borrowed(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_the_value() {
        let token = Secret::from("ghp_secret");
        assert_eq!(format!("{token:?}"), "Secret(****)");
        assert_eq!(token.revealed(), "ghp_secret");
    }

    #[test]
    fn registry_encoding() {
        let encoded = Secret::from(String::from("token")).base64();
        assert_eq!(encoded.revealed(), "dG9rZW4=");
        assert_eq!(format!("{encoded:?}"), "Secret(****)");
    }

    #[test]
    fn bearer_header() {
        let header = Secret::from("abc").bearer().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Bearer abc");
        assert!(Secret::from("line\nbreak").bearer().is_err());
    }
}
