//! Conversions between `url` and `http` URIs, and joining endpoint paths.

use camino::Utf8Path;
use http::uri::PathAndQuery;
use http::Uri;
use thiserror::Error;
use url::Url;

/// A [`Url`] which cannot be used as an `http` URI.
#[derive(Debug, Error)]
pub enum ParseUriError {
    /// URLs like `mailto:` have no authority or path to join endpoints onto.
    #[error("cannot be a base URL: {0}")]
    CannotBeABase(Url),

    /// `url` accepted the URL but `http` did not.
    #[error("invalid URI: {0}")]
    Invalid(#[from] http::uri::InvalidUri),
}

/// Conversion into an `http` [`Uri`].
pub trait IntoUri {
    /// Convert, failing if the result could not serve as a request base.
    fn into_uri(self) -> Result<Uri, ParseUriError>;
}

impl IntoUri for &Url {
    fn into_uri(self) -> Result<Uri, ParseUriError> {
        if self.cannot_be_a_base() {
            return Err(ParseUriError::CannotBeABase(self.clone()));
        }
        Ok(self.as_str().parse()?)
    }
}

impl IntoUri for Url {
    fn into_uri(self) -> Result<Uri, ParseUriError> {
        (&self).into_uri()
    }
}

/// Joining endpoint paths onto a base URI.
pub trait UriExtension {
    /// Join `path` onto the path of this URI, dropping any query.
    ///
    /// Relative paths extend the existing path, absolute paths replace it.
    fn join<P: AsRef<str>>(&self, path: P) -> Result<Uri, http::Error>;
}

impl UriExtension for Uri {
    fn join<P: AsRef<str>>(&self, path: P) -> Result<Uri, http::Error> {
        let mut parts = self.clone().into_parts();
        let base = parts
            .path_and_query
            .as_ref()
            .map_or("/", PathAndQuery::path);

        let joined = Utf8Path::new(base).join(path.as_ref());
        parts.path_and_query = Some(PathAndQuery::try_from(joined.as_str())?);
        Ok(Uri::from_parts(parts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(base: &str, path: &str) -> String {
        base.parse::<Uri>().unwrap().join(path).unwrap().to_string()
    }

    #[test]
    fn relative_and_absolute_paths() {
        assert_eq!(join("http://example.com", "foo"), "http://example.com/foo");
        assert_eq!(join("http://example.com/bar", "foo"), "http://example.com/bar/foo");
        assert_eq!(join("http://example.com/bar/", "foo"), "http://example.com/bar/foo");
        assert_eq!(join("http://example.com/bar", "/foo"), "http://example.com/foo");
        assert_eq!(join("http://example.com/bar", ""), "http://example.com/bar/");
    }

    #[test]
    fn registry_endpoints() {
        assert_eq!(
            join("https://ghcr.io", "v2/org/repo/blobs/sha256:abc"),
            "https://ghcr.io/v2/org/repo/blobs/sha256:abc"
        );
        assert_eq!(
            join("https://ghcr.io/?q=1", "v2/org/repo/blobs/uploads/"),
            "https://ghcr.io/v2/org/repo/blobs/uploads/"
        );
        assert_eq!(
            join("https://api.github.com/", "repos/org/repo"),
            "https://api.github.com/repos/org/repo"
        );
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let uri = "http://example.com".parse::<Uri>().unwrap();
        assert!(uri.join("spaces are not allowed").is_err());
    }

    #[test]
    fn url_conversion() {
        let url = Url::parse("https://ghcr.io/").unwrap();
        assert_eq!(url.into_uri().unwrap().to_string(), "https://ghcr.io/");

        let url = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(url.into_uri(), Err(ParseUriError::CannotBeABase(_))));
    }
}
