use std::collections::HashMap;

use api_client::response::{Response, ResponseExt as _};
use api_client::uri::IntoUri as _;
use api_client::{ApiClient, BearerAuth, RequestBuilder, RetryPolicy, Secret};
use bytes::Bytes;
use futures::future::try_join_all;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use tracing::Instrument as _;
use url::Url;

use crate::manifest::{media_types, Descriptor, ImageManifest, IndexManifest, Manifest};
use crate::{digest, Error};

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
const OCTET_STREAM: &str = "application/octet-stream";

/// Blob contents keyed by digest.
pub type Blobs = HashMap<String, Bytes>;

/// Client for pushing blobs and manifests to an OCI registry.
///
/// Every request goes through the configured [`RetryPolicy`], and carries
/// `Authorization: Bearer <base64 token>`.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: ApiClient<BearerAuth>,
    registry: Url,
    retry: RetryPolicy,
    debug: bool,
}

impl RegistryClient {
    /// Connect to `registry` over the network.
    pub fn new(registry: Url, token: impl Into<Secret>) -> Result<Self, Error> {
        let auth = BearerAuth::base64(token).map_err(Error::Token)?;
        let registry = registry_base(registry);
        let base = (&registry).into_uri()?;
        Ok(Self::from_parts(ApiClient::new(base, auth), registry))
    }

    /// Send requests through `inner` instead of the network.
    pub fn with_inner_service<S>(
        registry: Url,
        token: impl Into<Secret>,
        inner: S,
    ) -> Result<Self, Error>
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let auth = BearerAuth::base64(token).map_err(Error::Token)?;
        let registry = registry_base(registry);
        let base = (&registry).into_uri()?;
        Ok(Self::from_parts(
            ApiClient::new_with_inner_service(base, auth, inner),
            registry,
        ))
    }

    fn from_parts(client: ApiClient<BearerAuth>, registry: Url) -> Self {
        Self {
            client,
            registry,
            retry: RetryPolicy::default(),
            debug: false,
        }
    }

    /// Use `retry` for every request.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Log every response's method, URL, status and headers.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The registry base URL. Its path always ends in `/`.
    pub fn registry(&self) -> &Url {
        &self.registry
    }

    async fn send<F>(&self, build: F) -> Result<Response, api_client::Error>
    where
        F: Fn() -> RequestBuilder<BearerAuth>,
    {
        self.retry
            .execute(|| {
                let request = build();
                async move {
                    let outcome = request.send().await;
                    self.trace(&outcome);
                    outcome
                }
            })
            .await
    }

    fn trace(&self, outcome: &Result<Response, api_client::Error>) {
        match (outcome, self.debug) {
            (Ok(response), true) => tracing::debug!(
                method = %response.method(),
                url = %response.uri(),
                status = %response.status(),
                headers = ?response.headers(),
                "registry response"
            ),
            (Ok(response), false) => tracing::trace!(
                method = %response.method(),
                url = %response.uri(),
                status = %response.status(),
                "registry response"
            ),
            (Err(error), true) => tracing::debug!(%error, "registry request failed"),
            (Err(error), false) => tracing::trace!(%error, "registry request failed"),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        self.registry
            .join(endpoint)
            .map(String::from)
            .unwrap_or_else(|_| endpoint.to_owned())
    }

    /// Check whether the registry already holds the blob `digest`.
    pub async fn check_blob_exists(&self, repository: &str, digest: &str) -> Result<bool, Error> {
        let endpoint = format!("v2/{repository}/blobs/{digest}");
        let description = format!("check blob ({digest}) exists");

        let response = self
            .send(|| self.client.head(&endpoint))
            .await
            .map_err(Error::request(description.clone()))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Error::from_response(description, response).await),
        }
    }

    /// Upload one blob: open an upload session, then PUT the bytes to it.
    pub async fn upload_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        bytes: Bytes,
    ) -> Result<(), Error> {
        let digest = descriptor.digest.as_str();
        let endpoint = format!("v2/{repository}/blobs/uploads/");

        let initiate = self
            .send(|| self.client.post(&endpoint))
            .await
            .map_err(Error::request("initiate layer upload"))?;
        if initiate.status() != StatusCode::ACCEPTED {
            return Err(Error::from_response("initiate layer upload", initiate).await);
        }

        let location = initiate
            .header(LOCATION)
            .ok_or_else(|| Error::MissingLocation {
                url: self.url(&endpoint),
                digest: digest.to_owned(),
            })?;
        let upload = self.upload_url(&endpoint, location, digest)?.into_uri()?;

        let description = format!("layer ({digest}) upload");
        let size = descriptor.size.to_string();
        let response = self
            .send(|| {
                self.client
                    .request(Method::PUT, upload.clone())
                    .header(CONTENT_TYPE, OCTET_STREAM)
                    .header(CONTENT_LENGTH, size.as_str())
                    .body(bytes.clone())
            })
            .await
            .map_err(Error::request(description.clone()))?;

        if response.status() != StatusCode::CREATED {
            return Err(Error::from_response(description, response).await);
        }

        Ok(())
    }

    /// Resolve an upload session location against the request which returned
    /// it, and pin the blob digest onto it.
    fn upload_url(&self, endpoint: &str, location: &str, digest: &str) -> Result<Url, Error> {
        let mut url = self
            .registry
            .join(endpoint)
            .and_then(|initiated| initiated.join(location))
            .map_err(|source| Error::InvalidLocation {
                location: location.to_owned(),
                source,
            })?;
        url.query_pairs_mut().append_pair("digest", digest);
        Ok(url)
    }

    /// PUT a serialized manifest under `reference`, returning the digest the
    /// registry assigned to it.
    pub async fn upload_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        manifest: Bytes,
    ) -> Result<String, Error> {
        let endpoint = format!("v2/{repository}/manifests/{reference}");
        tracing::info!("Uploading manifest to {}.", self.url(&endpoint));

        let response = self
            .send(|| {
                self.client
                    .put(&endpoint)
                    .header(CONTENT_TYPE, media_type)
                    .body(manifest.clone())
            })
            .await
            .map_err(Error::request("manifest upload"))?;

        if response.status() != StatusCode::CREATED {
            return Err(Error::from_response("manifest upload", response).await);
        }

        response
            .header(DOCKER_CONTENT_DIGEST)
            .map(str::to_owned)
            .ok_or_else(|| Error::MissingDigestHeader {
                reference: reference.to_owned(),
            })
    }

    /// Upload an image manifest and every blob it references.
    ///
    /// All referenced blobs are validated before any request is sent. Blobs
    /// shared between config and layers are uploaded once, and blobs already
    /// in the registry are skipped. The manifest goes up under `tag`, or under
    /// its own digest when there is no tag. Returns the manifest digest.
    pub async fn upload_image_manifest(
        &self,
        repository: &str,
        manifest: &ImageManifest,
        blobs: &Blobs,
        tag: Option<&str>,
    ) -> Result<String, Error> {
        let encoded = Bytes::from(manifest.to_json_bytes()?);
        let digest = digest::sha256_digest(&encoded);

        let uploads = referenced_blobs(manifest, blobs)?;
        tracing::info!(
            "Uploading {} blobs for manifest {digest} to {repository}.",
            uploads.len()
        );

        try_join_all(uploads.into_iter().map(|(descriptor, bytes)| {
            let span = tracing::info_span!("blob", digest = %descriptor.digest);
            self.push_blob(repository, descriptor, bytes).instrument(span)
        }))
        .await?;

        let reference = tag.unwrap_or(&digest);
        let published = self
            .upload_manifest(repository, reference, manifest.media_type(), encoded)
            .await?;
        verify_digest(digest, published)
    }

    /// Upload an index manifest under `tag`. Returns the manifest digest.
    pub async fn upload_index_manifest(
        &self,
        repository: &str,
        manifest: &IndexManifest,
        tag: &str,
    ) -> Result<String, Error> {
        let encoded = Bytes::from(manifest.to_json_bytes()?);
        let digest = digest::sha256_digest(&encoded);

        let published = self
            .upload_manifest(repository, tag, manifest.media_type(), encoded)
            .await?;
        verify_digest(digest, published)
    }

    async fn push_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        bytes: Bytes,
    ) -> Result<(), Error> {
        if self
            .check_blob_exists(repository, &descriptor.digest)
            .await?
        {
            tracing::info!("Layer {} already exists. Skipping upload.", descriptor.digest);
            return Ok(());
        }

        tracing::info!("Uploading layer {}.", descriptor.digest);
        self.upload_blob(repository, descriptor, bytes).await?;
        tracing::info!("Uploaded layer {}.", descriptor.digest);
        Ok(())
    }
}

/// Registry URLs name a directory, so endpoints resolve beneath their path.
fn registry_base(mut registry: Url) -> Url {
    if !registry.path().ends_with('/') {
        let path = format!("{}/", registry.path());
        registry.set_path(&path);
    }
    registry
}

/// Config and layers of `manifest`, de-duplicated by digest and paired with
/// their contents.
fn referenced_blobs<'m>(
    manifest: &'m ImageManifest,
    blobs: &Blobs,
) -> Result<Vec<(&'m Descriptor, Bytes)>, Error> {
    let mut selected: Vec<(&Descriptor, Bytes)> = Vec::new();

    for descriptor in manifest.layers.iter().chain([&manifest.config]) {
        if !media_types::is_known_blob(&descriptor.media_type) {
            return Err(Error::UnknownMediaType(descriptor.media_type.clone()));
        }

        if selected
            .iter()
            .any(|(chosen, _)| chosen.digest == descriptor.digest)
        {
            continue;
        }

        let bytes = blobs
            .get(&descriptor.digest)
            .ok_or_else(|| Error::BlobNotFound(descriptor.digest.clone()))?;
        if bytes.len() as u64 != descriptor.size {
            return Err(Error::SizeMismatch {
                digest: descriptor.digest.clone(),
                expected: descriptor.size,
                actual: bytes.len() as u64,
            });
        }

        selected.push((descriptor, bytes.clone()));
    }

    Ok(selected)
}

fn verify_digest(expected: String, actual: String) -> Result<String, Error> {
    if expected == actual {
        Ok(expected)
    } else {
        Err(Error::DigestMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Annotations, EMPTY_CONFIG_BYTES};

    fn manifest(layers: Vec<Descriptor>) -> ImageManifest {
        ImageManifest {
            schema_version: 2,
            media_type: media_types::OCI_MANIFEST.into(),
            artifact_type: media_types::ACTIONS_PACKAGE.into(),
            config: Descriptor::empty_config(),
            layers,
            subject: None,
            annotations: Annotations::new(),
        }
    }

    fn blobs(entries: &[(&str, &'static [u8])]) -> Blobs {
        entries
            .iter()
            .map(|(digest, bytes)| (digest.to_string(), Bytes::from_static(bytes)))
            .collect()
    }

    #[test]
    fn endpoints_resolve_beneath_the_registry_path() {
        let client = RegistryClient::with_inner_service(
            Url::parse("https://registry.example/mirror").unwrap(),
            "token",
            api_client::mock::MockService::new(),
        )
        .unwrap();
        assert_eq!(client.registry().as_str(), "https://registry.example/mirror/");

        let endpoint = "v2/org/repo/blobs/uploads/";
        assert_eq!(
            client.url(endpoint),
            "https://registry.example/mirror/v2/org/repo/blobs/uploads/"
        );

        for (location, expected) in [
            (
                "session",
                "https://registry.example/mirror/v2/org/repo/blobs/uploads/session?digest=sha256%3Aabc",
            ),
            (
                "/mirror/v2/org/repo/blobs/uploads/other?_state=x",
                "https://registry.example/mirror/v2/org/repo/blobs/uploads/other?_state=x&digest=sha256%3Aabc",
            ),
        ] {
            let url = client.upload_url(endpoint, location, "sha256:abc").unwrap();
            assert_eq!(url.as_str(), expected, "{location}");
        }
    }

    #[test]
    fn shared_blobs_are_selected_once() {
        let manifest = manifest(vec![
            Descriptor::empty_config(),
            Descriptor::new(media_types::ACTIONS_TAR_LAYER, 3, "sha256:tar"),
        ]);
        let blobs = blobs(&[
            (crate::manifest::EMPTY_CONFIG_DIGEST, EMPTY_CONFIG_BYTES),
            ("sha256:tar", b"tar"),
        ]);

        let selected = referenced_blobs(&manifest, &blobs).unwrap();
        let digests: Vec<_> = selected.iter().map(|(d, _)| d.digest.as_str()).collect();
        assert_eq!(digests, [crate::manifest::EMPTY_CONFIG_DIGEST, "sha256:tar"]);
    }

    #[test]
    fn validation_failures() {
        let blobs = blobs(&[(crate::manifest::EMPTY_CONFIG_DIGEST, EMPTY_CONFIG_BYTES)]);

        let unknown = manifest(vec![Descriptor::new("application/json", 2, "sha256:x")]);
        assert!(matches!(
            referenced_blobs(&unknown, &blobs),
            Err(Error::UnknownMediaType(mt)) if mt == "application/json"
        ));

        let missing = manifest(vec![Descriptor::new(
            media_types::ACTIONS_ZIP_LAYER,
            3,
            "sha256:zip",
        )]);
        assert!(matches!(
            referenced_blobs(&missing, &blobs),
            Err(Error::BlobNotFound(digest)) if digest == "sha256:zip"
        ));

        let mut wrong_size = Descriptor::empty_config();
        wrong_size.size = 5;
        let wrong_size = manifest(vec![wrong_size]);
        assert!(matches!(
            referenced_blobs(&wrong_size, &blobs),
            Err(Error::SizeMismatch { expected: 5, actual: 2, .. })
        ));
    }

    #[test]
    fn upload_urls_carry_the_digest() {
        let client = RegistryClient::with_inner_service(
            Url::parse("https://ghcr.io/").unwrap(),
            "token",
            api_client::mock::MockService::new(),
        )
        .unwrap();

        let relative = client
            .upload_url(
                "v2/org/repo/blobs/uploads/",
                "/v2/org/repo/blobs/uploads/abc",
                "sha256:123",
            )
            .unwrap();
        assert_eq!(
            relative.as_str(),
            "https://ghcr.io/v2/org/repo/blobs/uploads/abc?digest=sha256%3A123"
        );

        let absolute = client
            .upload_url(
                "v2/org/repo/blobs/uploads/",
                "https://uploads.example/session?state=x",
                "sha256:123",
            )
            .unwrap();
        assert_eq!(
            absolute.as_str(),
            "https://uploads.example/session?state=x&digest=sha256%3A123"
        );
    }

    #[test]
    fn digests_must_match() {
        assert_eq!(
            verify_digest("sha256:a".into(), "sha256:a".into()).unwrap(),
            "sha256:a"
        );
        assert_eq!(
            verify_digest("sha256:a".into(), "sha256:b".into())
                .unwrap_err()
                .to_string(),
            "Digest mismatch. Expected sha256:a, got sha256:b."
        );
    }
}
