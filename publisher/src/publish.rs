//! Publishing a package, and its attestation, to the registry.

use std::fmt;

use api_client::Secret;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ghcr::digest::{hex_part, referrer_tag, sha256_digest};
use ghcr::manifest::{keys, EMPTY_CONFIG_BYTES, EMPTY_CONFIG_DIGEST};
use ghcr::{
    ActionPackage, Blobs, FileMetadata, Manifest as _, ReferrerIndex, RegistryClient,
    SigstoreAttestation,
};

use crate::archive::Archives;
use crate::attestation::{Attestation, AttestationRequest, Attester};
use crate::outputs::Outputs;
use crate::Error;

/// The package being published.
#[derive(Debug, Clone)]
pub struct Package<'a> {
    /// `owner/name` of the source repository.
    pub repository: &'a str,

    /// Numeric id of the source repository.
    pub repository_id: &'a str,

    /// Numeric id of the repository owner.
    pub owner_id: &'a str,

    /// Commit the package was built from.
    pub source_commit: &'a str,

    /// Semantic version, used as the package tag.
    pub version: &'a str,

    /// The archived action.
    pub archives: &'a Archives,

    /// Creation time for every manifest; now if unset.
    pub created: Option<DateTime<Utc>>,
}

/// Sequences the uploads for one package.
///
/// The attestation manifest and referrer index go up before the package is
/// tagged, so the attestation is discoverable as soon as the tag is.
pub struct Publisher {
    registry: RegistryClient,
    token: Secret,
    attester: Option<Box<dyn Attester>>,
    enterprise: bool,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("registry", &self.registry)
            .field("attester", &self.attester.is_some())
            .field("enterprise", &self.enterprise)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Publish through `registry`. `token` is handed to the attester.
    pub fn new(registry: RegistryClient, token: Secret) -> Self {
        Self {
            registry,
            token,
            attester: None,
            enterprise: false,
        }
    }

    /// Attest packages with `attester`.
    pub fn with_attester<A: Attester + 'static>(mut self, attester: A) -> Self {
        self.attester = Some(Box::new(attester));
        self
    }

    /// Attestations cannot be stored on Github Enterprise Server, so none are made there.
    pub fn enterprise(mut self, enterprise: bool) -> Self {
        self.enterprise = enterprise;
        self
    }

    /// Publish `package`. Any failure aborts the remaining steps.
    #[tracing::instrument(skip_all, fields(repository = %package.repository, version = %package.version))]
    pub async fn publish(&self, package: &Package<'_>) -> Result<Outputs, Error> {
        let created = package.created.unwrap_or_else(Utc::now);

        let manifest = ActionPackage {
            tar: &package.archives.tar,
            zip: &package.archives.zip,
            repository: package.repository,
            repository_id: package.repository_id,
            owner_id: package.owner_id,
            source_commit: package.source_commit,
            version: package.version,
            created: Some(created),
        }
        .manifest();
        let manifest_json = serde_json::to_string(&manifest)?;
        let digest = sha256_digest(manifest_json.as_bytes());
        let size = manifest_json.len() as u64;
        tracing::info!(%digest, size, "Built package manifest");

        let attestation = self.attest(package.repository, &digest).await?;
        if let Some(attestation) = &attestation {
            self.publish_attestation(package.repository, attestation, &digest, size, created)
                .await?;
        }

        let blobs = Blobs::from([
            (
                EMPTY_CONFIG_DIGEST.to_owned(),
                Bytes::from_static(EMPTY_CONFIG_BYTES),
            ),
            (package.archives.tar.sha256.clone(), read(&package.archives.tar).await?),
            (package.archives.zip.sha256.clone(), read(&package.archives.zip).await?),
        ]);
        let published = self
            .registry
            .upload_image_manifest(package.repository, &manifest, &blobs, Some(package.version))
            .await?;
        tracing::info!(digest = %published, "Published package");

        Ok(Outputs {
            package_url: self.package_url(package.repository, package.version)?,
            package_manifest: manifest_json,
            package_manifest_sha: published,
            attestation_id: attestation.and_then(|attestation| attestation.attestation_id),
        })
    }

    async fn attest(&self, repository: &str, digest: &str) -> Result<Option<Attestation>, Error> {
        if self.enterprise {
            tracing::info!("Skipping attestation on Github Enterprise Server.");
            return Ok(None);
        }

        let Some(attester) = &self.attester else {
            tracing::info!("No attester configured, publishing without an attestation.");
            return Ok(None);
        };

        let host = self.registry.registry().host_str().unwrap_or_default();
        let request = AttestationRequest {
            subject_name: format!("{host}/{repository}"),
            subject_digest: hex_part(digest).to_owned(),
            token: self.token.clone(),
            skip_write: true,
        };

        let attestation = attester.attest(&request).await?;
        tracing::info!(
            media_type = %attestation.media_type,
            predicate_type = %attestation.predicate_type,
            "Received attestation bundle"
        );
        Ok(Some(attestation))
    }

    async fn publish_attestation(
        &self,
        repository: &str,
        attestation: &Attestation,
        subject_digest: &str,
        subject_size: u64,
        created: DateTime<Utc>,
    ) -> Result<(), Error> {
        let bundle_digest = sha256_digest(&attestation.bundle);
        let manifest = SigstoreAttestation {
            bundle_size: attestation.bundle.len() as u64,
            bundle_digest: &bundle_digest,
            bundle_media_type: &attestation.media_type,
            predicate_type: &attestation.predicate_type,
            subject_size,
            subject_digest,
            created: Some(created),
        }
        .manifest();

        let blobs = Blobs::from([
            (
                EMPTY_CONFIG_DIGEST.to_owned(),
                Bytes::from_static(EMPTY_CONFIG_BYTES),
            ),
            (bundle_digest.clone(), attestation.bundle.clone()),
        ]);
        let attestation_digest = self
            .registry
            .upload_image_manifest(repository, &manifest, &blobs, None)
            .await?;
        tracing::info!(digest = %attestation_digest, "Published attestation");

        let attestation_created = manifest
            .annotations
            .get(keys::CREATED)
            .unwrap_or_default()
            .to_owned();
        let index = ReferrerIndex {
            attestation_digest: &attestation_digest,
            attestation_size: manifest.size_in_bytes()?,
            attestation_created: &attestation_created,
            bundle_media_type: &attestation.media_type,
            predicate_type: &attestation.predicate_type,
            created: Some(created),
        }
        .manifest();

        let tag = referrer_tag(subject_digest);
        let index_digest = self
            .registry
            .upload_index_manifest(repository, &index, &tag)
            .await?;
        tracing::info!(digest = %index_digest, %tag, "Published referrer index");
        Ok(())
    }

    fn package_url(&self, repository: &str, version: &str) -> Result<String, Error> {
        let reference = format!("{repository}:{version}");
        self.registry
            .registry()
            .join(&reference)
            .map(String::from)
            .map_err(|source| Error::InvalidUrl {
                name: "package URL",
                value: reference,
                source,
            })
    }
}

async fn read(file: &FileMetadata) -> Result<Bytes, Error> {
    tokio::fs::read(&file.path)
        .await
        .map(Bytes::from)
        .map_err(Error::io(format!("Reading {}", file.path)))
}
