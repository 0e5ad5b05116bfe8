//! OCI manifests for GitHub Actions packages and their attestations.
//!
//! Digests are computed over the compact JSON encoding of these types, so the
//! field order of every struct here is part of the wire contract. Reordering a
//! field changes every published digest.

use std::fmt;

use camino::Utf8PathBuf;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest;

/// Media types understood by the registry client.
pub mod media_types {
    /// An OCI image manifest.
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

    /// An OCI image index.
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    /// The empty `{}` config blob.
    pub const OCI_EMPTY: &str = "application/vnd.oci.empty.v1+json";

    /// Artifact type of an Actions package manifest.
    pub const ACTIONS_PACKAGE: &str = "application/vnd.github.actions.package.v1+json";

    /// Gzipped tarball of the action.
    pub const ACTIONS_TAR_LAYER: &str = "application/vnd.github.actions.package.layer.v1.tar+gzip";

    /// Zip archive of the action.
    pub const ACTIONS_ZIP_LAYER: &str = "application/vnd.github.actions.package.layer.v1.zip";

    /// A sigstore bundle, version 0.3.
    pub const SIGSTORE_BUNDLE_V03: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

    /// Whether a blob of `media_type` may be uploaded.
    pub fn is_known_blob(media_type: &str) -> bool {
        matches!(
            media_type,
            OCI_EMPTY | ACTIONS_TAR_LAYER | ACTIONS_ZIP_LAYER | SIGSTORE_BUNDLE_V03
        )
    }
}

/// Annotation keys.
pub mod keys {
    #![allow(missing_docs)]

    pub const CREATED: &str = "org.opencontainers.image.created";
    pub const TITLE: &str = "org.opencontainers.image.title";
    pub const TAR_DIGEST: &str = "action.tar.gz.digest";
    pub const ZIP_DIGEST: &str = "action.zip.digest";
    pub const PACKAGE_TYPE: &str = "com.github.package.type";
    pub const PACKAGE_VERSION: &str = "com.github.package.version";
    pub const SOURCE_REPO_ID: &str = "com.github.source.repo.id";
    pub const SOURCE_REPO_OWNER_ID: &str = "com.github.source.repo.owner.id";
    pub const SOURCE_COMMIT: &str = "com.github.source.commit";
    pub const BUNDLE_CONTENT: &str = "dev.sigstore.bundle.content";
    pub const BUNDLE_PREDICATE_TYPE: &str = "dev.sigstore.bundle.predicateType";
}

const PACKAGE_TYPE_PACKAGE: &str = "actions_oci_pkg";
const PACKAGE_TYPE_ATTESTATION: &str = "actions_oci_pkg_attestation";
const PACKAGE_TYPE_REFERRER: &str = "actions_oci_pkg_referrer_tag";
const BUNDLE_CONTENT_DSSE: &str = "dsse-envelope";

/// Bytes of the empty config blob.
pub const EMPTY_CONFIG_BYTES: &[u8] = b"{}";

/// Digest of [`EMPTY_CONFIG_BYTES`].
pub const EMPTY_CONFIG_DIGEST: &str =
    "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// Annotations, serialized as a JSON object in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations(Vec<(String, String)>);

impl Annotations {
    /// No annotations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder form of [`Annotations::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// The value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no annotations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Annotations {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut annotations = Annotations::new();
        for (key, value) in iter {
            annotations.insert(key, value);
        }
        annotations
    }
}

impl Serialize for Annotations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct AnnotationsVisitor;

impl<'de> Visitor<'de> for AnnotationsVisitor {
    type Value = Annotations;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of string annotations")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut annotations = Annotations::new();
        while let Some((key, value)) = access.next_entry::<String, String>()? {
            annotations.insert(key, value);
        }
        Ok(annotations)
    }
}

impl<'de> Deserialize<'de> for Annotations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AnnotationsVisitor)
    }
}

/// A content descriptor: a reference to a blob or manifest by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,

    /// Artifact type, for descriptors of artifact manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Size of the content in bytes.
    pub size: u64,

    /// `sha256:<hex>` digest of the content.
    pub digest: String,

    /// Descriptor annotations. `None` omits the key entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Descriptor {
    /// A plain descriptor with no artifact type or annotations.
    pub fn new(media_type: impl Into<String>, size: u64, digest: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            artifact_type: None,
            size,
            digest: digest.into(),
            annotations: None,
        }
    }

    /// The descriptor of the empty `{}` config blob.
    pub fn empty_config() -> Self {
        Self::new(
            media_types::OCI_EMPTY,
            EMPTY_CONFIG_BYTES.len() as u64,
            EMPTY_CONFIG_DIGEST,
        )
    }
}

/// An OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2.
    pub schema_version: u32,

    /// Always [`media_types::OCI_MANIFEST`].
    pub media_type: String,

    /// The kind of artifact this manifest describes.
    pub artifact_type: String,

    /// Config blob.
    pub config: Descriptor,

    /// Layer blobs.
    pub layers: Vec<Descriptor>,

    /// The manifest this one refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Manifest annotations.
    pub annotations: Annotations,
}

/// An OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    /// Always 2.
    pub schema_version: u32,

    /// Always [`media_types::OCI_INDEX`].
    pub media_type: String,

    /// Manifests referenced by this index.
    pub manifests: Vec<Descriptor>,

    /// Index annotations.
    pub annotations: Annotations,
}

/// A manifest which can be uploaded and addressed by digest.
pub trait Manifest: Serialize {
    /// The media type sent as `Content-Type` when uploading.
    fn media_type(&self) -> &str;

    /// Compact JSON encoding. This is the exact byte sequence uploaded.
    fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Digest of [`Manifest::to_json_bytes`].
    fn sha256_digest(&self) -> Result<String, serde_json::Error> {
        Ok(digest::sha256_digest(&self.to_json_bytes()?))
    }

    /// Length of [`Manifest::to_json_bytes`].
    fn size_in_bytes(&self) -> Result<u64, serde_json::Error> {
        Ok(self.to_json_bytes()?.len() as u64)
    }
}

impl Manifest for ImageManifest {
    fn media_type(&self) -> &str {
        &self.media_type
    }
}

impl Manifest for IndexManifest {
    fn media_type(&self) -> &str {
        &self.media_type
    }
}

/// A file produced for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Location on disk.
    pub path: Utf8PathBuf,

    /// Size in bytes.
    pub size: u64,

    /// `sha256:<hex>` digest of the file contents.
    pub sha256: String,
}

fn timestamp(created: Option<DateTime<Utc>>) -> String {
    created
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `owner/name` becomes `owner-name`. Only the first `/` is replaced.
fn sanitize_repository(repository: &str) -> String {
    repository.replacen('/', "-", 1)
}

fn layer(media_type: &str, file: &FileMetadata, title: String) -> Descriptor {
    Descriptor {
        annotations: Some(Annotations::new().with(keys::TITLE, title)),
        ..Descriptor::new(media_type, file.size, file.sha256.clone())
    }
}

/// Inputs for the manifest of an Actions package.
#[derive(Debug, Clone)]
pub struct ActionPackage<'a> {
    /// The gzipped tarball of the action.
    pub tar: &'a FileMetadata,

    /// The zip archive of the action.
    pub zip: &'a FileMetadata,

    /// `owner/name` of the source repository.
    pub repository: &'a str,

    /// Numeric id of the source repository.
    pub repository_id: &'a str,

    /// Numeric id of the repository owner.
    pub owner_id: &'a str,

    /// Commit the package was built from.
    pub source_commit: &'a str,

    /// Semantic version of the package.
    pub version: &'a str,

    /// Creation time; now if unset.
    pub created: Option<DateTime<Utc>>,
}

impl ActionPackage<'_> {
    /// Build the package manifest.
    ///
    /// The layers are the empty config, the tarball and the zip, in that order.
    pub fn manifest(&self) -> ImageManifest {
        let sanitized = sanitize_repository(self.repository);

        let tar = layer(
            media_types::ACTIONS_TAR_LAYER,
            self.tar,
            format!("{sanitized}_{}.tar.gz", self.version),
        );
        let zip = layer(
            media_types::ACTIONS_ZIP_LAYER,
            self.zip,
            format!("{sanitized}_{}.zip", self.version),
        );

        let annotations = Annotations::new()
            .with(keys::CREATED, timestamp(self.created))
            .with(keys::TAR_DIGEST, self.tar.sha256.clone())
            .with(keys::ZIP_DIGEST, self.zip.sha256.clone())
            .with(keys::PACKAGE_TYPE, PACKAGE_TYPE_PACKAGE)
            .with(keys::PACKAGE_VERSION, self.version)
            .with(keys::SOURCE_REPO_ID, self.repository_id)
            .with(keys::SOURCE_REPO_OWNER_ID, self.owner_id)
            .with(keys::SOURCE_COMMIT, self.source_commit);

        ImageManifest {
            schema_version: 2,
            media_type: media_types::OCI_MANIFEST.to_owned(),
            artifact_type: media_types::ACTIONS_PACKAGE.to_owned(),
            config: Descriptor::empty_config(),
            layers: vec![Descriptor::empty_config(), tar, zip],
            subject: None,
            annotations,
        }
    }
}

/// Inputs for the manifest wrapping a sigstore bundle.
#[derive(Debug, Clone)]
pub struct SigstoreAttestation<'a> {
    /// Size of the serialized bundle.
    pub bundle_size: u64,

    /// Digest of the serialized bundle.
    pub bundle_digest: &'a str,

    /// Media type declared by the bundle.
    pub bundle_media_type: &'a str,

    /// In-toto predicate type of the attested statement.
    pub predicate_type: &'a str,

    /// Size of the attested package manifest.
    pub subject_size: u64,

    /// Digest of the attested package manifest.
    pub subject_digest: &'a str,

    /// Creation time; now if unset.
    pub created: Option<DateTime<Utc>>,
}

impl SigstoreAttestation<'_> {
    /// Build the attestation manifest, with the package manifest as its subject.
    pub fn manifest(&self) -> ImageManifest {
        let annotations = Annotations::new()
            .with(keys::BUNDLE_CONTENT, BUNDLE_CONTENT_DSSE)
            .with(keys::BUNDLE_PREDICATE_TYPE, self.predicate_type)
            .with(keys::PACKAGE_TYPE, PACKAGE_TYPE_ATTESTATION)
            .with(keys::CREATED, timestamp(self.created));

        ImageManifest {
            schema_version: 2,
            media_type: media_types::OCI_MANIFEST.to_owned(),
            artifact_type: self.bundle_media_type.to_owned(),
            config: Descriptor::empty_config(),
            layers: vec![Descriptor::new(
                self.bundle_media_type,
                self.bundle_size,
                self.bundle_digest,
            )],
            subject: Some(Descriptor::new(
                media_types::OCI_MANIFEST,
                self.subject_size,
                self.subject_digest,
            )),
            annotations,
        }
    }
}

/// Inputs for the index published under a package's referrer tag.
#[derive(Debug, Clone)]
pub struct ReferrerIndex<'a> {
    /// Digest of the attestation manifest.
    pub attestation_digest: &'a str,

    /// Size of the attestation manifest.
    pub attestation_size: u64,

    /// Creation time recorded on the attestation manifest.
    pub attestation_created: &'a str,

    /// Media type of the sigstore bundle.
    pub bundle_media_type: &'a str,

    /// In-toto predicate type of the attested statement.
    pub predicate_type: &'a str,

    /// Creation time of the index; now if unset.
    pub created: Option<DateTime<Utc>>,
}

impl ReferrerIndex<'_> {
    /// Build the referrer index.
    pub fn manifest(&self) -> IndexManifest {
        let attestation = Descriptor {
            media_type: media_types::OCI_MANIFEST.to_owned(),
            artifact_type: Some(self.bundle_media_type.to_owned()),
            size: self.attestation_size,
            digest: self.attestation_digest.to_owned(),
            annotations: Some(
                Annotations::new()
                    .with(keys::PACKAGE_TYPE, PACKAGE_TYPE_ATTESTATION)
                    .with(keys::CREATED, self.attestation_created)
                    .with(keys::BUNDLE_CONTENT, BUNDLE_CONTENT_DSSE)
                    .with(keys::BUNDLE_PREDICATE_TYPE, self.predicate_type),
            ),
        };

        IndexManifest {
            schema_version: 2,
            media_type: media_types::OCI_INDEX.to_owned(),
            manifests: vec![attestation],
            annotations: Annotations::new()
                .with(keys::PACKAGE_TYPE, PACKAGE_TYPE_REFERRER)
                .with(keys::CREATED, timestamp(self.created)),
        }
    }
}
