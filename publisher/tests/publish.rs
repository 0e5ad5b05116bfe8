use std::sync::Arc;
use std::time::Duration;

use api_client::mock::{MockResponse, MockService, ANY_PATH};
use api_client::RetryPolicy;
use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8Path;
use chrono::{DateTime, TimeZone as _, Utc};
use ghcr::digest::{hex_part, referrer_tag, sha256_digest};
use ghcr::manifest::{keys, media_types};
use ghcr::{ActionPackage, Manifest as _, ReferrerIndex, RegistryClient, SigstoreAttestation};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use publisher::archive::file_metadata;
use publisher::{
    Archives, Attestation, AttestationError, AttestationRequest, Attester, Error, Package,
    Publisher,
};
use url::Url;

const REPOSITORY: &str = "org/repo";
const VERSION: &str = "1.2.3";
const BUNDLE: &[u8] = br#"{"mediaType":"application/vnd.dev.sigstore.bundle.v0.3+json"}"#;
const PREDICATE: &str = "https://slsa.dev/provenance/v1";

fn created() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, Default)]
struct FakeAttester {
    requests: Arc<Mutex<Vec<AttestationRequest>>>,
    fail: bool,
}

impl FakeAttester {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<AttestationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Attester for FakeAttester {
    async fn attest(&self, request: &AttestationRequest) -> Result<Attestation, AttestationError> {
        self.requests.lock().push(request.clone());
        if self.fail {
            let error = serde_json::from_str::<serde_json::Value>("unsigned").unwrap_err();
            return Err(AttestationError::InvalidBundle(error));
        }

        Ok(Attestation {
            bundle: Bytes::from_static(BUNDLE),
            media_type: media_types::SIGSTORE_BUNDLE_V03.into(),
            predicate_type: PREDICATE.into(),
            attestation_id: Some("42".into()),
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    archives: Archives,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("archive.tar.gz"), b"tarball bytes").unwrap();
        std::fs::write(root.join("archive.zip"), b"zip bytes").unwrap();

        let archives = Archives {
            tar: file_metadata(&root.join("archive.tar.gz")).unwrap(),
            zip: file_metadata(&root.join("archive.zip")).unwrap(),
        };
        Self { _dir: dir, archives }
    }

    fn package(&self) -> Package<'_> {
        Package {
            repository: REPOSITORY,
            repository_id: "123",
            owner_id: "456",
            source_commit: "abc123",
            version: VERSION,
            archives: &self.archives,
            created: Some(created()),
        }
    }
}

/// Digests the registry is expected to report, computed the same way the
/// publisher builds its manifests.
struct Expected {
    package: String,
    package_size: u64,
    attestation: String,
    index: String,
}

fn expected(archives: &Archives) -> Expected {
    let package = ActionPackage {
        tar: &archives.tar,
        zip: &archives.zip,
        repository: REPOSITORY,
        repository_id: "123",
        owner_id: "456",
        source_commit: "abc123",
        version: VERSION,
        created: Some(created()),
    }
    .manifest();
    let package_digest = package.sha256_digest().unwrap();
    let package_size = package.size_in_bytes().unwrap();

    let bundle_digest = sha256_digest(BUNDLE);
    let attestation = SigstoreAttestation {
        bundle_size: BUNDLE.len() as u64,
        bundle_digest: &bundle_digest,
        bundle_media_type: media_types::SIGSTORE_BUNDLE_V03,
        predicate_type: PREDICATE,
        subject_size: package_size,
        subject_digest: &package_digest,
        created: Some(created()),
    }
    .manifest();
    let attestation_digest = attestation.sha256_digest().unwrap();

    let index = ReferrerIndex {
        attestation_digest: &attestation_digest,
        attestation_size: attestation.size_in_bytes().unwrap(),
        attestation_created: attestation.annotations.get(keys::CREATED).unwrap(),
        bundle_media_type: media_types::SIGSTORE_BUNDLE_V03,
        predicate_type: PREDICATE,
        created: Some(created()),
    }
    .manifest();

    Expected {
        package: package_digest,
        package_size,
        attestation: attestation_digest,
        index: index.sha256_digest().unwrap(),
    }
}

fn manifest_path(reference: &str) -> String {
    format!("/v2/{REPOSITORY}/manifests/{reference}")
}

fn created_with_digest(digest: &str) -> MockResponse {
    MockResponse::new(StatusCode::CREATED).header("docker-content-digest", digest)
}

/// A registry which already holds every blob and accepts the expected manifests.
fn registry(expected: &Expected) -> MockService {
    let mock = MockService::new();
    mock.add(Method::HEAD, ANY_PATH, MockResponse::new(StatusCode::OK));
    mock.add(
        Method::PUT,
        &manifest_path(&expected.attestation),
        created_with_digest(&expected.attestation),
    );
    mock.add(
        Method::PUT,
        &manifest_path(&referrer_tag(&expected.package)),
        created_with_digest(&expected.index),
    );
    mock.add(
        Method::PUT,
        &manifest_path(VERSION),
        created_with_digest(&expected.package),
    );
    mock
}

fn publisher(mock: &MockService) -> Publisher {
    let client = RegistryClient::with_inner_service(
        Url::parse("https://ghcr.io/").unwrap(),
        "token",
        mock.clone(),
    )
    .unwrap()
    .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));
    Publisher::new(client, "token".into())
}

fn manifest_puts(mock: &MockService) -> Vec<String> {
    mock.requests()
        .into_iter()
        .filter(|request| request.method == Method::PUT)
        .map(|request| request.uri.path().to_owned())
        .collect()
}

#[tokio::test]
async fn attestation_is_published_before_the_package() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = registry(&expected);
    let attester = FakeAttester::default();

    let outputs = publisher(&mock)
        .with_attester(attester.clone())
        .publish(&fixture.package())
        .await
        .unwrap();

    assert_eq!(
        manifest_puts(&mock),
        [
            manifest_path(&expected.attestation),
            manifest_path(&referrer_tag(&expected.package)),
            manifest_path(VERSION),
        ]
    );
    assert_eq!(mock.count(&Method::POST), 0, "every blob already exists");

    assert_eq!(outputs.package_url, "https://ghcr.io/org/repo:1.2.3");
    assert_eq!(outputs.package_manifest_sha, expected.package);
    assert_eq!(outputs.package_manifest.len() as u64, expected.package_size);
    assert_eq!(sha256_digest(outputs.package_manifest.as_bytes()), expected.package);
    assert_eq!(outputs.attestation_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn attester_receives_the_package_subject() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = registry(&expected);
    let attester = FakeAttester::default();

    publisher(&mock)
        .with_attester(attester.clone())
        .publish(&fixture.package())
        .await
        .unwrap();

    let requests = attester.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].subject_name, "ghcr.io/org/repo");
    assert_eq!(requests[0].subject_digest, hex_part(&expected.package));
    assert!(requests[0].skip_write);
    assert_eq!(requests[0].token.revealed(), "token");
}

#[tokio::test]
async fn enterprise_servers_skip_attestation() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = registry(&expected);
    let attester = FakeAttester::default();

    let outputs = publisher(&mock)
        .with_attester(attester.clone())
        .enterprise(true)
        .publish(&fixture.package())
        .await
        .unwrap();

    assert!(attester.requests().is_empty());
    assert_eq!(manifest_puts(&mock), [manifest_path(VERSION)]);
    assert_eq!(outputs.attestation_id, None);
}

#[tokio::test]
async fn without_an_attester_only_the_package_is_published() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = registry(&expected);

    let outputs = publisher(&mock)
        .publish(&fixture.package())
        .await
        .unwrap();

    assert_eq!(manifest_puts(&mock), [manifest_path(VERSION)]);
    assert_eq!(mock.count(&Method::HEAD), 3);
    assert_eq!(outputs.package_manifest_sha, expected.package);
}

#[tokio::test]
async fn attestation_failure_stops_before_any_upload() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = registry(&expected);

    let err = publisher(&mock)
        .with_attester(FakeAttester::failing())
        .publish(&fixture.package())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Attestation(_)));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn registry_failure_stops_the_package_upload() {
    let fixture = Fixture::new();
    let expected = expected(&fixture.archives);
    let mock = MockService::new();
    mock.add(Method::HEAD, ANY_PATH, MockResponse::new(StatusCode::OK));
    mock.add(
        Method::PUT,
        &manifest_path(&expected.attestation),
        MockResponse::new(StatusCode::FORBIDDEN)
            .body(r#"{"errors":[{"code":"DENIED","message":"permission_denied"}]}"#),
    );

    let err = publisher(&mock)
        .with_attester(FakeAttester::default())
        .publish(&fixture.package())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Registry(_)));
    assert_eq!(manifest_puts(&mock), [manifest_path(&expected.attestation)]);
}
