//! Producing a signed provenance attestation for a published package.

use std::process::Stdio;

use api_client::Secret;
use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

/// Predicate type assumed when the bundle does not declare one.
pub const DEFAULT_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v1";

/// Errors from the attestation step.
#[derive(Debug, Error)]
pub enum AttestationError {
    /// The attestation command could not be started.
    #[error("Running attestation command {command}: {source}")]
    Spawn {
        /// The command.
        command: String,
        /// Why it did not start.
        #[source]
        source: std::io::Error,
    },

    /// The attestation command exited unsuccessfully.
    #[error("Attestation command {command} failed with {status}")]
    Failed {
        /// The command.
        command: String,
        /// Its exit status.
        status: std::process::ExitStatus,
    },

    /// The attestation command printed something other than a sigstore bundle.
    #[error("Attestation output is not a sigstore bundle: {0}")]
    InvalidBundle(#[source] serde_json::Error),

    /// The bundle's DSSE payload could not be decoded.
    #[error("Attestation payload is not valid base64: {0}")]
    InvalidPayload(#[source] base64::DecodeError),
}

/// What to attest to.
#[derive(Debug, Clone)]
pub struct AttestationRequest {
    /// `{registry host}/{repository}`.
    pub subject_name: String,

    /// Hex sha256 of the package manifest, without an algorithm prefix.
    pub subject_digest: String,

    /// Token the signer may use.
    pub token: Secret,

    /// Return the bundle without storing it anywhere.
    pub skip_write: bool,
}

/// A signed attestation.
#[derive(Debug, Clone)]
pub struct Attestation {
    /// The serialized sigstore bundle.
    pub bundle: Bytes,

    /// Media type declared by the bundle.
    pub media_type: String,

    /// In-toto predicate type of the attested statement.
    pub predicate_type: String,

    /// Identifier assigned when the signer stored the attestation.
    pub attestation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleHeader {
    media_type: String,
    #[serde(default)]
    dsse_envelope: Option<DsseEnvelope>,
}

#[derive(Debug, Deserialize)]
struct DsseEnvelope {
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statement {
    #[serde(default)]
    predicate_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignerOutput {
    #[serde(default)]
    bundle: Option<Box<RawValue>>,
    #[serde(default, rename = "attestationID")]
    attestation_id: Option<String>,
}

impl Attestation {
    /// Read an attestation from signer output.
    ///
    /// The output is either a bare sigstore bundle, or an object holding the
    /// bundle under `bundle` and an optional `attestationID`. The bundle bytes
    /// are kept exactly as printed.
    pub fn from_output(output: &[u8]) -> Result<Self, AttestationError> {
        let text = std::str::from_utf8(output)
            .map_err(|error| AttestationError::InvalidBundle(serde::de::Error::custom(error)))?
            .trim();

        let wrapper: SignerOutput =
            serde_json::from_str(text).map_err(AttestationError::InvalidBundle)?;
        let (bundle, attestation_id) = match &wrapper.bundle {
            Some(bundle) => (bundle.get(), wrapper.attestation_id.clone()),
            None => (text, None),
        };

        let header: BundleHeader =
            serde_json::from_str(bundle).map_err(AttestationError::InvalidBundle)?;
        let predicate_type = match header.dsse_envelope {
            Some(envelope) => predicate_type(&envelope.payload)?,
            None => None,
        };

        Ok(Attestation {
            bundle: Bytes::copy_from_slice(bundle.as_bytes()),
            media_type: header.media_type,
            predicate_type: predicate_type.unwrap_or_else(|| DEFAULT_PREDICATE_TYPE.to_owned()),
            attestation_id,
        })
    }
}

fn predicate_type(payload: &str) -> Result<Option<String>, AttestationError> {
    let statement = BASE64_STANDARD
        .decode(payload)
        .map_err(AttestationError::InvalidPayload)?;
    Ok(serde_json::from_slice::<Statement>(&statement)
        .ok()
        .and_then(|statement| statement.predicate_type))
}

/// Something which can sign an attestation for a package.
#[async_trait]
pub trait Attester: Send + Sync {
    /// Produce a signed attestation for `request`.
    async fn attest(&self, request: &AttestationRequest) -> Result<Attestation, AttestationError>;
}

#[async_trait]
impl<A: Attester + ?Sized> Attester for Box<A> {
    async fn attest(&self, request: &AttestationRequest) -> Result<Attestation, AttestationError> {
        (**self).attest(request).await
    }
}

/// Runs an external command which prints a sigstore bundle.
///
/// The request is passed in the environment as `ATTEST_SUBJECT_NAME`,
/// `ATTEST_SUBJECT_DIGEST`, `ATTEST_SKIP_WRITE` and `GITHUB_TOKEN`.
#[derive(Debug, Clone)]
pub struct CommandAttester {
    program: String,
    args: Vec<String>,
}

impl CommandAttester {
    /// Split a command line on whitespace. `None` if it is blank.
    pub fn new(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_owned);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Attester for CommandAttester {
    async fn attest(&self, request: &AttestationRequest) -> Result<Attestation, AttestationError> {
        tracing::info!(
            subject = %request.subject_name,
            digest = %request.subject_digest,
            "Requesting attestation"
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env("ATTEST_SUBJECT_NAME", &request.subject_name)
            .env("ATTEST_SUBJECT_DIGEST", &request.subject_digest)
            .env("ATTEST_SKIP_WRITE", request.skip_write.to_string())
            .env("GITHUB_TOKEN", request.token.revealed())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AttestationError::Spawn {
                command: self.command_line(),
                source,
            })?;

        if !output.status.success() {
            return Err(AttestationError::Failed {
                command: self.command_line(),
                status: output.status,
            });
        }

        Attestation::from_output(&output.stdout)
    }
}
