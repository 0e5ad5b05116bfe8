//! Step outputs of a publish run.

use camino::Utf8Path;
use tokio::io::AsyncWriteExt as _;

use crate::Error;

/// What a successful publish run reports back to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outputs {
    /// `{registry}/{repository}:{version}`
    pub package_url: String,

    /// Compact JSON of the package manifest, as uploaded.
    pub package_manifest: String,

    /// `sha256:<hex>` digest of the package manifest.
    pub package_manifest_sha: String,

    /// Identifier of the stored attestation, when one was made.
    pub attestation_id: Option<String>,
}

impl Outputs {
    /// Output names and values, in the order they are written.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![
            ("package-url", self.package_url.as_str()),
            ("package-manifest", self.package_manifest.as_str()),
            ("package-manifest-sha", self.package_manifest_sha.as_str()),
        ];
        if let Some(id) = &self.attestation_id {
            pairs.push(("attestation-id", id.as_str()));
        }
        pairs
    }

    /// The outputs as `name=value` lines.
    pub fn render(&self) -> String {
        self.pairs()
            .into_iter()
            .map(|(name, value)| format!("{name}={value}\n"))
            .collect()
    }

    /// Log the outputs, and append them to the file at `path` if given.
    pub async fn write(&self, path: Option<&Utf8Path>) -> Result<(), Error> {
        for (name, value) in self.pairs() {
            tracing::info!("{name}: {value}");
        }

        let Some(path) = path else {
            return Ok(());
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(Error::io(format!("Opening outputs file {path}")))?;
        file.write_all(self.render().as_bytes())
            .await
            .map_err(Error::io(format!("Writing outputs file {path}")))?;
        file.flush()
            .await
            .map_err(Error::io(format!("Writing outputs file {path}")))?;
        Ok(())
    }
}
