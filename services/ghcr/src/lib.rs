//! Publishing GitHub Actions packages to the GitHub container registry.
//!
//! [`manifest`] builds the OCI manifests for a package, its sigstore
//! attestation and the referrer index tying the two together.
//! [`RegistryClient`] pushes those manifests, and the blobs they reference,
//! using the OCI distribution protocol.

mod client;
pub mod digest;
mod error;
pub mod manifest;

pub use self::client::{Blobs, RegistryClient};
pub use self::error::{Error, ErrorDetails, RegistryError};
pub use self::manifest::{
    ActionPackage, Annotations, Descriptor, FileMetadata, ImageManifest, IndexManifest, Manifest,
    ReferrerIndex, SigstoreAttestation,
};
