//! Package a Github Action and publish it, with a provenance attestation, to
//! the Github container registry.
//!
//! A run resolves the version from the triggering event, checks the
//! repository against the Github API, archives the action directory, and then
//! hands the archives to a [`Publisher`], which uploads the attestation and its
//! referrer index before tagging the package itself.

pub mod archive;
pub mod attestation;
pub mod config;
mod error;
pub mod logging;
pub mod outputs;
pub mod publish;
mod run;
pub mod stage;
pub mod version;

pub use self::archive::Archives;
pub use self::attestation::{Attestation, AttestationError, AttestationRequest, Attester};
pub use self::config::{Args, Config, PublishOptions};
pub use self::error::Error;
pub use self::outputs::Outputs;
pub use self::publish::{Package, Publisher};
pub use self::run::{run, run_with};
