//! SHA-256 content digests in OCI `algorithm:hex` form.

use sha2::{Digest as _, Sha256};

/// Algorithm prefix of every digest produced here.
pub const SHA256_PREFIX: &str = "sha256:";

/// Digest `bytes` as `sha256:<lowercase hex>`.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

/// The hex portion of a digest, without the algorithm prefix.
pub fn hex_part(digest: &str) -> &str {
    digest.strip_prefix(SHA256_PREFIX).unwrap_or(digest)
}

/// The tag under which the referrers of `digest` are published.
///
/// Tags cannot contain `:`, so `sha256:abc` becomes `sha256-abc`.
pub fn referrer_tag(digest: &str) -> String {
    digest.replace(':', "-")
}
