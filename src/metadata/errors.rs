use std::time::Duration;

use thiserror::Error;

use super::types::AuthenticatorStatus;

/// Errors from the metadata trust service.
///
/// Every variant is fatal to the call that produced it. During bulk
/// `initialize` the TOC-refresh variants (`StaleSequence`, `CertChain`,
/// `Signature`, `Fetch`, `Toc`) are caught per source and logged instead of
/// propagated; everywhere else they surface to the caller.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The trust registry has no entry for this AAGUID
    #[error("Unlisted AAGUID {0:?} in metadata registry")]
    UnlistedAaguid(String),

    /// A status report marks this authenticator model as compromised
    #[error("Authenticator {aaguid:?} has compromised status {status:?}")]
    CompromisedAuthenticator {
        aaguid: String,
        status: AuthenticatorStatus,
    },

    /// Downloaded statement body does not match the TOC-declared digest
    #[error("Metadata statement hash mismatch for AAGUID {0:?}")]
    HashMismatch(String),

    /// Downloaded TOC is not newer than the cached one
    #[error("TOC sequence number {latest} is not greater than cached {cached}")]
    StaleSequence { latest: u64, cached: u64 },

    /// TOC certificate path could not be validated
    #[error("TOC certificate chain could not be validated: {0}")]
    CertChain(String),

    /// TOC JWT signature could not be verified
    #[error("TOC signature could not be verified: {0}")]
    Signature(String),

    /// Readiness wait exceeded its ceiling
    #[error("Metadata service did not become ready within {0:?}")]
    Timeout(Duration),

    /// Network fetch failed
    #[error("Metadata fetch failed: {0}")]
    Fetch(String),

    /// TOC document could not be parsed
    #[error("Malformed TOC: {0}")]
    Toc(String),

    /// AAGUID bytes could not be normalized to canonical form
    #[error("Invalid AAGUID: {0}")]
    Aaguid(String),

    /// Statement body could not be decoded or parsed
    #[error("Invalid metadata statement: {0}")]
    Statement(String),
}

impl From<reqwest::Error> for MetadataError {
    fn from(err: reqwest::Error) -> Self {
        MetadataError::Fetch(err.to_string())
    }
}
