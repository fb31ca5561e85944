use thiserror::Error;

use crate::metadata::MetadataError;
use crate::utils::UtilError;

/// Errors that can occur while verifying a registration attestation.
///
/// Every variant is fatal to the verification call that produced it; a relying
/// party must treat any of them as "reject this ceremony".
#[derive(Debug, Error)]
pub enum AttestationError {
    /// Client data origin did not match the relying party's origin
    #[error("Attestation origin mismatch: expected {expected:?}, got {actual:?}")]
    OriginMismatch { expected: String, actual: String },

    /// Client data ceremony type was not "webauthn.create"
    #[error("Unexpected ceremony type {0:?}, expected \"webauthn.create\"")]
    WrongCeremonyType(String),

    /// Attestation format outside the supported set
    #[error("Unsupported attestation format: {0:?}")]
    UnsupportedFormat(String),

    /// Client data JSON could not be decoded or was missing fields
    #[error("Invalid client data: {0}")]
    ClientData(String),

    /// Attestation object or authenticator data was malformed
    #[error("Invalid attestation data: {0}")]
    Format(String),

    /// A cryptographic proof check failed
    #[error("Verification error: {0}")]
    Verification(String),

    /// The metadata trust service rejected the authenticator
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Error from utility operations
    #[error("Utils error: {0}")]
    Utils(#[from] UtilError),
}
