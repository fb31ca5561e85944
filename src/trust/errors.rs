use thiserror::Error;

/// Errors from the shared certificate-chain and JWT trust glue.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Compact JWT could not be split or decoded
    #[error("Malformed JWT: {0}")]
    Jwt(String),

    /// A certificate could not be parsed from its transport encoding
    #[error("Certificate parse error: {0}")]
    Certificate(String),

    /// The ordered certificate chain failed path validation
    #[error("Certificate chain invalid: {0}")]
    Chain(String),

    /// A cryptographic signature did not verify
    #[error("Signature verification failed: {0}")]
    Signature(String),
}
