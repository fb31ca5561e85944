//! Trust verification for WebAuthn registration ceremonies.
//!
//! This crate covers the two trust decisions a relying party makes when a new
//! credential is registered:
//!
//! - [`verify_attestation_response`] checks the attestation response from the
//!   client: client data origin and ceremony type, then the format-specific
//!   cryptographic proof for `fido-u2f`, `packed`, `android-safetynet` or
//!   `none` attestations.
//! - [`MetadataService`] maintains a registry of authenticator metadata from
//!   FIDO MDS servers, with certificate-verified TOC downloads, per-statement
//!   hash checks and compromise gating. Verifiers that care about
//!   authenticator provenance consult it during attestation verification.
//!
//! A typical relying party initializes one [`MetadataService`] at startup and
//! hands a reference to it to every registration ceremony:
//!
//! ```no_run
//! use webauthn_trust::{InitializeOptions, MetadataService, verify_attestation_response};
//!
//! # async fn demo(envelope: webauthn_trust::AttestationEnvelope) -> Result<(), Box<dyn std::error::Error>> {
//! let metadata = MetadataService::new();
//! metadata.initialize(InitializeOptions::default()).await;
//!
//! let result = verify_attestation_response(&envelope, "https://example.com", &metadata).await?;
//! assert!(result.verified);
//! # Ok(())
//! # }
//! ```

mod attestation;
mod metadata;
mod trust;
mod utils;

pub use attestation::{
    AttestationEnvelope, AttestationError, AttestationFormat, AuthenticatorInfo,
    VerifiedAttestation, verify_attestation_response,
};
pub use metadata::{
    AuthenticatorStatus, InitializeOptions, MdsServer, MetadataError, MetadataService,
    MetadataStatement, StatusReport,
};
pub use trust::TrustError;
pub use utils::UtilError;
