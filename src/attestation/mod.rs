mod dispatch;
mod errors;
mod none;
mod packed;
mod safetynet;
mod types;
mod u2f;
mod utils;

pub use dispatch::verify_attestation_response;
pub use errors::AttestationError;
pub use types::{AttestationEnvelope, AttestationFormat, AuthenticatorInfo, VerifiedAttestation};
