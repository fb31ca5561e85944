use super::errors::AttestationError;
use super::types::{AttestationFormat, AttestationObject, VerifiedAttestation};
use super::utils::{auth_data_flags, credential_info, extract_public_key_coords,
    parse_attested_credential_data};

/// Verifies a `none` attestation: no cryptographic proof, but the envelope
/// still has to be internally consistent. Platform authenticators and
/// `attestation: "none"` registrations land here. Never consults the
/// metadata service.
pub(super) fn verify_none_attestation(
    attestation: &AttestationObject,
) -> Result<VerifiedAttestation, AttestationError> {
    if !attestation.att_stmt.is_empty() {
        return Err(AttestationError::Format(
            "attStmt must be empty for none attestation".to_string(),
        ));
    }

    if attestation.auth_data.len() < 37 {
        return Err(AttestationError::Format(
            "Authenticator data too short".to_string(),
        ));
    }

    let flags = attestation.auth_data[32];
    if flags & auth_data_flags::UP == 0 {
        return Err(AttestationError::Format(
            "User Present flag not set".to_string(),
        ));
    }
    if flags & auth_data_flags::AT == 0 {
        return Err(AttestationError::Format(
            "No attested credential data".to_string(),
        ));
    }

    // The credential public key still has to be a well-formed COSE EC2 key
    let credential = parse_attested_credential_data(&attestation.auth_data)?;
    extract_public_key_coords(&credential.public_key)?;

    Ok(VerifiedAttestation {
        verified: true,
        authenticator_info: Some(credential_info(
            AttestationFormat::None,
            &attestation.auth_data,
        )?),
    })
}
