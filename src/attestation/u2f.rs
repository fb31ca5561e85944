use ciborium::value::Value as CborValue;
use webpki::EndEntityCert;
use x509_parser::{certificate::X509Certificate, prelude::*};

use super::errors::AttestationError;
use super::types::{AttestationFormat, AttestationObject, VerifiedAttestation};
use super::utils::{credential_info, extract_public_key_coords, parse_attested_credential_data};

/// Verifies a FIDO-U2F attestation statement.
///
/// The signature covers `0x00 || rpIdHash || clientDataHash || credentialId
/// || 0x04 || x || y`, signed with the attestation certificate's P-256 key.
pub(super) fn verify_u2f_attestation(
    attestation: &AttestationObject,
    client_data_hash: &[u8],
) -> Result<VerifiedAttestation, AttestationError> {
    tracing::debug!("Verifying FIDO-U2F attestation");

    let mut sig: Option<Vec<u8>> = None;
    let mut x5c_opt: Option<Vec<Vec<u8>>> = None;

    for (k, v) in &attestation.att_stmt {
        if let CborValue::Text(key_str) = k {
            match key_str.as_str() {
                "sig" => {
                    if let CborValue::Bytes(s) = v {
                        sig = Some(s.clone());
                    }
                }
                "x5c" => {
                    if let CborValue::Array(certs) = v {
                        let mut cert_chain = Vec::new();
                        for cert in certs {
                            if let CborValue::Bytes(cert_bytes) = cert {
                                cert_chain.push(cert_bytes.clone());
                            }
                        }
                        if !cert_chain.is_empty() {
                            x5c_opt = Some(cert_chain);
                        }
                    }
                }
                _ => {
                    tracing::debug!("Unexpected key in U2F attestation: {}", key_str);
                }
            }
        }
    }

    let sig = sig.ok_or_else(|| {
        AttestationError::Verification("Missing signature in FIDO-U2F attestation".to_string())
    })?;

    let x5c = x5c_opt.ok_or_else(|| {
        AttestationError::Verification("Missing x5c in FIDO-U2F attestation".to_string())
    })?;

    // The attestation certificate is always the first entry
    let attestn_cert_bytes = &x5c[0];
    let attestn_cert = EndEntityCert::try_from(attestn_cert_bytes.as_ref()).map_err(|e| {
        AttestationError::Verification(format!(
            "Failed to parse U2F attestation certificate: {e:?}"
        ))
    })?;

    let (_, x509_cert) = X509Certificate::from_der(attestn_cert_bytes).map_err(|e| {
        AttestationError::Verification(format!("Failed to parse X509 certificate: {e}"))
    })?;

    // U2F attestation certificates must be end-entity certificates
    if let Some(basic_constraints) = x509_cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.as_bytes() == oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS.as_bytes())
    {
        if basic_constraints.value.contains(&0x01) {
            return Err(AttestationError::Verification(
                "U2F certificate must not be a CA certificate".to_string(),
            ));
        }
    }

    let credential = parse_attested_credential_data(&attestation.auth_data)
        .map_err(|e| AttestationError::Verification(format!("Invalid authenticator data: {e}")))?;
    let (x_coord, y_coord) = extract_public_key_coords(&credential.public_key)?;

    // Verification data per the U2F raw message format
    let mut verification_data = Vec::new();
    verification_data.push(0x00);
    verification_data.extend_from_slice(&attestation.auth_data[0..32]);
    verification_data.extend_from_slice(client_data_hash);
    verification_data.extend_from_slice(&credential.credential_id);
    verification_data.push(0x04); // Uncompressed point format
    verification_data.extend_from_slice(&x_coord);
    verification_data.extend_from_slice(&y_coord);

    attestn_cert
        .verify_signature(&webpki::ECDSA_P256_SHA256, &verification_data, &sig)
        .map_err(|_| {
            AttestationError::Verification("U2F attestation signature invalid".to_string())
        })?;

    tracing::debug!("FIDO-U2F attestation verification successful");
    Ok(VerifiedAttestation {
        verified: true,
        authenticator_info: Some(credential_info(
            AttestationFormat::FidoU2f,
            &attestation.auth_data,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::utils::test_auth_data;
    use ciborium::value::Value;
    use ring::digest;

    fn test_client_data_hash() -> Vec<u8> {
        let client_data = r#"{"type":"webauthn.create","challenge":"dGVzdGNoYWxsZW5nZQ","origin":"https://example.com"}"#;
        digest::digest(&digest::SHA256, client_data.as_bytes())
            .as_ref()
            .to_vec()
    }

    fn test_u2f_att_stmt(
        include_sig: bool,
        include_x5c: bool,
        bogus_x5c_entry: bool,
    ) -> Vec<(CborValue, CborValue)> {
        let mut att_stmt = Vec::new();

        if include_sig {
            att_stmt.push((
                Value::Text("sig".to_string()),
                Value::Bytes(vec![0x01, 0x02, 0x03, 0x04]),
            ));
        }

        if include_x5c {
            let certs = if bogus_x5c_entry {
                // Non-bytes entries are skipped, leaving the chain empty
                vec![Value::Text("not a certificate".to_string())]
            } else {
                vec![Value::Bytes(vec![0x30, 0x82, 0x01, 0x01])]
            };
            att_stmt.push((Value::Text("x5c".to_string()), Value::Array(certs)));
        }

        att_stmt
    }

    fn test_attestation(att_stmt: Vec<(CborValue, CborValue)>) -> AttestationObject {
        AttestationObject {
            fmt: "fido-u2f".to_string(),
            auth_data: test_auth_data([0x01; 16]),
            att_stmt,
        }
    }

    #[test]
    fn test_verify_u2f_attestation_missing_sig() {
        let attestation = test_attestation(test_u2f_att_stmt(false, true, false));
        let result = verify_u2f_attestation(&attestation, &test_client_data_hash());
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Missing signature in FIDO-U2F attestation"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_u2f_attestation_missing_x5c() {
        let attestation = test_attestation(test_u2f_att_stmt(true, false, false));
        let result = verify_u2f_attestation(&attestation, &test_client_data_hash());
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Missing x5c in FIDO-U2F attestation"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_u2f_attestation_x5c_without_certificates() {
        let attestation = test_attestation(test_u2f_att_stmt(true, true, true));
        let result = verify_u2f_attestation(&attestation, &test_client_data_hash());
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Missing x5c in FIDO-U2F attestation"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_u2f_attestation_truly_empty_x5c() {
        let att_stmt = vec![
            (
                Value::Text("sig".to_string()),
                Value::Bytes(vec![0x01, 0x02, 0x03, 0x04]),
            ),
            (Value::Text("x5c".to_string()), Value::Array(vec![])),
        ];
        let attestation = test_attestation(att_stmt);
        let result = verify_u2f_attestation(&attestation, &test_client_data_hash());
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Missing x5c in FIDO-U2F attestation"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_u2f_attestation_invalid_certificate() {
        let att_stmt = vec![
            (
                Value::Text("sig".to_string()),
                Value::Bytes(vec![0x01, 0x02, 0x03, 0x04]),
            ),
            (
                Value::Text("x5c".to_string()),
                Value::Array(vec![Value::Bytes(vec![0xFF, 0xEE, 0xDD, 0xCC])]),
            ),
        ];
        let attestation = test_attestation(att_stmt);
        let result = verify_u2f_attestation(&attestation, &test_client_data_hash());
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Failed to parse U2F attestation certificate"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }
}
