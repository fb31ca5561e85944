use base64::{Engine as _, engine::general_purpose::STANDARD};
use ciborium::value::Value as CborValue;
use ring::signature::UnparsedPublicKey;
use std::time::SystemTime;
use uuid::Uuid;
use webpki::EndEntityCert;
use x509_parser::{certificate::X509Certificate, prelude::*, time::ASN1Time};

use crate::metadata::MetadataService;
use crate::trust::validate_certificate_path;

use super::errors::AttestationError;
use super::types::{AttestationFormat, AttestationObject, VerifiedAttestation};
use super::utils::{
    credential_info, extract_public_key_coords, get_sig_from_stmt, parse_attested_credential_data,
};

// id-fido-gen-ce-aaguid
const OID_FIDO_GEN_CE_AAGUID: &str = "1.3.6.1.4.1.45724.1.1.4";
const ES256_ALG: i64 = -7;

/// Verifies a packed attestation statement.
///
/// Supports full attestation (x5c certificate chain) and self attestation
/// (signature by the credential key itself); ECDAA is rejected. When the
/// metadata registry has entries, full attestation additionally requires the
/// authenticator's AAGUID to resolve to a non-compromised metadata statement,
/// and the certificate chain must validate against that statement's
/// attestation roots.
pub(super) async fn verify_packed_attestation(
    attestation: &AttestationObject,
    client_data_hash: &[u8],
    metadata: &MetadataService,
) -> Result<VerifiedAttestation, AttestationError> {
    let (alg, sig) = get_sig_from_stmt(&attestation.att_stmt)?;

    // The signed data is authData || clientDataHash
    let auth_data = &attestation.auth_data;
    let mut signed_data = Vec::with_capacity(auth_data.len() + client_data_hash.len());
    signed_data.extend_from_slice(auth_data);
    signed_data.extend_from_slice(client_data_hash);

    if alg != ES256_ALG {
        return Err(AttestationError::Verification(format!(
            "Unsupported or unrecognized algorithm: {alg}"
        )));
    }

    let mut x5c_opt: Option<Vec<Vec<u8>>> = None;
    let mut ecdaa_key_id: Option<Vec<u8>> = None;

    for (k, v) in &attestation.att_stmt {
        if let (CborValue::Text(key_str), CborValue::Array(certs)) = (k, v) {
            if key_str == "x5c" {
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
        } else if let (CborValue::Text(key_str), CborValue::Bytes(id)) = (k, v) {
            if key_str == "ecdaaKeyId" {
                ecdaa_key_id = Some(id.clone());
            }
        }
    }

    let credential = parse_attested_credential_data(auth_data)?;

    match (x5c_opt, ecdaa_key_id) {
        (Some(x5c), None) => {
            tracing::debug!("Full attestation with certificate chain");

            let attestn_cert_bytes = &x5c[0];
            let attestn_cert =
                EndEntityCert::try_from(attestn_cert_bytes.as_ref()).map_err(|e| {
                    AttestationError::Verification(format!(
                        "Failed to parse attestation certificate: {e:?}"
                    ))
                })?;

            let (_, x509_cert) = X509Certificate::from_der(attestn_cert_bytes).map_err(|e| {
                AttestationError::Verification(format!("Failed to parse X509 certificate: {e}"))
            })?;

            verify_packed_attestation_cert(&x509_cert, auth_data)?;

            attestn_cert
                .verify_signature(&webpki::ECDSA_P256_SHA256, &signed_data, &sig)
                .map_err(|_| {
                    AttestationError::Verification("Attestation signature invalid".to_string())
                })?;

            if x5c.len() > 1 {
                verify_chain_validity(&x5c)?;
            }

            verify_against_metadata(metadata, &credential.aaguid, Some(&x5c)).await?;
        }
        (None, Some(_)) => {
            return Err(AttestationError::Verification(
                "ECDAA attestation not supported".to_string(),
            ));
        }
        (None, None) => {
            tracing::debug!("Self attestation");
            verify_self_attestation(auth_data, &signed_data, &sig)?;
            verify_against_metadata(metadata, &credential.aaguid, None).await?;
        }
        (Some(_), Some(_)) => {
            return Err(AttestationError::Verification(
                "Invalid attestation: both x5c and ecdaaKeyId present".to_string(),
            ));
        }
    }

    Ok(VerifiedAttestation {
        verified: true,
        authenticator_info: Some(credential_info(AttestationFormat::Packed, auth_data)?),
    })
}

/// Consults the metadata registry when it has entries. A known AAGUID must
/// resolve to a statement, and a supplied certificate chain must anchor to one
/// of the statement's attestation roots.
async fn verify_against_metadata(
    metadata: &MetadataService,
    aaguid: &str,
    x5c: Option<&Vec<Vec<u8>>>,
) -> Result<(), AttestationError> {
    if !metadata.has_entries().await {
        return Ok(());
    }

    let Some(statement) = metadata.get_statement(aaguid).await? else {
        return Ok(());
    };

    let Some(x5c) = x5c else {
        return Ok(());
    };

    let mut anchored = false;
    for root_b64 in &statement.attestation_root_certificates {
        let root = STANDARD.decode(root_b64).map_err(|e| {
            AttestationError::Verification(format!("Invalid metadata root certificate: {e}"))
        })?;

        let mut path = x5c.clone();
        path.push(root);
        if validate_certificate_path(&path).is_ok() {
            anchored = true;
            break;
        }
    }

    if !anchored {
        return Err(AttestationError::Verification(
            "Certificate chain does not anchor to a metadata attestation root".to_string(),
        ));
    }

    Ok(())
}

fn verify_packed_attestation_cert(
    cert: &X509Certificate,
    auth_data: &[u8],
) -> Result<(), AttestationError> {
    // Check that it's not a CA certificate
    if let Some(basic_constraints) = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.as_bytes() == oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS.as_bytes())
    {
        if basic_constraints.value.contains(&0x01) {
            return Err(AttestationError::Verification(
                "Certificate must not be a CA certificate".to_string(),
            ));
        }
    }

    // When the certificate carries id-fido-gen-ce-aaguid it must agree with
    // the authenticator data
    if let Some(fido_ext) = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_string() == OID_FIDO_GEN_CE_AAGUID)
    {
        let auth_data_aaguid = &auth_data[37..53];
        let cert_aaguid = fido_ext.value;

        // The extension value is an OCTET STRING: tag (0x04) + length (0x10)
        // followed by the 16 AAGUID bytes
        if cert_aaguid.len() < 18 {
            return Err(AttestationError::Verification(
                "Malformed AAGUID extension in certificate".to_string(),
            ));
        }

        let auth_data_uuid = Uuid::from_slice(auth_data_aaguid)
            .map_err(|e| AttestationError::Verification(format!("Failed to parse AAGUID: {e}")))?
            .hyphenated()
            .to_string();
        tracing::debug!("Authenticator AAGUID: {:?}", auth_data_uuid);

        if auth_data_aaguid != &cert_aaguid[2..] {
            return Err(AttestationError::Verification(
                "AAGUID mismatch between certificate and authenticator data".to_string(),
            ));
        }
    }

    Ok(())
}

fn verify_chain_validity(x5c: &[Vec<u8>]) -> Result<(), AttestationError> {
    for cert_bytes in x5c {
        let (_, cert) = X509Certificate::from_der(cert_bytes).map_err(|e| {
            AttestationError::Verification(format!("Failed to parse certificate in chain: {e}"))
        })?;

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| AttestationError::Verification(format!("System time error: {e}")))?;
        let timestamp = ASN1Time::from_timestamp(now.as_secs() as i64)
            .map_err(|e| AttestationError::Verification(format!("Failed to convert time: {e}")))?;

        if !cert.validity().is_valid_at(timestamp) {
            return Err(AttestationError::Verification(
                "Certificate in chain is expired or not yet valid".to_string(),
            ));
        }
    }

    Ok(())
}

fn verify_self_attestation(
    auth_data: &[u8],
    signed_data: &[u8],
    signature: &[u8],
) -> Result<(), AttestationError> {
    let flags = auth_data[32];
    if flags & 0x40 == 0 {
        return Err(AttestationError::Verification(
            "No attested credential data in self attestation".to_string(),
        ));
    }

    let credential = parse_attested_credential_data(auth_data)?;
    let (x_coord, y_coord) = extract_public_key_coords(&credential.public_key)?;

    let mut public_key = Vec::with_capacity(65);
    public_key.push(0x04); // Uncompressed point format
    public_key.extend_from_slice(&x_coord);
    public_key.extend_from_slice(&y_coord);

    let verification_algorithm = &ring::signature::ECDSA_P256_SHA256_ASN1;
    let public_key = UnparsedPublicKey::new(verification_algorithm, &public_key);

    public_key.verify(signed_data, signature).map_err(|_| {
        AttestationError::Verification("Self attestation signature verification failed".to_string())
    })?;

    Ok(())
}
