use base64::{Engine as _, engine::general_purpose::STANDARD};
use ciborium::value::Value as CborValue;
use ring::digest;
use serde::Deserialize;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::metadata::MetadataService;
use crate::trust::{CompactJwt, validate_certificate_path};

use super::errors::AttestationError;
use super::types::{AttestationFormat, AttestationObject, VerifiedAttestation};
use super::utils::{credential_info, parse_attested_credential_data};

/// Hostname Google issues SafetyNet attestation certificates to.
const SAFETYNET_LEAF_HOSTNAME: &str = "attest.android.com";

#[derive(Deserialize)]
struct SafetyNetHeader {
    alg: String,
    x5c: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetPayload {
    nonce: String,
    cts_profile_match: bool,
    #[serde(default)]
    #[allow(dead_code)]
    basic_integrity: bool,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp_ms: Option<u64>,
}

/// Verifies an android-safetynet attestation statement.
///
/// The statement carries a Google-signed JWS whose payload nonce binds the
/// attestation to this exact ceremony: base64(SHA-256(authData ||
/// clientDataHash)). The device must pass the CTS profile check, and the JWS
/// must be signed by a certificate issued to attest.android.com.
pub(super) async fn verify_safetynet_attestation(
    attestation: &AttestationObject,
    client_data_hash: &[u8],
    metadata: &MetadataService,
) -> Result<VerifiedAttestation, AttestationError> {
    tracing::debug!("Verifying android-safetynet attestation");

    let mut ver: Option<String> = None;
    let mut response: Option<Vec<u8>> = None;
    for (k, v) in &attestation.att_stmt {
        let CborValue::Text(key_str) = k else { continue };
        match (key_str.as_str(), v) {
            ("ver", CborValue::Text(s)) => ver = Some(s.clone()),
            ("response", CborValue::Bytes(b)) => response = Some(b.clone()),
            _ => {}
        }
    }

    if ver.is_none_or(|v| v.is_empty()) {
        return Err(AttestationError::Verification(
            "Missing ver in SafetyNet attestation".to_string(),
        ));
    }
    let response = response.ok_or_else(|| {
        AttestationError::Verification("Missing response in SafetyNet attestation".to_string())
    })?;

    let response_str = String::from_utf8(response).map_err(|e| {
        AttestationError::Verification(format!("SafetyNet response is not UTF-8: {e}"))
    })?;
    let jws = CompactJwt::parse(&response_str)
        .map_err(|e| AttestationError::Verification(format!("Malformed SafetyNet JWS: {e}")))?;

    let payload: SafetyNetPayload = jws
        .payload()
        .map_err(|e| AttestationError::Verification(format!("Invalid SafetyNet payload: {e}")))?;

    // The nonce binds the JWS to this ceremony; check it before any
    // certificate work
    let mut nonce_base = Vec::with_capacity(attestation.auth_data.len() + client_data_hash.len());
    nonce_base.extend_from_slice(&attestation.auth_data);
    nonce_base.extend_from_slice(client_data_hash);
    let expected_nonce = STANDARD.encode(digest::digest(&digest::SHA256, &nonce_base));

    if payload.nonce != expected_nonce {
        return Err(AttestationError::Verification(
            "SafetyNet nonce does not match attestation data".to_string(),
        ));
    }

    if !payload.cts_profile_match {
        return Err(AttestationError::Verification(
            "SafetyNet CTS profile match failed".to_string(),
        ));
    }

    let header: SafetyNetHeader = jws
        .header()
        .map_err(|e| AttestationError::Verification(format!("Invalid SafetyNet header: {e}")))?;

    if header.x5c.is_empty() {
        return Err(AttestationError::Verification(
            "SafetyNet JWS header missing x5c".to_string(),
        ));
    }

    let mut chain_der = Vec::with_capacity(header.x5c.len());
    for cert_b64 in &header.x5c {
        let der = STANDARD.decode(cert_b64).map_err(|e| {
            AttestationError::Verification(format!("Invalid x5c certificate encoding: {e}"))
        })?;
        chain_der.push(der);
    }

    let (_, leaf) = X509Certificate::from_der(&chain_der[0]).map_err(|e| {
        AttestationError::Verification(format!("Failed to parse SafetyNet certificate: {e}"))
    })?;

    let cn_matches = leaf
        .subject()
        .iter_common_name()
        .any(|cn| cn.as_str().is_ok_and(|s| s == SAFETYNET_LEAF_HOSTNAME));
    if !cn_matches {
        return Err(AttestationError::Verification(format!(
            "SafetyNet certificate not issued to {SAFETYNET_LEAF_HOSTNAME}"
        )));
    }

    validate_certificate_path(&chain_der)
        .map_err(|e| AttestationError::Verification(format!("SafetyNet chain invalid: {e}")))?;

    let leaf_key = leaf.public_key().subject_public_key.data.as_ref();
    match header.alg.as_str() {
        "RS256" => jws
            .verify_rs256(leaf_key)
            .map_err(|e| AttestationError::Verification(format!("SafetyNet signature: {e}")))?,
        "ES256" => jws
            .verify_es256(leaf_key)
            .map_err(|e| AttestationError::Verification(format!("SafetyNet signature: {e}")))?,
        other => {
            return Err(AttestationError::Verification(format!(
                "Unsupported SafetyNet JWS algorithm: {other}"
            )));
        }
    }

    let credential = parse_attested_credential_data(&attestation.auth_data)?;
    if metadata.has_entries().await {
        metadata.get_statement(&credential.aaguid).await?;
    }

    Ok(VerifiedAttestation {
        verified: true,
        authenticator_info: Some(credential_info(
            AttestationFormat::AndroidSafetynet,
            &attestation.auth_data,
        )?),
    })
}
