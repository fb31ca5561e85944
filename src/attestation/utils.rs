use ciborium::value::{Integer, Value as CborValue};
use uuid::Uuid;

use crate::utils::base64url_encode;

use super::errors::AttestationError;
use super::types::{AttestationFormat, AuthenticatorInfo};

/// Minimum authenticator data length: rpIdHash (32) + flags (1) + counter (4)
const AUTH_DATA_HEADER_LEN: usize = 37;

pub(super) mod auth_data_flags {
    /// User Present
    pub(in crate::attestation) const UP: u8 = 1 << 0;
    /// User Verified
    pub(in crate::attestation) const UV: u8 = 1 << 2;
    /// Attested Credential Data present
    pub(in crate::attestation) const AT: u8 = 1 << 6;
}

/// Attested credential data parsed out of authenticator data.
#[derive(Debug)]
pub(super) struct AttestedCredentialData {
    pub aaguid: String,
    pub credential_id: Vec<u8>,
    pub public_key: CborValue,
    pub public_key_bytes: Vec<u8>,
}

/// Parse the attested credential data section that follows the authenticator
/// data header: AAGUID (16) + credential ID length (2) + credential ID +
/// COSE credential public key.
pub(super) fn parse_attested_credential_data(
    auth_data: &[u8],
) -> Result<AttestedCredentialData, AttestationError> {
    if auth_data.len() < AUTH_DATA_HEADER_LEN + 18 {
        return Err(AttestationError::Format(
            "Authenticator data too short for attested credential data".to_string(),
        ));
    }

    let aaguid = Uuid::from_slice(&auth_data[37..53])
        .map_err(|e| AttestationError::Format(format!("Failed to parse AAGUID: {e}")))?
        .hyphenated()
        .to_string();

    let cred_id_len = ((auth_data[53] as usize) << 8) | (auth_data[54] as usize);
    let cred_id_end = 55 + cred_id_len;
    if auth_data.len() <= cred_id_end {
        return Err(AttestationError::Format(
            "Authenticator data too short for credential ID".to_string(),
        ));
    }
    let credential_id = auth_data[55..cred_id_end].to_vec();

    let public_key: CborValue = ciborium::de::from_reader(&auth_data[cred_id_end..])
        .map_err(|e| AttestationError::Format(format!("Invalid public key CBOR: {e}")))?;
    let mut public_key_bytes = Vec::new();
    ciborium::ser::into_writer(&public_key, &mut public_key_bytes)
        .map_err(|e| AttestationError::Format(format!("Failed to re-encode public key: {e}")))?;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        public_key,
        public_key_bytes,
    })
}

/// Build the caller-facing credential summary for a verified attestation.
pub(super) fn credential_info(
    fmt: AttestationFormat,
    auth_data: &[u8],
) -> Result<AuthenticatorInfo, AttestationError> {
    let credential = parse_attested_credential_data(auth_data)?;
    let counter = u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);
    Ok(AuthenticatorInfo {
        fmt,
        counter,
        aaguid: credential.aaguid,
        credential_id: base64url_encode(&credential.credential_id),
        credential_public_key: base64url_encode(&credential.public_key_bytes),
    })
}

/// Extract the `alg` and `sig` members of an attestation statement.
pub(super) fn get_sig_from_stmt(
    att_stmt: &[(CborValue, CborValue)],
) -> Result<(i64, Vec<u8>), AttestationError> {
    let mut alg: Option<i64> = None;
    let mut sig: Option<Vec<u8>> = None;

    for (key, value) in att_stmt {
        match key {
            CborValue::Text(k) if k == "alg" => {
                if let CborValue::Integer(a) = value {
                    alg = Some(integer_to_i64(a));
                }
            }
            CborValue::Text(k) if k == "sig" => {
                if let CborValue::Bytes(s) = value {
                    sig = Some(s.clone());
                }
            }
            _ => {}
        }
    }

    match (alg, sig) {
        (Some(alg), Some(sig)) => Ok((alg, sig)),
        _ => Err(AttestationError::Verification(
            "Missing algorithm or signature in attestation statement".to_string(),
        )),
    }
}

fn integer_to_i64(value: &Integer) -> i64 {
    // COSE algorithm identifiers all fit comfortably in i64
    i128::from(*value) as i64
}

/// Extract the x/y coordinates from a COSE EC2 public key.
pub(super) fn extract_public_key_coords(
    public_key: &CborValue,
) -> Result<(Vec<u8>, Vec<u8>), AttestationError> {
    let CborValue::Map(entries) = public_key else {
        return Err(AttestationError::Format(
            "COSE public key must be a CBOR map".to_string(),
        ));
    };

    let mut x: Option<Vec<u8>> = None;
    let mut y: Option<Vec<u8>> = None;
    for (key, value) in entries {
        let CborValue::Integer(k) = key else { continue };
        match (integer_to_i64(k), value) {
            (-2, CborValue::Bytes(bytes)) => x = Some(bytes.clone()),
            (-3, CborValue::Bytes(bytes)) => y = Some(bytes.clone()),
            _ => {}
        }
    }

    match (x, y) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(AttestationError::Format(
            "COSE public key missing x or y coordinate".to_string(),
        )),
    }
}

/// Build a minimal COSE EC2 key for tests.
#[cfg(test)]
pub(super) fn test_cose_key() -> CborValue {
    CborValue::Map(vec![
        // kty: EC2
        (CborValue::Integer(1i64.into()), CborValue::Integer(2i64.into())),
        // alg: ES256
        (
            CborValue::Integer(3i64.into()),
            CborValue::Integer((-7i64).into()),
        ),
        // crv: P-256
        (
            CborValue::Integer((-1i64).into()),
            CborValue::Integer(1i64.into()),
        ),
        (
            CborValue::Integer((-2i64).into()),
            CborValue::Bytes(vec![0x02; 32]),
        ),
        (
            CborValue::Integer((-3i64).into()),
            CborValue::Bytes(vec![0x03; 32]),
        ),
    ])
}

/// Build well-formed authenticator data (UP | UV | AT, counter 9) for tests.
#[cfg(test)]
pub(super) fn test_auth_data(aaguid: [u8; 16]) -> Vec<u8> {
    let mut auth_data = Vec::new();
    // rpIdHash placeholder
    auth_data.extend_from_slice(&[0x11; 32]);
    auth_data.push(auth_data_flags::UP | auth_data_flags::UV | auth_data_flags::AT);
    // counter
    auth_data.extend_from_slice(&[0x00, 0x00, 0x00, 0x09]);
    auth_data.extend_from_slice(&aaguid);
    // credential ID (16 bytes)
    auth_data.extend_from_slice(&[0x00, 0x10]);
    auth_data.extend_from_slice(&[0x22; 16]);
    let mut key_bytes = Vec::new();
    ciborium::ser::into_writer(&test_cose_key(), &mut key_bytes)
        .expect("test key serializes");
    auth_data.extend_from_slice(&key_bytes);
    auth_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    #[test]
    fn test_parse_attested_credential_data() {
        let auth_data = test_auth_data([0x01; 16]);
        let credential = parse_attested_credential_data(&auth_data).unwrap();
        assert_eq!(credential.aaguid, "01010101-0101-0101-0101-010101010101");
        assert_eq!(credential.credential_id, vec![0x22; 16]);
        let (x, y) = extract_public_key_coords(&credential.public_key).unwrap();
        assert_eq!(x, vec![0x02; 32]);
        assert_eq!(y, vec![0x03; 32]);
    }

    #[test]
    fn test_parse_rejects_truncated_auth_data() {
        let result = parse_attested_credential_data(&[0u8; 40]);
        assert!(matches!(result, Err(AttestationError::Format(_))));

        // Credential ID length pointing past the end
        let mut auth_data = test_auth_data([0x01; 16]);
        auth_data[53] = 0xFF;
        auth_data[54] = 0xFF;
        let result = parse_attested_credential_data(&auth_data);
        match result {
            Err(AttestationError::Format(msg)) => assert!(msg.contains("credential ID")),
            other => panic!("Expected Format error, got {other:?}"),
        }
    }

    #[test]
    fn test_credential_info_extracts_counter_and_ids() {
        let auth_data = test_auth_data([0xAB; 16]);
        let info = credential_info(AttestationFormat::None, &auth_data).unwrap();
        assert_eq!(info.counter, 9);
        assert_eq!(info.aaguid, "abababab-abab-abab-abab-abababababab");
        assert!(!info.credential_id.is_empty());
        assert!(!info.credential_public_key.is_empty());
    }

    #[test]
    fn test_get_sig_from_stmt_missing_members() {
        let att_stmt = vec![(
            Value::Text("alg".to_string()),
            Value::Integer((-7i64).into()),
        )];
        let result = get_sig_from_stmt(&att_stmt);
        match result {
            Err(AttestationError::Verification(msg)) => {
                assert!(msg.contains("Missing algorithm or signature"))
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_get_sig_from_stmt_success() {
        let att_stmt = vec![
            (
                Value::Text("alg".to_string()),
                Value::Integer((-7i64).into()),
            ),
            (
                Value::Text("sig".to_string()),
                Value::Bytes(vec![0x01, 0x02]),
            ),
        ];
        let (alg, sig) = get_sig_from_stmt(&att_stmt).unwrap();
        assert_eq!(alg, -7);
        assert_eq!(sig, vec![0x01, 0x02]);
    }

    #[test]
    fn test_extract_public_key_coords_missing_coordinate() {
        let key = Value::Map(vec![(
            Value::Integer(1i64.into()),
            Value::Integer(2i64.into()),
        )]);
        assert!(matches!(
            extract_public_key_coords(&key),
            Err(AttestationError::Format(_))
        ));
    }
}
