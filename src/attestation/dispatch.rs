use ring::digest;

use crate::metadata::MetadataService;

use super::errors::AttestationError;
use super::types::{
    AttestationEnvelope, AttestationFormat, AttestationObject, ParsedClientData,
    VerifiedAttestation,
};
use super::{none, packed, safetynet, u2f};

/// Verifies a registration ceremony's attestation response.
///
/// The ceremony-level checks happen first: the client data must name the
/// relying party's exact origin and carry type `webauthn.create`, and the
/// attestation format must be one of the supported set. Only then does the
/// format-specific verifier run, with the SHA-256 of the raw client data
/// bytes as its challenge parameter.
///
/// The `packed` and `android-safetynet` verifiers consult `metadata` when its
/// registry has entries; a compromised or unverifiable authenticator fails
/// the whole ceremony.
pub async fn verify_attestation_response(
    response: &AttestationEnvelope,
    expected_origin: &str,
    metadata: &MetadataService,
) -> Result<VerifiedAttestation, AttestationError> {
    let attestation = AttestationObject::from_base64(&response.attestation_object)?;
    let client_data = ParsedClientData::from_base64(&response.client_data_json)?;

    if client_data.origin != expected_origin {
        return Err(AttestationError::OriginMismatch {
            expected: expected_origin.to_string(),
            actual: client_data.origin,
        });
    }

    if client_data.type_ != "webauthn.create" {
        return Err(AttestationError::WrongCeremonyType(client_data.type_));
    }

    let format: AttestationFormat = attestation
        .fmt
        .parse()
        .map_err(|_| AttestationError::UnsupportedFormat(attestation.fmt.clone()))?;

    tracing::debug!(fmt = %format, "Dispatching attestation verification");

    let client_data_hash = digest::digest(&digest::SHA256, &client_data.raw_data);
    let client_data_hash = client_data_hash.as_ref();

    match format {
        AttestationFormat::None => none::verify_none_attestation(&attestation),
        AttestationFormat::FidoU2f => u2f::verify_u2f_attestation(&attestation, client_data_hash),
        AttestationFormat::Packed => {
            packed::verify_packed_attestation(&attestation, client_data_hash, metadata).await
        }
        AttestationFormat::AndroidSafetynet => {
            safetynet::verify_safetynet_attestation(&attestation, client_data_hash, metadata).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::utils::test_auth_data;
    use crate::utils::base64url_encode;
    use ciborium::value::Value as CborValue;
    use proptest::prelude::*;
    use serde_json::json;
    use std::str::FromStr;

    const ORIGIN: &str = "https://example.com";

    fn encode_attestation_object(fmt: &str, auth_data: Vec<u8>) -> String {
        let map = CborValue::Map(vec![
            (
                CborValue::Text("fmt".to_string()),
                CborValue::Text(fmt.to_string()),
            ),
            (
                CborValue::Text("authData".to_string()),
                CborValue::Bytes(auth_data),
            ),
            (
                CborValue::Text("attStmt".to_string()),
                CborValue::Map(vec![]),
            ),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes).unwrap();
        base64url_encode(&bytes)
    }

    fn encode_client_data(origin: &str, type_: &str) -> String {
        let client_data = json!({
            "challenge": "dGVzdGNoYWxsZW5nZQ",
            "origin": origin,
            "type": type_
        })
        .to_string();
        base64url_encode(client_data.as_bytes())
    }

    fn envelope(fmt: &str, origin: &str, type_: &str) -> AttestationEnvelope {
        AttestationEnvelope {
            attestation_object: encode_attestation_object(fmt, test_auth_data([0x01; 16])),
            client_data_json: encode_client_data(origin, type_),
        }
    }

    #[tokio::test]
    async fn test_none_attestation_end_to_end() {
        let metadata = MetadataService::new();
        let result = verify_attestation_response(
            &envelope("none", ORIGIN, "webauthn.create"),
            ORIGIN,
            &metadata,
        )
        .await
        .unwrap();

        assert!(result.verified);
        let info = result.authenticator_info.unwrap();
        assert_eq!(info.fmt, AttestationFormat::None);
        assert_eq!(info.aaguid, "01010101-0101-0101-0101-010101010101");
        assert_eq!(info.counter, 9);
        assert!(!info.credential_id.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_format_rejected() {
        let metadata = MetadataService::new();
        let result = verify_attestation_response(
            &envelope("tpm", ORIGIN, "webauthn.create"),
            ORIGIN,
            &metadata,
        )
        .await;

        match result {
            Err(AttestationError::UnsupportedFormat(fmt)) => assert_eq!(fmt, "tpm"),
            other => panic!("Expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_origin_mismatch_rejected() {
        let metadata = MetadataService::new();
        let result = verify_attestation_response(
            &envelope("none", "https://evil.example.org", "webauthn.create"),
            ORIGIN,
            &metadata,
        )
        .await;

        match result {
            Err(AttestationError::OriginMismatch { expected, actual }) => {
                assert_eq!(expected, ORIGIN);
                assert_eq!(actual, "https://evil.example.org");
            }
            other => panic!("Expected OriginMismatch, got {other:?}"),
        }
    }

    // Origin is checked before the format is even looked at
    #[tokio::test]
    async fn test_origin_checked_before_format() {
        let metadata = MetadataService::new();
        let result = verify_attestation_response(
            &envelope("tpm", "https://evil.example.org", "webauthn.create"),
            ORIGIN,
            &metadata,
        )
        .await;

        assert!(matches!(
            result,
            Err(AttestationError::OriginMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_ceremony_type_rejected() {
        let metadata = MetadataService::new();
        let result = verify_attestation_response(
            &envelope("none", ORIGIN, "webauthn.get"),
            ORIGIN,
            &metadata,
        )
        .await;

        match result {
            Err(AttestationError::WrongCeremonyType(type_)) => assert_eq!(type_, "webauthn.get"),
            other => panic!("Expected WrongCeremonyType, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_attestation_object_rejected() {
        let metadata = MetadataService::new();
        let response = AttestationEnvelope {
            attestation_object: "!!!not-base64url!!!".to_string(),
            client_data_json: encode_client_data(ORIGIN, "webauthn.create"),
        };
        let result = verify_attestation_response(&response, ORIGIN, &metadata).await;
        assert!(matches!(result, Err(AttestationError::Format(_))));
    }

    proptest! {
        // Anything outside the four supported tags never parses as a format
        #[test]
        fn prop_format_set_is_closed(fmt in "[a-z-]{1,20}") {
            let known = ["fido-u2f", "packed", "android-safetynet", "none"];
            let parsed = AttestationFormat::from_str(&fmt);
            prop_assert_eq!(parsed.is_ok(), known.contains(&fmt.as_str()));
        }
    }
}
