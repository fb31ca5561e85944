use ring::signature::UnparsedPublicKey;
use serde::de::DeserializeOwned;

use crate::utils::base64url_decode;

use super::errors::TrustError;

/// A compact JWT split into its three segments.
///
/// Parsing deliberately does not verify the signature: TOC processing needs to
/// inspect the header (`alg`, `x5c`) and payload (`no`) before the certificate
/// chain that anchors the signature has been validated. Callers verify the
/// signature afterwards with one of the `verify_*` methods.
#[derive(Debug)]
pub(crate) struct CompactJwt {
    header_json: Vec<u8>,
    payload_json: Vec<u8>,
    signing_input: String,
    signature: Vec<u8>,
}

impl CompactJwt {
    pub(crate) fn parse(token: &str) -> Result<Self, TrustError> {
        let token = token.trim();
        let mut segments = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (segments.next(), segments.next(), segments.next()) {
                (Some(h), Some(p), Some(s)) => (h, p, s),
                _ => {
                    return Err(TrustError::Jwt(
                        "Expected three dot-separated segments".to_string(),
                    ));
                }
            };
        if segments.next().is_some() {
            return Err(TrustError::Jwt("Too many segments".to_string()));
        }

        let header_json = base64url_decode(header_b64)
            .map_err(|e| TrustError::Jwt(format!("Invalid header encoding: {e}")))?;
        let payload_json = base64url_decode(payload_b64)
            .map_err(|e| TrustError::Jwt(format!("Invalid payload encoding: {e}")))?;
        let signature = base64url_decode(signature_b64)
            .map_err(|e| TrustError::Jwt(format!("Invalid signature encoding: {e}")))?;

        Ok(Self {
            header_json,
            payload_json,
            signing_input: format!("{header_b64}.{payload_b64}"),
            signature,
        })
    }

    pub(crate) fn header<T: DeserializeOwned>(&self) -> Result<T, TrustError> {
        serde_json::from_slice(&self.header_json)
            .map_err(|e| TrustError::Jwt(format!("Invalid header JSON: {e}")))
    }

    pub(crate) fn payload<T: DeserializeOwned>(&self) -> Result<T, TrustError> {
        serde_json::from_slice(&self.payload_json)
            .map_err(|e| TrustError::Jwt(format!("Invalid payload JSON: {e}")))
    }

    /// Verify an ES256 (JWS raw r||s) signature against an uncompressed
    /// P-256 public key point, as found in a certificate's subjectPublicKey.
    pub(crate) fn verify_es256(&self, public_key_point: &[u8]) -> Result<(), TrustError> {
        let key = UnparsedPublicKey::new(
            &ring::signature::ECDSA_P256_SHA256_FIXED,
            public_key_point,
        );
        key.verify(self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| TrustError::Signature("ES256 JWT signature invalid".to_string()))
    }

    /// Verify an RS256 signature against a DER-encoded RSAPublicKey, as found
    /// in a certificate's subjectPublicKey.
    pub(crate) fn verify_rs256(&self, rsa_public_key_der: &[u8]) -> Result<(), TrustError> {
        let key = UnparsedPublicKey::new(
            &ring::signature::RSA_PKCS1_2048_8192_SHA256,
            rsa_public_key_der,
        );
        key.verify(self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| TrustError::Signature("RS256 JWT signature invalid".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::base64url_encode;
    use ring::rand::SystemRandom;
    use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct TestHeader {
        alg: String,
    }

    #[derive(Deserialize)]
    struct TestPayload {
        no: u64,
    }

    fn encode_token(header: &serde_json::Value, payload: &serde_json::Value, sig: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            base64url_encode(header.to_string().as_bytes()),
            base64url_encode(payload.to_string().as_bytes()),
            base64url_encode(sig)
        )
    }

    #[test]
    fn test_parse_typed_segments() {
        let token = encode_token(&json!({"alg": "ES256"}), &json!({"no": 7}), &[1, 2, 3]);
        let jwt = CompactJwt::parse(&token).unwrap();
        let header: TestHeader = jwt.header().unwrap();
        let payload: TestPayload = jwt.payload().unwrap();
        assert_eq!(header.alg, "ES256");
        assert_eq!(payload.no, 7);
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        let result = CompactJwt::parse("only.two");
        assert!(matches!(result, Err(TrustError::Jwt(_))));

        let result = CompactJwt::parse("a.b.c.d");
        assert!(matches!(result, Err(TrustError::Jwt(_))));
    }

    #[test]
    fn test_parse_rejects_bad_segment_encoding() {
        let result = CompactJwt::parse("!!.AA.AA");
        match result {
            Err(TrustError::Jwt(msg)) => assert!(msg.contains("Invalid header encoding")),
            other => panic!("Expected Jwt error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_es256_round_trip() {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();

        let header_b64 = base64url_encode(json!({"alg": "ES256"}).to_string().as_bytes());
        let payload_b64 = base64url_encode(json!({"no": 1}).to_string().as_bytes());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = key_pair.sign(&rng, signing_input.as_bytes()).unwrap();

        let token = format!("{signing_input}.{}", base64url_encode(signature.as_ref()));
        let jwt = CompactJwt::parse(&token).unwrap();

        jwt.verify_es256(key_pair.public_key().as_ref()).unwrap();

        // A tampered payload must fail against the same key
        let forged = format!(
            "{header_b64}.{}.{}",
            base64url_encode(json!({"no": 2}).to_string().as_bytes()),
            base64url_encode(signature.as_ref())
        );
        let forged_jwt = CompactJwt::parse(&forged).unwrap();
        assert!(matches!(
            forged_jwt.verify_es256(key_pair.public_key().as_ref()),
            Err(TrustError::Signature(_))
        ));
    }
}
