use std::fmt;
use std::str::FromStr;

use ciborium::value::Value as CborValue;
use serde::Deserialize;

use crate::utils::base64url_decode;

use super::errors::AttestationError;

/// The transport payload of a registration ceremony: base64url strings of the
/// attestation object and the client data JSON, exactly as produced by
/// `navigator.credentials.create()`.
#[derive(Deserialize, Debug, Clone)]
pub struct AttestationEnvelope {
    pub attestation_object: String,
    pub client_data_json: String,
}

/// The closed set of attestation formats this crate can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationFormat {
    FidoU2f,
    Packed,
    AndroidSafetynet,
    None,
}

impl AttestationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationFormat::FidoU2f => "fido-u2f",
            AttestationFormat::Packed => "packed",
            AttestationFormat::AndroidSafetynet => "android-safetynet",
            AttestationFormat::None => "none",
        }
    }
}

impl FromStr for AttestationFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fido-u2f" => Ok(AttestationFormat::FidoU2f),
            "packed" => Ok(AttestationFormat::Packed),
            "android-safetynet" => Ok(AttestationFormat::AndroidSafetynet),
            "none" => Ok(AttestationFormat::None),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded attestation object: format tag, raw authenticator data, and the
/// format-specific attestation statement map.
#[derive(Debug)]
pub(crate) struct AttestationObject {
    pub(crate) fmt: String,
    pub(crate) auth_data: Vec<u8>,
    pub(crate) att_stmt: Vec<(CborValue, CborValue)>,
}

impl AttestationObject {
    pub(crate) fn from_base64(attestation_object: &str) -> Result<Self, AttestationError> {
        let raw = base64url_decode(attestation_object)
            .map_err(|e| AttestationError::Format(format!("Failed to decode: {e}")))?;

        let value: CborValue = ciborium::de::from_reader(raw.as_slice())
            .map_err(|e| AttestationError::Format(format!("Invalid CBOR: {e}")))?;

        let CborValue::Map(entries) = value else {
            return Err(AttestationError::Format(
                "Attestation object must be a CBOR map".to_string(),
            ));
        };

        let mut fmt = None;
        let mut auth_data = None;
        let mut att_stmt = None;
        for (key, value) in entries {
            let CborValue::Text(key) = key else { continue };
            match (key.as_str(), value) {
                ("fmt", CborValue::Text(s)) => fmt = Some(s),
                ("authData", CborValue::Bytes(b)) => auth_data = Some(b),
                ("attStmt", CborValue::Map(m)) => att_stmt = Some(m),
                _ => {}
            }
        }

        match (fmt, auth_data, att_stmt) {
            (Some(fmt), Some(auth_data), Some(att_stmt)) => Ok(Self {
                fmt,
                auth_data,
                att_stmt,
            }),
            _ => Err(AttestationError::Format(
                "Attestation object missing fmt, authData or attStmt".to_string(),
            )),
        }
    }
}

/// Client data fields the dispatcher checks, plus the raw bytes the verifiers
/// hash for their signature checks.
#[derive(Debug)]
pub(crate) struct ParsedClientData {
    pub(crate) challenge: String,
    pub(crate) origin: String,
    pub(crate) type_: String,
    pub(crate) raw_data: Vec<u8>,
}

impl ParsedClientData {
    pub(crate) fn from_base64(client_data_json: &str) -> Result<Self, AttestationError> {
        let raw_data = base64url_decode(client_data_json)
            .map_err(|e| AttestationError::Format(format!("Failed to decode: {e}")))?;

        let data_str = String::from_utf8(raw_data.clone())
            .map_err(|e| AttestationError::Format(format!("Invalid UTF-8: {e}")))?;

        let data: serde_json::Value = serde_json::from_str(&data_str)
            .map_err(|e| AttestationError::Format(format!("Invalid JSON: {e}")))?;

        let challenge = data["challenge"]
            .as_str()
            .ok_or_else(|| AttestationError::ClientData("Missing challenge".into()))?;

        Ok(Self {
            challenge: challenge.to_string(),
            origin: data["origin"]
                .as_str()
                .ok_or_else(|| AttestationError::ClientData("Missing origin".into()))?
                .to_string(),
            type_: data["type"]
                .as_str()
                .ok_or_else(|| AttestationError::ClientData("Missing type".into()))?
                .to_string(),
            raw_data,
        })
    }
}

/// The outcome of a successful verification, handed back to the relying party.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAttestation {
    pub verified: bool,
    pub authenticator_info: Option<AuthenticatorInfo>,
}

/// Credential data extracted from a verified attestation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorInfo {
    pub fmt: AttestationFormat,
    pub counter: u32,
    /// Canonical lowercase hyphenated AAGUID
    pub aaguid: String,
    /// base64url credential ID
    pub credential_id: String,
    /// base64url COSE credential public key
    pub credential_public_key: String,
}
