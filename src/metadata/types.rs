use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A FIDO metadata statement describing one authenticator model.
///
/// Field set follows the FIDO MDS metadata statement format; unknown fields
/// are ignored so newer MDS revisions still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataStatement {
    #[serde(default)]
    pub legal_header: Option<String>,
    /// Canonical lowercase hyphenated AAGUID; empty for non-FIDO2 entries
    #[serde(default)]
    pub aaguid: String,
    #[serde(default)]
    pub aaid: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authenticator_version: u64,
    #[serde(default)]
    pub protocol_family: Option<String>,
    /// Base64-encoded DER trust anchors for this model's attestation certificates
    #[serde(default)]
    pub attestation_root_certificates: Vec<String>,
    #[serde(default)]
    pub attestation_types: Vec<u16>,
    #[serde(default)]
    pub authentication_algorithm: Option<u16>,
    #[serde(default)]
    pub key_protection: Option<u16>,
    #[serde(default)]
    pub matcher_protection: Option<u16>,
    #[serde(default)]
    pub attachment_hint: Option<u32>,
    #[serde(default)]
    pub is_second_factor_only: Option<bool>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// One entry of an authenticator's certification status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: AuthenticatorStatus,
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// FIDO authenticator certification status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticatorStatus {
    NotFidoCertified,
    FidoCertified,
    UserVerificationBypass,
    AttestationKeyCompromise,
    UserKeyRemoteCompromise,
    UserKeyPhysicalCompromise,
    UpdateAvailable,
    Revoked,
    SelfAssertionSubmitted,
    FidoCertifiedL1,
    FidoCertifiedL1plus,
    FidoCertifiedL2,
    FidoCertifiedL2plus,
    FidoCertifiedL3,
    FidoCertifiedL3plus,
    /// Status values this crate does not know about yet
    #[serde(other)]
    Unknown,
}

impl AuthenticatorStatus {
    /// Whether this status marks the authenticator model as compromised.
    /// A matching status report makes every lookup for the model fail.
    pub fn is_compromised(&self) -> bool {
        matches!(
            self,
            AuthenticatorStatus::UserVerificationBypass
                | AuthenticatorStatus::AttestationKeyCompromise
                | AuthenticatorStatus::UserKeyRemoteCompromise
                | AuthenticatorStatus::UserKeyPhysicalCompromise
        )
    }
}

/// Header of the signed TOC JWT published by an MDS server.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TocHeader {
    pub alg: String,
    /// Base64 (standard) DER certificates, leaf first
    pub x5c: Vec<String>,
}

/// Payload of the signed TOC JWT.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TocPayload {
    #[serde(default)]
    pub legal_header: Option<String>,
    /// Strictly increasing TOC sequence number
    pub no: u64,
    /// `YYYY-MM-DD`
    pub next_update: String,
    pub entries: Vec<TocEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TocEntry {
    #[serde(default)]
    pub aaguid: Option<String>,
    #[serde(default)]
    pub aaid: Option<String>,
    #[serde(default)]
    pub url: String,
    /// base64url SHA digest the statement body must match
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub status_reports: Vec<StatusReport>,
    #[serde(default)]
    pub time_of_last_status_change: Option<String>,
}

/// An MDS server to query live, as supplied to [`initialize`].
///
/// [`initialize`]: crate::MetadataService::initialize
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdsServer {
    pub url: String,
    /// Fetched and appended to the TOC chain when non-empty
    #[serde(default)]
    pub root_cert_url: String,
    /// Appended to every statement URL, e.g. an API token query param
    #[serde(default)]
    pub metadata_url_suffix: String,
}

/// Cached per-server TOC state.
#[derive(Debug, Clone)]
pub(crate) struct TocSource {
    pub url: String,
    pub root_cert_url: String,
    pub url_suffix: String,
    /// TOC JWT `alg` as verified at ingest (ES256 only)
    pub signing_alg: String,
    pub last_seen_sequence_no: u64,
    pub next_update_at: DateTime<Utc>,
}

/// Cached trust data for one AAGUID.
///
/// `toc_source` is a lookup key into the TOC source table, never an ownership
/// edge. When it is `None` the entry was supplied statically at initialization
/// and is never re-fetched or hash-checked.
#[derive(Debug, Clone)]
pub(crate) struct CachedAuthenticatorEntry {
    pub source_url: String,
    pub expected_hash: String,
    pub status_reports: Vec<StatusReport>,
    pub statement: Option<MetadataStatement>,
    pub toc_source: Option<String>,
}

/// Coarse readiness state of the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceState {
    Ready,
    Refreshing,
}

/// Options for [`MetadataService::initialize`].
///
/// [`MetadataService::initialize`]: crate::MetadataService::initialize
#[derive(Debug, Clone, Default)]
pub struct InitializeOptions {
    /// Preloaded statements, trusted as-is and never refreshed
    pub statements: Vec<MetadataStatement>,
    /// MDS servers to download and track TOCs from
    pub mds_servers: Vec<MdsServer>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_report_deserializes_screaming_snake_case() {
        let report: StatusReport = serde_json::from_value(json!({
            "status": "ATTESTATION_KEY_COMPROMISE",
            "effectiveDate": "2024-02-01"
        }))
        .unwrap();
        assert_eq!(report.status, AuthenticatorStatus::AttestationKeyCompromise);
        assert!(report.status.is_compromised());
        assert_eq!(report.effective_date.as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let report: StatusReport =
            serde_json::from_value(json!({"status": "SOME_FUTURE_STATUS"})).unwrap();
        assert_eq!(report.status, AuthenticatorStatus::Unknown);
        assert!(!report.status.is_compromised());
    }

    #[test]
    fn test_compromise_set_is_exactly_four_statuses() {
        let compromised = [
            AuthenticatorStatus::UserVerificationBypass,
            AuthenticatorStatus::AttestationKeyCompromise,
            AuthenticatorStatus::UserKeyRemoteCompromise,
            AuthenticatorStatus::UserKeyPhysicalCompromise,
        ];
        for status in compromised {
            assert!(status.is_compromised(), "{status:?} should be compromised");
        }
        for status in [
            AuthenticatorStatus::FidoCertified,
            AuthenticatorStatus::Revoked,
            AuthenticatorStatus::UpdateAvailable,
            AuthenticatorStatus::NotFidoCertified,
        ] {
            assert!(!status.is_compromised(), "{status:?} is not in the compromise set");
        }
    }

    #[test]
    fn test_toc_payload_deserializes_mds_shape() {
        let payload: TocPayload = serde_json::from_value(json!({
            "legalHeader": "terms apply",
            "no": 42,
            "nextUpdate": "2025-01-01",
            "entries": [{
                "aaguid": "f8a011f3-8c0a-4d15-8006-17111f9edc7d",
                "url": "https://mds.example.com/statements/f8a011f3",
                "hash": "abc123",
                "statusReports": [{"status": "FIDO_CERTIFIED"}]
            }, {
                "aaid": "1234#5678",
                "url": "https://mds.example.com/statements/uaf",
                "hash": "def456"
            }]
        }))
        .unwrap();
        assert_eq!(payload.no, 42);
        assert_eq!(payload.next_update, "2025-01-01");
        assert_eq!(payload.entries.len(), 2);
        assert!(payload.entries[0].aaguid.is_some());
        assert!(payload.entries[1].aaguid.is_none());
    }

    #[test]
    fn test_metadata_statement_ignores_unknown_fields() {
        let statement: MetadataStatement = serde_json::from_value(json!({
            "aaguid": "00000000-0000-0000-0000-000000000000",
            "description": "Test Authenticator",
            "attestationRootCertificates": ["AAAA"],
            "someFutureMdsField": {"nested": true}
        }))
        .unwrap();
        assert_eq!(statement.description, "Test Authenticator");
        assert_eq!(statement.attestation_root_certificates.len(), 1);
    }
}
