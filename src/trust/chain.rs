use std::time::SystemTime;

use x509_parser::{certificate::X509Certificate, pem::parse_x509_pem, prelude::*, time::ASN1Time};

use super::errors::TrustError;

/// Validates an ordered certificate path: leaf first, trust anchor last.
///
/// Every certificate must be within its validity window, every non-root
/// certificate must chain to its successor by name and carry a signature that
/// verifies under the successor's public key, and a self-named root must be
/// self-signed.
pub(crate) fn validate_certificate_path(chain_der: &[Vec<u8>]) -> Result<(), TrustError> {
    if chain_der.is_empty() {
        return Err(TrustError::Chain("Empty certificate chain".to_string()));
    }

    let mut certs: Vec<X509Certificate> = Vec::with_capacity(chain_der.len());
    for der in chain_der {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| TrustError::Certificate(format!("Failed to parse certificate: {e}")))?;
        certs.push(cert);
    }

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| TrustError::Chain(format!("System time error: {e}")))?;
    let timestamp = ASN1Time::from_timestamp(now.as_secs() as i64)
        .map_err(|e| TrustError::Chain(format!("Failed to convert time: {e}")))?;

    for cert in &certs {
        if !cert.validity().is_valid_at(timestamp) {
            return Err(TrustError::Chain(
                "Certificate in chain is expired or not yet valid".to_string(),
            ));
        }
    }

    for (i, cert) in certs.iter().enumerate() {
        match certs.get(i + 1) {
            Some(issuer) => {
                if cert.issuer().as_raw() != issuer.subject().as_raw() {
                    return Err(TrustError::Chain(format!(
                        "Certificate {} issuer does not match certificate {} subject",
                        i,
                        i + 1
                    )));
                }
                cert.verify_signature(Some(issuer.public_key())).map_err(|_| {
                    TrustError::Chain(format!("Certificate {i} signature invalid"))
                })?;
            }
            None => {
                // Last certificate: require a valid self-signature when it
                // names itself as issuer, otherwise accept it as the supplied
                // trust anchor.
                if cert.issuer().as_raw() == cert.subject().as_raw() {
                    cert.verify_signature(Some(cert.public_key())).map_err(|_| {
                        TrustError::Chain("Root certificate self-signature invalid".to_string())
                    })?;
                }
            }
        }
    }

    Ok(())
}

/// Converts a fetched certificate body to DER, accepting either PEM or raw DER.
pub(crate) fn certificate_from_pem_or_der(body: &[u8]) -> Result<Vec<u8>, TrustError> {
    if body.starts_with(b"-----BEGIN") {
        let (_, pem) = parse_x509_pem(body)
            .map_err(|e| TrustError::Certificate(format!("Failed to parse PEM: {e}")))?;
        return Ok(pem.contents);
    }

    // Parse once to make sure the bytes really are a certificate before
    // handing them to path validation.
    X509Certificate::from_der(body)
        .map_err(|e| TrustError::Certificate(format!("Failed to parse DER: {e}")))?;
    Ok(body.to_vec())
}
