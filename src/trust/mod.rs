mod chain;
mod errors;
mod jwt;

pub use errors::TrustError;

pub(crate) use chain::{certificate_from_pem_or_der, validate_certificate_path};
pub(crate) use jwt::CompactJwt;
