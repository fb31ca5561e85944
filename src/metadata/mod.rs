mod errors;
mod service;
mod types;

pub use errors::MetadataError;
pub use service::MetadataService;
pub use types::{
    AuthenticatorStatus, InitializeOptions, MdsServer, MetadataStatement, StatusReport,
};
