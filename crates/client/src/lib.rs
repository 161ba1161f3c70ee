//! Client code for certdesk.
//!
//! This crate provides the typed certificate API client and the prebuilt
//! queries and mutations the console is assembled from.

pub mod api;
pub mod mutations;
pub mod queries;

pub use api::{
    ApiConfig, ApiError, CertClient, Certificate, CertificateFilter, CertificateStatus, CertificateType,
    CertificateUpdate, ExportFormat, ExportRequest, FileEntry, FileFilter, NewCertificate,
};
pub use mutations::CertificateMutations;
pub use queries::CertificateQueries;
