//! Boundary to the inspection backend.
//!
//! The core only depends on [`InspectionApi`]; [`HttpInspectionClient`] is the
//! production implementation. Every failure is a [`RemoteError`] whose kind was
//! decided by the transport.

pub mod auth;
pub mod error;
pub mod http;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Inspection, Report, WorkflowActionResult};

pub use auth::{StaticToken, TokenProvider};
pub use error::{RemoteError, RemoteErrorKind};
pub use http::HttpInspectionClient;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateInspectionRequest {
    pub technician_id: String,
    pub site_id: String,
}

#[async_trait]
pub trait InspectionApi: Send + Sync {
    async fn create_inspection(&self, request: &CreateInspectionRequest)
        -> RemoteResult<Inspection>;

    /// Uploads one snapshot (signed URL, PUT, attach) and returns its object URL.
    async fn upload_snapshot(&self, inspection_id: &str, frame_data_url: &str)
        -> RemoteResult<String>;

    async fn complete_inspection(&self, inspection_id: &str, summary: Option<&str>)
        -> RemoteResult<()>;

    async fn generate_report(&self, inspection_id: &str) -> RemoteResult<Report>;

    async fn get_report(&self, inspection_id: &str) -> RemoteResult<Report>;

    async fn download_report_pdf(&self, inspection_id: &str) -> RemoteResult<Vec<u8>>;

    async fn run_workflow_action(
        &self,
        inspection_id: &str,
        action: &str,
        note: Option<&str>,
    ) -> RemoteResult<WorkflowActionResult>;
}
