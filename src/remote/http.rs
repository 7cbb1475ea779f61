use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::models::{Inspection, Report, WorkflowActionResult};
use crate::realtime::video::decode_data_url;

use super::{
    CreateInspectionRequest, InspectionApi, RemoteError, RemoteResult, TokenProvider,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest<'a> {
    content_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    object_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachSnapshotRequest<'a> {
    image_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowActionRequest<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

/// REST client for the inspection backend.
pub struct HttpInspectionClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpInspectionClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fieldcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, builder: RequestBuilder) -> RemoteResult<Response> {
        let builder = match self.tokens.bearer_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(
            status.as_u16(),
            format!("{status}: {}", body.trim()),
        ))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl InspectionApi for HttpInspectionClient {
    async fn create_inspection(
        &self,
        request: &CreateInspectionRequest,
    ) -> RemoteResult<Inspection> {
        debug!("Creating inspection for site {}", request.site_id);
        self.send_json(self.client.post(self.url("/inspections")).json(request))
            .await
    }

    async fn upload_snapshot(
        &self,
        inspection_id: &str,
        frame_data_url: &str,
    ) -> RemoteResult<String> {
        let (content_type, bytes) = decode_data_url(frame_data_url)
            .ok_or_else(|| RemoteError::invalid_request("snapshot is not a base64 data URL"))?;

        let target: UploadUrlResponse = self
            .send_json(
                self.client
                    .post(self.url(&format!("/inspections/{inspection_id}/snapshots/upload-url")))
                    .json(&UploadUrlRequest {
                        content_type: &content_type,
                    }),
            )
            .await?;

        // Signed URLs carry their own authorization.
        let put = self
            .client
            .put(&target.upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
            .body(bytes)
            .send()
            .await?;
        if !put.status().is_success() {
            let status = put.status();
            return Err(RemoteError::from_status(
                status.as_u16(),
                format!("snapshot upload returned {status}"),
            ));
        }

        self.send(
            self.client
                .post(self.url(&format!("/inspections/{inspection_id}/snapshots")))
                .json(&AttachSnapshotRequest {
                    image_url: &target.object_url,
                }),
        )
        .await?;

        debug!("Attached snapshot {} to {}", target.object_url, inspection_id);
        Ok(target.object_url)
    }

    async fn complete_inspection(
        &self,
        inspection_id: &str,
        summary: Option<&str>,
    ) -> RemoteResult<()> {
        self.send(
            self.client
                .post(self.url(&format!("/inspections/{inspection_id}/complete")))
                .json(&CompleteRequest { summary }),
        )
        .await
        .map(|_| ())
    }

    async fn generate_report(&self, inspection_id: &str) -> RemoteResult<Report> {
        self.send_json(
            self.client
                .post(self.url(&format!("/inspections/{inspection_id}/report"))),
        )
        .await
    }

    async fn get_report(&self, inspection_id: &str) -> RemoteResult<Report> {
        self.send_json(
            self.client
                .get(self.url(&format!("/inspections/{inspection_id}/report"))),
        )
        .await
    }

    async fn download_report_pdf(&self, inspection_id: &str) -> RemoteResult<Vec<u8>> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/inspections/{inspection_id}/report.pdf"))),
            )
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn run_workflow_action(
        &self,
        inspection_id: &str,
        action: &str,
        note: Option<&str>,
    ) -> RemoteResult<WorkflowActionResult> {
        self.send_json(
            self.client
                .post(self.url(&format!("/inspections/{inspection_id}/workflow-actions")))
                .json(&WorkflowActionRequest { action, note }),
        )
        .await
    }
}
