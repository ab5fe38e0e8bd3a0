//! Azure Blob Storage over REST, authorized with a shared access signature.

use async_trait::async_trait;
use pl_types::{config_error, PlResult, StorageError};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::blob::BlobStore;
use crate::config::{validate_container_name, ConnectionString, PromotionConfig};

const API_VERSION: &str = "2021-08-06";

/// Uploads block blobs with `Put Blob`.
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    http: Client,
    endpoint: Url,
    container: String,
    sas_token: String,
}

impl AzureBlobStore {
    pub fn new(connection: &ConnectionString, container: &str) -> PlResult<Self> {
        validate_container_name(container)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| config_error!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            endpoint: connection.blob_endpoint.clone(),
            container: container.to_string(),
            sas_token: connection.sas_token.clone(),
        })
    }

    pub fn from_config(config: &PromotionConfig) -> PlResult<Self> {
        Self::new(&config.connection, &config.container)
    }

    /// `<endpoint>/<container>/<blob>` without the signature.
    pub fn blob_url(&self, blob_name: &str) -> PlResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| config_error!("blob endpoint {} cannot be a base URL", self.endpoint))?
            .pop_if_empty()
            .push(&self.container)
            .extend(blob_name.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn upload_blob(&self, blob_name: &str, data: Vec<u8>, overwrite: bool) -> PlResult<()> {
        let upload_error = |message: String| StorageError::Upload {
            blob: blob_name.to_string(),
            message,
        };

        let mut url = self.blob_url(blob_name)?;
        url.set_query(Some(&self.sas_token));

        let size = data.len();
        let mut request = self
            .http
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", API_VERSION)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        if !overwrite {
            request = request.header("If-None-Match", "*");
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_error(e.without_url().to_string()))?;
        let status = response.status();
        if status.is_success() {
            debug!(blob = %blob_name, bytes = size, "Uploaded blob");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if !overwrite && (status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED)
        {
            return Err(StorageError::AlreadyExists {
                blob: blob_name.to_string(),
            }
            .into());
        }
        Err(upload_error(format!("{status}: {}", error_code(&body).unwrap_or(body.trim()))).into())
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn backend_type(&self) -> &'static str {
        "azure"
    }
}

/// `<Code>...</Code>` from an Azure error body, if present.
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}
