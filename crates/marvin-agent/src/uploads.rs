//! File uploads to the paste host (generated images, sandbox artefacts,
//! rendered videos). Returns a public URL for the IRC line.

use tracing::debug;

const DEFAULT_RETENTION: &str = "168h";

#[derive(Clone)]
pub struct FileUploader {
    client: reqwest::Client,
    upload_url: String,
    api_key: Option<String>,
}

impl FileUploader {
    pub fn new(upload_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url,
            api_key,
        }
    }

    /// Upload raw bytes under `filename`; returns the hosted URL.
    pub async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<String, String> {
        self.upload_with_retention(bytes, filename, DEFAULT_RETENTION)
            .await
    }

    pub async fn upload_with_retention(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        retention: &str,
    ) -> Result<String, String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "upload API key not configured".to_string())?;

        debug!(%filename, size = bytes.len(), "uploading file");

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("retention", retention.to_string());

        let resp = self
            .client
            .post(&self.upload_url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("upload failed: {e}"))?;

        let status = resp.status().as_u16();
        if status != 200 && status != 201 {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("upload failed: {status} {body}"));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("upload response unreadable: {e}"))?;
        parsed
            .get("url")
            .and_then(|u| u.as_str())
            .map(String::from)
            .ok_or_else(|| "upload response had no url field".to_string())
    }
}
