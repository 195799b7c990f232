use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{config::ProviderConfig, error::ProviderError};

/// A video registered with the provider's file store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFile {
    /// Resource name, e.g. `files/abc123`.
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed(String),
}

/// One piece of a multimodal prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Text(String),
    File { uri: String, mime_type: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn file(file: &ProviderFile) -> Self {
        Part::File {
            uri: file.uri.clone(),
            mime_type: file.mime_type.clone(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Part::Text(text) => json!({ "text": text }),
            Part::File { uri, mime_type } => json!({
                "file_data": { "mime_type": mime_type, "file_uri": uri }
            }),
        }
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn register_asset(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<ProviderFile, ProviderError>;

    async fn file_status(&self, file: &ProviderFile) -> Result<FileState, ProviderError>;

    async fn generate(&self, model: &str, parts: &[Part]) -> Result<String, ProviderError>;

    /// Cheapest possible request that proves `model` answers.
    async fn probe(&self, model: &str) -> Result<(), ProviderError> {
        self.generate(model, &[Part::text("ping")]).await.map(|_| ())
    }
}

/// Gemini REST client (Files API + generateContent).
pub struct GeminiClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = request
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
            reason: format!("{e}: {body}"),
        })
    }
}

#[async_trait]
impl AiProvider for GeminiClient {
    async fn register_asset(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<ProviderFile, ProviderError> {
        let read_asset = |source| ProviderError::ReadAsset {
            path: path.to_path_buf(),
            source,
        };
        let size = tokio::fs::metadata(path).await.map_err(read_asset)?.len();

        // resumable protocol: start a session, then upload+finalize in one request
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.config.api_url))
            .header("x-goog-api-key", &self.config.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;

        let status = start.status();
        if !status.is_success() {
            let body = start.text().await?;
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse {
                reason: "upload session has no x-goog-upload-url header".to_string(),
            })?;

        // stream from disk; videos can be far larger than we want in memory
        let file = tokio::fs::File::open(path).await.map_err(read_asset)?;
        let response = self
            .send_json(
                self.http
                    .post(upload_url)
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .header(reqwest::header::CONTENT_LENGTH, size)
                    .body(reqwest::Body::from(file)),
            )
            .await?;

        parse_file(&response["file"])
    }

    async fn file_status(&self, file: &ProviderFile) -> Result<FileState, ProviderError> {
        let response = self
            .send_json(
                self.http
                    .get(format!("{}/v1beta/{}", self.config.api_url, file.name)),
            )
            .await?;

        Ok(match response["state"].as_str().unwrap_or("PROCESSING") {
            "ACTIVE" => FileState::Active,
            "FAILED" => FileState::Failed(
                response["error"]["message"]
                    .as_str()
                    .unwrap_or("provider could not process the file")
                    .to_string(),
            ),
            _ => FileState::Processing,
        })
    }

    async fn generate(&self, model: &str, parts: &[Part]) -> Result<String, ProviderError> {
        let response = self
            .send_json(
                self.http
                    .post(format!(
                        "{}/v1beta/models/{}:generateContent",
                        self.config.api_url, model
                    ))
                    .json(&json!({
                        "contents": [{
                            "role": "user",
                            "parts": parts.iter().map(Part::to_json).collect::<Vec<_>>(),
                        }],
                        "generationConfig": { "temperature": 0.3 },
                    })),
            )
            .await?;

        extract_text(&response)
    }
}

fn parse_file(file: &Value) -> Result<ProviderFile, ProviderError> {
    let field = |key: &str| {
        file[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse {
                reason: format!("uploaded file is missing `{key}`: {file}"),
            })
    };

    Ok(ProviderFile {
        name: field("name")?,
        uri: field("uri")?,
        mime_type: field("mimeType")?,
    })
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Result<String, ProviderError> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse {
            reason: format!("Invalid API response structure: {response}"),
        })?;

    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        return Err(ProviderError::InvalidResponse {
            reason: "response contained no text".to_string(),
        });
    }
    Ok(text)
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_missing_asset_fails_before_any_request() {
        // nothing listens here; reaching the network would be an Http error
        let client = GeminiClient::new(ProviderConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            api_key: "key".to_string(),
        });
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.mp4");

        let err = client
            .register_asset(&missing, "video/mp4", "gone")
            .await
            .unwrap_err();
        match err {
            ProviderError::ReadAsset { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected ReadAsset, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] }
            }]
        });
        assert_eq!(extract_text(&response).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_extract_text_rejects_empty_candidates() {
        let response = json!({ "candidates": [] });
        assert!(matches!(
            extract_text(&response),
            Err(ProviderError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_parse_file() {
        let file = json!({
            "name": "files/abc",
            "uri": "https://example.test/files/abc",
            "mimeType": "video/mp4",
            "state": "PROCESSING"
        });
        let parsed = parse_file(&file).unwrap();
        assert_eq!(parsed.name, "files/abc");
        assert_eq!(parsed.mime_type, "video/mp4");
    }

    #[test]
    fn test_api_error_message_prefers_structured_message() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded"}}"#;
        assert_eq!(api_error_message(body), "Quota exceeded");
        assert_eq!(api_error_message("plain"), "plain");
    }

    #[test]
    fn test_file_part_json() {
        let part = Part::File {
            uri: "u".into(),
            mime_type: "video/mp4".into(),
        };
        assert_eq!(
            part.to_json(),
            json!({ "file_data": { "mime_type": "video/mp4", "file_uri": "u" } })
        );
    }
}
