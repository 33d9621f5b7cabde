//! HTTP generation provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{GeneratedArtifact, GenerationProvider, GenerationRequest, ProviderConfig, ProviderError};
use crate::job::Parameters;
use crate::storage::{content_type_for_path, DEFAULT_CONTENT_TYPE};

/// Longest provider-supplied reason kept in an error.
const MAX_REASON_LEN: usize = 200;

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    parameters: &'a Parameters,
}

/// Provider that POSTs `{model, prompt, parameters}` to an HTTP endpoint.
///
/// A 2xx response is either the artifact itself, or a JSON document whose
/// `output` field holds a URL (or list of URLs) to download it from.
pub struct HttpProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn request_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::transient("provider request timed out")
        } else if e.is_connect() {
            ProviderError::transient(format!("could not reach provider: {}", e))
        } else if e.is_decode() || e.is_body() {
            ProviderError::transient(format!("failed to read provider response: {}", e))
        } else {
            ProviderError::transient(format!("provider request failed: {}", e))
        }
    }

    async fn status_error(response: Response) -> ProviderError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = extract_reason(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        if is_transient_status(status) {
            ProviderError::transient(format!("HTTP {}: {}", status.as_u16(), reason))
        } else {
            ProviderError::permanent(reason)
        }
    }

    async fn download(&self, url: &str) -> Result<GeneratedArtifact, ProviderError> {
        debug!(url = url, "Downloading provider output");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::request_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let content_type = header_content_type(&response)
            .filter(|ct| ct != "application/octet-stream")
            .or_else(|| content_type_for_path(url).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let bytes = response.bytes().await.map_err(Self::request_error)?;

        Ok(GeneratedArtifact {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, ProviderError> {
        let body = GenerateBody {
            model: request
                .model
                .as_deref()
                .or(self.config.default_model.as_deref()),
            prompt: &request.prompt,
            parameters: &request.parameters,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&body);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(Self::request_error)?;

        if !response.status().is_success() {
            let error = Self::status_error(response).await;
            warn!(job_id = %request.job_id, error = %error, "Provider returned an error status");
            return Err(error);
        }

        let content_type = header_content_type(&response);
        let bytes = response.bytes().await.map_err(Self::request_error)?;

        if content_type.as_deref() != Some("application/json") {
            return Ok(GeneratedArtifact {
                bytes: bytes.to_vec(),
                content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            });
        }

        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::transient(format!("malformed provider response: {}", e)))?;

        if document.get("status").and_then(Value::as_str) == Some("failed") {
            let reason = reason_from_json(&document)
                .unwrap_or_else(|| "generation failed".to_string());
            return Err(ProviderError::permanent(reason));
        }

        match output_url(&document) {
            Some(url) => self.download(&url).await,
            None => Err(ProviderError::permanent("provider returned no output")),
        }
    }
}

/// 408, 425, 429 and all 5xx are worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(status.as_u16(), 408 | 425 | 429)
}

fn header_content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn output_url(document: &Value) -> Option<String> {
    match document.get("output")? {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

fn reason_from_json(document: &Value) -> Option<String> {
    ["error", "detail", "message"]
        .iter()
        .find_map(|key| document.get(*key).and_then(Value::as_str))
        .map(|reason| reason.chars().take(MAX_REASON_LEN).collect())
}

fn extract_reason(body: &str) -> Option<String> {
    let document: Value = serde_json::from_str(body).ok()?;
    reason_from_json(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer, timeout_secs: u64) -> HttpProvider {
        HttpProvider::new(ProviderConfig {
            endpoint: format!("{}/generate", server.uri()),
            api_token: Some("secret-token".to_string()),
            default_model: Some("acme/default".to_string()),
            timeout_secs,
        })
        .unwrap()
    }

    fn request() -> GenerationRequest {
        let mut parameters = Parameters::new();
        parameters.insert("width".to_string(), json!(512));
        GenerationRequest {
            job_id: "job-1".to_string(),
            prompt: "sunset over the ocean".to_string(),
            parameters,
            model: None,
        }
    }

    #[tokio::test]
    async fn test_binary_response_is_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header_matcher("authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({
                "model": "acme/default",
                "prompt": "sunset over the ocean",
                "parameters": {"width": 512}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/webp")
                    .set_body_bytes(b"webp-bytes".to_vec()),
            )
            .mount(&server)
            .await;

        let artifact = provider_for(&server, 5).generate(&request()).await.unwrap();
        assert_eq!(artifact.bytes, b"webp-bytes");
        assert_eq!(artifact.content_type, "image/webp");
    }

    #[tokio::test]
    async fn test_json_output_url_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "output": [format!("{}/files/out.jpg", server.uri())]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/out.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;

        let artifact = provider_for(&server, 5).generate(&request()).await.unwrap();
        assert_eq!(artifact.bytes, b"jpeg-bytes");
        assert_eq!(artifact.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = provider_for(&server, 5).generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider_for(&server, 5).generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent_with_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"detail": "prompt violates content policy"})),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server, 5).generate(&request()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::permanent("prompt violates content policy")
        );
    }

    #[tokio::test]
    async fn test_failed_prediction_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed",
                "error": "NSFW content detected"
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server, 5).generate(&request()).await.unwrap_err();
        assert_eq!(err, ProviderError::permanent("NSFW content detected"));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = provider_for(&server, 1).generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let provider = HttpProvider::new(ProviderConfig {
            endpoint: "http://127.0.0.1:9/generate".to_string(),
            api_token: None,
            default_model: None,
            timeout_secs: 2,
        })
        .unwrap();

        let err = provider.generate(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_reason_is_truncated() {
        let body = json!({"error": "x".repeat(500)}).to_string();
        assert_eq!(extract_reason(&body).unwrap().len(), MAX_REASON_LEN);
        assert!(extract_reason("not json").is_none());
    }
}
