use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CheckError, QualityCheck, SignalKind};

/// Grammar signal backed by a LanguageTool-compatible `/v2/check` endpoint.
pub struct LanguageToolCheck {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    matches: Vec<serde_json::Value>,
}

impl LanguageToolCheck {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CheckError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QualityCheck for LanguageToolCheck {
    fn kind(&self) -> SignalKind {
        SignalKind::Grammar
    }

    async fn measure(&self, text: &str, language: &str) -> Result<f64, CheckError> {
        let response = self
            .client
            .post(format!("{}/v2/check", self.base_url))
            .form(&[("text", text), ("language", language)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(CheckError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: CheckResponse = response
            .json()
            .await
            .map_err(|e| CheckError::Malformed(e.to_string()))?;
        Ok(body.matches.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn counts_matches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/check"))
            .and(body_string_contains("language=de"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "matches": [{"message": "a"}, {"message": "b"}]
            })))
            .mount(&server)
            .await;

        let check = LanguageToolCheck::new(format!("{}/", server.uri())).unwrap();
        let errors = check.measure("Das ist ein Test", "de").await.unwrap();
        assert_eq!(errors, 2.0);
    }

    #[tokio::test]
    async fn service_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let check = LanguageToolCheck::new(server.uri()).unwrap();
        match check.measure("text", "en").await.unwrap_err() {
            CheckError::Service { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "busy");
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let check = LanguageToolCheck::new(server.uri()).unwrap();
        assert!(matches!(
            check.measure("text", "en").await,
            Err(CheckError::Malformed(_))
        ));
    }
}
