//! Outbound HTTP access to upstream sources.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::errors::RefreshError;

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get<U: Into<String>>(url: U) -> Self {
        FetchRequest {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json<U: Into<String>>(url: U, body: String) -> Self {
        FetchRequest {
            url: url.into(),
            method: Method::POST,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(body),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RefreshError> {
        serde_json::from_str(&self.body).map_err(|e| {
            RefreshError::MalformedShape(format!("response from {} is not valid JSON: {e}", self.url))
        })
    }

    /// Converts a non-success response into `UpstreamUnavailable`.
    pub fn error_for_status(self) -> Result<Self, RefreshError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RefreshError::UpstreamUnavailable {
                url: self.url,
                code: self.status,
                status: self.status_text,
                body: self.body,
            })
        }
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, RefreshError>;
}

/// Fetches a URL with GET and fails on any non-success status.
pub async fn fetch_ok(fetch: &dyn HttpFetch, url: &str) -> Result<FetchResponse, RefreshError> {
    let response = fetch.fetch(FetchRequest::get(url)).await?;
    tracing::debug!(url, status = response.status, bytes = response.body.len(), "Fetched upstream");
    response.error_for_status()
}

pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Self {
        ReqwestFetch {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, RefreshError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(FetchResponse {
            url: request.url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_ok() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"tested": []}"#))
            .mount(&mock_server)
            .await;

        let fetch = ReqwestFetch::new();
        let url = format!("{}/data.json", mock_server.uri());
        let response = fetch_ok(&fetch, &url).await.unwrap();
        assert_eq!(response.status, 200);
        let json: serde_json::Value = response.json().unwrap();
        assert!(json["tested"].is_array());
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
            .mount(&mock_server)
            .await;

        let fetch = ReqwestFetch::new();
        let err = fetch_ok(&fetch, &mock_server.uri()).await.unwrap_err();
        match err {
            RefreshError::UpstreamUnavailable {
                code, status, body, ..
            } => {
                assert_eq!(code, 503);
                assert_eq!(status, "Service Unavailable");
                assert_eq!(body, "down for maintenance");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_post_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/annotate"))
            .and(header("Content-Type", "application/json"))
            .and(body_string(r#"{"patients":[]}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&mock_server)
            .await;

        let fetch = ReqwestFetch::new();
        let request = FetchRequest::post_json(
            format!("{}/annotate", mock_server.uri()),
            r#"{"patients":[]}"#.to_string(),
        );
        let response = fetch.fetch(request).await.unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let response = FetchResponse {
            url: "http://upstream".into(),
            status: 200,
            status_text: "OK".into(),
            body: "<html>".into(),
        };
        let result: Result<serde_json::Value, _> = response.json();
        assert!(matches!(result, Err(RefreshError::MalformedShape(_))));
    }
}
