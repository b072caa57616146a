//! Access to the crowd sourced spreadsheets.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use crate::errors::RefreshError;
use crate::fetch::{FetchRequest, HttpFetch};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// A grid of cells: the header row followed by the data rows. Trailing empty
/// cells of a row may be missing.
pub type Grid = Vec<Vec<String>>;

#[async_trait]
pub trait SpreadsheetSource: Send + Sync {
    /// A short name identifying the sheet in logs and record sources.
    fn name(&self) -> &str;

    async fn rows(&self, range: &str) -> Result<Grid, RefreshError>;
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Reads cell values through the Sheets v4 values endpoint using an API key.
pub struct GoogleSheetsSource {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
    spreadsheet_id: String,
    api_key: String,
}

impl GoogleSheetsSource {
    pub fn new(fetch: Arc<dyn HttpFetch>, spreadsheet_id: String, api_key: String) -> Self {
        GoogleSheetsSource {
            fetch,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id,
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, range: &str) -> Result<Url, RefreshError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RefreshError::ParseFailure(format!("invalid sheets URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RefreshError::ParseFailure("sheets URL cannot be a base".into()))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[async_trait]
impl SpreadsheetSource for GoogleSheetsSource {
    fn name(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn rows(&self, range: &str) -> Result<Grid, RefreshError> {
        let url = self.values_url(range)?;
        let response = self
            .fetch
            .fetch(FetchRequest::get(url.as_str()))
            .await?
            .error_for_status()?;
        let value_range: ValueRange = response.json()?;

        let grid: Grid = value_range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();

        tracing::debug!(sheet = %self.spreadsheet_id, range, rows = grid.len(), "Fetched sheet");
        Ok(grid)
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ReqwestFetch;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_rows() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sheet-1/values/Raw_Data!A:O"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"range":"Raw_Data!A1:O3","values":[["Patient Number","Notes"],["1",null],[2,"x"]]}"#,
            ))
            .mount(&mock_server)
            .await;

        let source = GoogleSheetsSource::new(
            Arc::new(ReqwestFetch::new()),
            "sheet-1".into(),
            "secret".into(),
        )
        .with_base_url(&mock_server.uri());

        let grid = source.rows("Raw_Data!A:O").await.unwrap();
        assert_eq!(
            grid,
            vec![
                vec!["Patient Number".to_string(), "Notes".to_string()],
                vec!["1".to_string(), String::new()],
                vec!["2".to_string(), "x".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_rows_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let source = GoogleSheetsSource::new(
            Arc::new(ReqwestFetch::new()),
            "sheet-1".into(),
            "secret".into(),
        )
        .with_base_url(&mock_server.uri());

        let err = source.rows("Raw_Data!A:O").await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::UpstreamUnavailable { code: 403, .. }
        ));
    }
}
