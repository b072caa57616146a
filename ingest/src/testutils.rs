use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::errors::RefreshError;
use crate::fetch::{FetchRequest, FetchResponse, HttpFetch};

/// Serves canned responses keyed by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetch {
    responses: Mutex<HashMap<String, (u16, String)>>,
    requests: Mutex<Vec<String>>,
    gate: Option<Gate>,
}

/// Lets a test hold a request open until it calls `release`.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(gate: Gate) -> Self {
        FakeFetch {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpFetch for FakeFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, RefreshError> {
        self.requests.lock().unwrap().push(request.url.clone());

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or((404, "not found".to_string()));

        Ok(FetchResponse {
            url: request.url,
            status,
            status_text: if status == 200 { "OK" } else { "Error" }.to_string(),
            body,
        })
    }
}
