//! Batched enrichment of patient records through an external text
//! annotation service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use crate::errors::RefreshError;
use crate::fetch::{FetchRequest, HttpFetch};
use crate::metrics_defs::ENRICHMENT_BATCHES;
use crate::types::PatientRecord;
use shared::counter;

/// Upper bound on patients per annotation request.
pub const BATCH_SIZE: usize = 500;

const PATIENT_ID_KEY: &str = "patientId";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationInput {
    pub patient_id: i64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRequest {
    pub patients: Vec<AnnotationInput>,
}

/// Each entry maps a patient id (as a string key) to the fields to merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationResponse {
    #[serde(default)]
    pub patients: Vec<Map<String, JsonValue>>,
}

#[async_trait]
pub trait AnnotationService: Send + Sync {
    async fn annotate(&self, request: AnnotationRequest) -> Result<AnnotationResponse, RefreshError>;
}

pub struct HttpAnnotationService {
    fetch: Arc<dyn HttpFetch>,
    url: Url,
}

impl HttpAnnotationService {
    pub fn new(fetch: Arc<dyn HttpFetch>, url: Url) -> Self {
        HttpAnnotationService { fetch, url }
    }
}

#[async_trait]
impl AnnotationService for HttpAnnotationService {
    async fn annotate(&self, request: AnnotationRequest) -> Result<AnnotationResponse, RefreshError> {
        let body = serde_json::to_string(&request)?;
        let response = self
            .fetch
            .fetch(FetchRequest::post_json(self.url.as_str(), body))
            .await?;

        if response.status != 200 {
            return Err(RefreshError::EnrichmentFailure {
                code: response.status,
                body: response.body,
            });
        }
        response.json()
    }
}

/// Sends `records` to `service` in sequential batches of `BATCH_SIZE` and
/// shallow-merges the returned fields into the record with the matching
/// patient id. Any failed batch aborts the whole enrichment and leaves
/// `records` untouched.
pub async fn enrich(
    records: Vec<PatientRecord>,
    service: &dyn AnnotationService,
) -> Result<Vec<PatientRecord>, RefreshError> {
    let mut annotations: Vec<Map<String, JsonValue>> = Vec::new();

    for batch in records.chunks(BATCH_SIZE) {
        let request = AnnotationRequest {
            patients: batch
                .iter()
                .filter_map(|r| {
                    Some(AnnotationInput {
                        patient_id: r.patient_id?,
                        notes: r.notes.clone().unwrap_or_default(),
                    })
                })
                .collect(),
        };
        let size = request.patients.len();

        let response = service.annotate(request).await?;
        counter!(ENRICHMENT_BATCHES).increment(1);
        tracing::debug!(size, returned = response.patients.len(), "Annotated batch");
        annotations.extend(response.patients);
    }

    let mut records = records;
    let index: HashMap<i64, usize> = records
        .iter()
        .enumerate()
        .filter_map(|(pos, r)| Some((r.patient_id?, pos)))
        .collect();
    for entry in annotations {
        for (id, fields) in entry {
            let Ok(id) = id.trim().parse::<i64>() else {
                tracing::warn!(id, "Ignoring annotation for unparseable patient id");
                continue;
            };
            let JsonValue::Object(fields) = fields else {
                continue;
            };
            if let Some(&pos) = index.get(&id) {
                merge_fields(&mut records[pos], fields)?;
            }
        }
    }
    Ok(records)
}

/// Shallow merge: top-level keys in `fields` overwrite the record's. A value
/// whose type does not fit the matching record field replaces that field as
/// a free-form annotation.
fn merge_fields(record: &mut PatientRecord, fields: Map<String, JsonValue>) -> Result<(), RefreshError> {
    let JsonValue::Object(mut merged) = serde_json::to_value(&*record)? else {
        return Err(RefreshError::MalformedShape(
            "patient record did not serialize to an object".to_string(),
        ));
    };
    let id = record.patient_id;
    let mut untyped = Map::new();

    for (key, value) in fields {
        // The identity is never rewritten by an annotation.
        if key == PATIENT_ID_KEY {
            continue;
        }
        let single = JsonValue::Object(Map::from_iter([(key.clone(), value.clone())]));
        if serde_json::from_value::<PatientRecord>(single).is_ok() {
            merged.insert(key, value);
        } else {
            merged.remove(&key);
            untyped.insert(key, value);
        }
    }

    let mut updated: PatientRecord = serde_json::from_value(JsonValue::Object(merged))?;
    updated.patient_id = id;
    updated.annotations.extend(untyped);
    *record = updated;
    Ok(())
}
