//! Where enrollment records come from.
//!
//! A [`RecordSource`] returns the whole collection in one call. Two are
//! provided: a JSON export on disk and the Firestore REST API.

use crate::record::RemoteRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const FIRESTORE_PAGE_SIZE: u32 = 300;
pub const DEFAULT_COLLECTION: &str = "biometricos";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed records: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("document store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("document store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Fetch every enrollment record.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SourceError>;

    /// Short human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// A JSON array of records exported from the document store.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Io { path: self.path.clone(), source: e })?;
        let records: Vec<RemoteRecord> = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "records loaded from file");
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Firestore collection read through the REST `documents.list` endpoint.
pub struct FirestoreSource {
    client: reqwest::Client,
    base_url: String,
    project: String,
    collection: String,
    token: Option<String>,
}

impl FirestoreSource {
    pub fn new(
        project: impl Into<String>,
        collection: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project: project.into(),
            collection: collection.into(),
            token,
        })
    }

    /// Point at a different API root (emulator).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn list_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url, self.project, self.collection
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

#[async_trait]
impl RecordSource for FirestoreSource {
    async fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SourceError> {
        let url = self.list_url();
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("pageSize", FIRESTORE_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            if let Some(bearer) = &self.token {
                request = request.bearer_auth(bearer);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Status { status: status.as_u16(), body });
            }

            let page: ListDocumentsResponse = response.json().await?;
            tracing::debug!(documents = page.documents.len(), "firestore page received");
            records.extend(page.documents.iter().map(decode_document));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    fn describe(&self) -> String {
        format!("firestore {}/{}", self.project, self.collection)
    }
}

/// Turn a Firestore REST document into a record.
///
/// The document id is the last segment of its resource name.
fn decode_document(doc: &Document) -> RemoteRecord {
    let id = doc.name.rsplit('/').next().unwrap_or_default().to_string();
    let employee_id = ["employeeId", "empleadoId"]
        .iter()
        .find_map(|key| match doc.fields.get(*key).map(decode_value) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        });
    let facial_data = doc.fields.get("datosFaciales").map(decode_value);

    RemoteRecord { id, employee_id, facial_data }
}

/// Unwrap a typed Firestore value (`{"stringValue": "x"}`, ...) into plain JSON.
fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "doubleValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| fields.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
                .unwrap_or_else(Map::new),
        ),
        // stringValue, timestampValue, referenceValue, bytesValue
        _ => inner.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_document() {
        let page: ListDocumentsResponse = serde_json::from_value(json!({
            "documents": [{
                "name": "projects/p/databases/(default)/documents/biometricos/doc42",
                "fields": {
                    "empleadoId": {"stringValue": "E1"},
                    "datosFaciales": {"arrayValue": {"values": [
                        {"stringValue": "https://img/a.jpg"},
                        {"nullValue": null},
                        {"stringValue": "https://img/b.jpg"}
                    ]}}
                }
            }],
            "nextPageToken": "abc"
        }))
        .unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        let record = decode_document(&page.documents[0]);
        assert_eq!(record.id, "doc42");
        assert_eq!(record.employee_id.as_deref(), Some("E1"));
        assert_eq!(
            record.facial_data,
            Some(json!(["https://img/a.jpg", null, "https://img/b.jpg"]))
        );

        let enrollment = record.validate().unwrap();
        assert_eq!(enrollment.image_urls.len(), 2);
        assert_eq!(enrollment.image_urls[1].0, 2);
    }

    #[test]
    fn test_decode_empty_array_and_non_string_id() {
        let doc: Document = serde_json::from_value(json!({
            "name": "a/b/doc1",
            "fields": {
                "employeeId": {"integerValue": "17"},
                "datosFaciales": {"arrayValue": {}}
            }
        }))
        .unwrap();
        let record = decode_document(&doc);
        assert_eq!(record.employee_id, None);
        assert_eq!(record.facial_data, Some(json!([])));
    }

    #[test]
    fn test_decode_scalar_values() {
        assert_eq!(decode_value(&json!({"integerValue": "5"})), json!(5));
        assert_eq!(decode_value(&json!({"booleanValue": true})), json!(true));
        assert_eq!(
            decode_value(&json!({"mapValue": {"fields": {"k": {"stringValue": "v"}}}})),
            json!({"k": "v"})
        );
        assert_eq!(decode_value(&json!("garbage")), Value::Null);
    }

    #[test]
    fn test_empty_page() {
        let page: ListDocumentsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.json");
        std::fs::write(
            &path,
            json!([
                {"id": "d1", "employeeId": "E1", "datosFaciales": ["u1"]},
                {"id": "d2", "empleadoId": "E2", "datosFaciales": "bad"}
            ])
            .to_string(),
        )
        .unwrap();

        let records = JsonFileSource::new(&path).fetch_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].employee_id.as_deref(), Some("E2"));
    }

    #[tokio::test]
    async fn test_json_file_source_missing_file() {
        let err = JsonFileSource::new("/nonexistent/records.json").fetch_all().await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn test_list_url() {
        let source = FirestoreSource::new("proj", DEFAULT_COLLECTION, None, Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            source.list_url(),
            "http://localhost:8080/v1/projects/proj/databases/(default)/documents/biometricos"
        );
    }
}
