//! Enrollment records as stored in the remote document collection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One document of the enrollment collection, as received.
///
/// Deserializing never fails: mistyped fields read as absent, so a bad
/// record is rejected by [`RemoteRecord::validate`] instead of failing the
/// whole collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct RemoteRecord {
    /// Document id. Used to name the downloaded files.
    pub id: String,
    #[serde(rename = "employeeId")]
    pub employee_id: Option<String>,
    /// Expected to be a list of image URLs; anything else is rejected at validation.
    #[serde(rename = "datosFaciales")]
    pub facial_data: Option<Value>,
}

impl From<Value> for RemoteRecord {
    fn from(mut value: Value) -> Self {
        let id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        // Current field first, then the legacy Spanish name
        let employee_id = ["employeeId", "empleadoId"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string));
        let facial_data = value.get_mut("datosFaciales").map(Value::take);

        Self { id, employee_id, facial_data }
    }
}

/// A record that passed validation: where its images go and where to get them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRecord {
    pub record_id: String,
    pub employee_id: String,
    /// `(position in the original list, url)`; the position names the file.
    pub image_urls: Vec<(usize, String)>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record {record_id} has no employee id")]
    MissingEmployeeId { record_id: String },
    #[error("record {record_id}: employee id {employee_id:?} is not a valid directory name")]
    InvalidEmployeeId { record_id: String, employee_id: String },
    #[error("record id {record_id:?} (employee {employee_id}) is not a valid file name")]
    InvalidRecordId { record_id: String, employee_id: String },
    #[error("record {record_id} (employee {employee_id}) has no facial data")]
    NoFacialData { record_id: String, employee_id: String },
    #[error("record {record_id} (employee {employee_id}): facial data is a {found}, not a list")]
    FacialDataNotAList {
        record_id: String,
        employee_id: String,
        found: &'static str,
    },
}

impl RemoteRecord {
    /// Check the record and extract its usable image URLs.
    ///
    /// Non-string and empty entries of the URL list are dropped silently;
    /// their positions are not reused.
    pub fn validate(&self) -> Result<EnrollmentRecord, RecordError> {
        let employee_id = match self.employee_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(RecordError::MissingEmployeeId { record_id: self.id.clone() });
            }
        };

        if !is_safe_path_component(&employee_id) {
            return Err(RecordError::InvalidEmployeeId { record_id: self.id.clone(), employee_id });
        }

        let record_id = if self.id.is_empty() { employee_id.clone() } else { self.id.clone() };
        if !is_safe_path_component(&record_id) {
            return Err(RecordError::InvalidRecordId { record_id, employee_id });
        }

        let entries = match &self.facial_data {
            Some(Value::Array(entries)) if !entries.is_empty() => entries,
            None | Some(Value::Null) | Some(Value::Array(_)) => {
                return Err(RecordError::NoFacialData { record_id, employee_id });
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(RecordError::NoFacialData { record_id, employee_id });
            }
            Some(other) => {
                return Err(RecordError::FacialDataNotAList {
                    record_id,
                    employee_id,
                    found: json_type_name(other),
                });
            }
        };

        let image_urls = entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| match entry {
                Value::String(url) if !url.is_empty() => Some((idx, url.clone())),
                _ => None,
            })
            .collect();

        Ok(EnrollmentRecord { record_id, employee_id, image_urls })
    }
}

/// A single, ordinary path component that is not hidden.
fn is_safe_path_component(name: &str) -> bool {
    !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
