use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// Outcome of a single identification request.
///
/// Every expected outcome has its own variant; callers never inspect message text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identification {
    /// The probe matched a reference image owned by this employee.
    Employee { employee_id: String, distance: f32 },
    /// The search ran but no reference image was close enough.
    Unknown,
    /// The authenticity check failed; the embedding search was not run.
    SpoofRejected { score: u32, reasons: Vec<String> },
    Error(IdentifyError),
}

impl Identification {
    /// Stable machine-readable code for this outcome.
    pub fn code(&self) -> &'static str {
        match self {
            Identification::Employee { .. } => "matched",
            Identification::Unknown => "unknown",
            Identification::SpoofRejected { .. } => "spoof_detected",
            Identification::Error(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum IdentifyError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("no clear face detected in the image")]
    NoFaceDetected,
    #[error("face recognition is not available: {0}")]
    CapabilityUnavailable(String),
    #[error("face search failed: {0}")]
    SearchFailure(String),
}

impl IdentifyError {
    pub fn code(&self) -> &'static str {
        match self {
            IdentifyError::Decode(_) => "decode_error",
            IdentifyError::NoFaceDetected => "no_face_detected",
            IdentifyError::CapabilityUnavailable(_) => "capability_unavailable",
            IdentifyError::SearchFailure(_) => "search_failure",
        }
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identification::Employee { employee_id, distance } => {
                write!(f, "employee {employee_id} (distance {distance:.3})")
            }
            Identification::Unknown => f.write_str("unknown"),
            Identification::SpoofRejected { reasons, .. } => {
                write!(f, "spoof detected: {}", reasons.join("; "))
            }
            Identification::Error(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_outcome_codes_are_distinct() {
        let outcomes = [
            Identification::Employee { employee_id: "E1".into(), distance: 0.1 },
            Identification::Unknown,
            Identification::SpoofRejected { score: 80, reasons: vec![] },
            Identification::Error(IdentifyError::Decode("bad".into())),
            Identification::Error(IdentifyError::NoFaceDetected),
            Identification::Error(IdentifyError::CapabilityUnavailable("x".into())),
            Identification::Error(IdentifyError::SearchFailure("x".into())),
        ];
        let mut codes: Vec<_> = outcomes.iter().map(|o| o.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), outcomes.len());
    }

    #[test]
    fn test_identification_serializes_tagged() {
        let json = serde_json::to_value(Identification::Unknown).unwrap();
        assert_eq!(json["outcome"], "unknown");

        let json = serde_json::to_value(Identification::Error(IdentifyError::NoFaceDetected)).unwrap();
        assert_eq!(json["outcome"], "error");
    }
}
