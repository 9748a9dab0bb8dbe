//! Identification pipeline: decode, spoof check, then embedding search.

use crate::gallery::Gallery;
use crate::search::{EmbeddingSearch, SearchError};
use crate::spoof::SpoofDetector;
use crate::types::{Identification, IdentifyError};
use image::RgbImage;

/// Sequences the spoof detector and an embedding search for one request at a time.
///
/// A spoofed image never reaches the search.
pub struct Identifier<S> {
    spoof: SpoofDetector,
    search: Result<S, String>,
}

impl<S: EmbeddingSearch> Identifier<S> {
    /// `search` is the loaded capability, or why it could not be loaded.
    pub fn new(spoof: SpoofDetector, search: Result<S, SearchError>) -> Self {
        let search = search.map_err(|e| {
            tracing::warn!(error = %e, "embedding search unavailable; identifications will fail");
            e.to_string()
        });
        Self { spoof, search }
    }

    pub fn search_available(&self) -> bool {
        self.search.is_ok()
    }

    pub fn spoof_detector(&self) -> &SpoofDetector {
        &self.spoof
    }

    /// Identify the person in an encoded image.
    ///
    /// Undecodable input is an error outcome; it is never passed on as authentic.
    pub fn identify(&mut self, image_bytes: &[u8], gallery: &Gallery) -> Identification {
        match image::load_from_memory(image_bytes) {
            Ok(img) => self.identify_image(&img.to_rgb8(), gallery),
            Err(e) => {
                tracing::warn!(error = %e, bytes = image_bytes.len(), "identification rejected: undecodable image");
                Identification::Error(IdentifyError::Decode(e.to_string()))
            }
        }
    }

    pub fn identify_image(&mut self, probe: &RgbImage, gallery: &Gallery) -> Identification {
        let analysis = self.spoof.analyze_rgb(probe);
        if analysis.is_spoof {
            tracing::info!(score = analysis.score, reasons = ?analysis.reasons, "spoof rejected");
            return Identification::SpoofRejected {
                score: analysis.score,
                reasons: analysis.reasons,
            };
        }

        let search = match self.search.as_mut() {
            Ok(search) => search,
            Err(reason) => return Identification::Error(IdentifyError::CapabilityUnavailable(reason.clone())),
        };

        let candidates = match search.find(probe, gallery) {
            Ok(candidates) => candidates,
            Err(SearchError::NoFaceDetected) => {
                tracing::info!("no face detected in probe");
                return Identification::Error(IdentifyError::NoFaceDetected);
            }
            Err(SearchError::Unavailable(reason)) => {
                return Identification::Error(IdentifyError::CapabilityUnavailable(reason));
            }
            Err(SearchError::Failed(message)) => {
                tracing::error!(error = %message, "embedding search failed");
                return Identification::Error(IdentifyError::SearchFailure(message));
            }
        };

        let Some(best) = candidates.iter().min_by(|a, b| a.distance.total_cmp(&b.distance)) else {
            tracing::info!(spoof_score = analysis.score, "no gallery match");
            return Identification::Unknown;
        };

        match gallery.employee_for(&best.identity) {
            Some(employee_id) => {
                tracing::info!(%employee_id, distance = best.distance, "identified");
                Identification::Employee { employee_id, distance: best.distance }
            }
            None => {
                tracing::warn!(identity = %best.identity.display(), "best candidate is outside every partition");
                Identification::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Candidate;
    use crate::spoof::fixtures::{column_pattern, flat, noise, png_bytes, screen_bands};
    use std::fs;

    /// Compares raw pixels against every reference image. Uniform probes have "no face".
    struct PixelSearch {
        calls: usize,
    }

    impl EmbeddingSearch for PixelSearch {
        fn find(&mut self, probe: &RgbImage, gallery: &Gallery) -> Result<Vec<Candidate>, SearchError> {
            self.calls += 1;
            let first = probe.as_raw()[0];
            if probe.as_raw().iter().all(|&v| v == first) {
                return Err(SearchError::NoFaceDetected);
            }
            let references = gallery.reference_images().map_err(|e| SearchError::Failed(e.to_string()))?;
            let mut candidates: Vec<Candidate> = references
                .into_iter()
                .filter_map(|r| {
                    let reference = image::open(&r.path).ok()?.to_rgb8();
                    if reference.dimensions() != probe.dimensions() {
                        return None;
                    }
                    let diff: u64 = reference
                        .as_raw()
                        .iter()
                        .zip(probe.as_raw())
                        .map(|(a, b)| a.abs_diff(*b) as u64)
                        .sum();
                    let distance = diff as f32 / (probe.as_raw().len() as f32 * 255.0);
                    (distance <= 0.1).then_some(Candidate { identity: r.path, distance })
                })
                .collect();
            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            Ok(candidates)
        }
    }

    /// Returns a fixed result.
    struct FixedSearch(Result<Vec<Candidate>, SearchError>);

    impl EmbeddingSearch for FixedSearch {
        fn find(&mut self, _: &RgbImage, _: &Gallery) -> Result<Vec<Candidate>, SearchError> {
            self.0.clone()
        }
    }

    fn seeded_gallery(dir: &std::path::Path) -> Gallery {
        let gallery = Gallery::open(dir.join("db")).unwrap();
        for (employee, seed) in [("E1", 1), ("E2", 2)] {
            let partition = gallery.root().join(employee);
            fs::create_dir_all(&partition).unwrap();
            fs::write(partition.join("rec_0.png"), png_bytes(&noise(seed))).unwrap();
        }
        gallery
    }

    fn pixel_identifier() -> Identifier<PixelSearch> {
        Identifier::new(SpoofDetector::default(), Ok(PixelSearch { calls: 0 }))
    }

    #[test]
    fn test_enrolled_image_identifies_employee() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        let result = identifier.identify(&png_bytes(&noise(1)), &gallery);
        match result {
            Identification::Employee { employee_id, distance } => {
                assert_eq!(employee_id, "E1");
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected E1, got {other:?}"),
        }
    }

    #[test]
    fn test_unrelated_image_is_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        assert_eq!(identifier.identify(&png_bytes(&noise(5)), &gallery), Identification::Unknown);
        assert_eq!(identifier.search.as_ref().unwrap().calls, 1);
    }

    #[test]
    fn test_spoof_short_circuits_search() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        let result = identifier.identify(&png_bytes(&column_pattern(220, 250)), &gallery);
        match result {
            Identification::SpoofRejected { score, reasons } => {
                assert!(score >= 65);
                assert!(reasons.iter().any(|r| r.contains("high-frequency")));
            }
            other => panic!("expected spoof rejection, got {other:?}"),
        }
        assert_eq!(identifier.search.as_ref().unwrap().calls, 0);
    }

    #[test]
    fn test_screen_capture_rejected_at_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        let result = identifier.identify(&png_bytes(&screen_bands()), &gallery);
        match result {
            Identification::SpoofRejected { score, reasons } => {
                assert_eq!(score, 65);
                assert!(reasons.iter().any(|r| r.starts_with("straight edges detected")));
            }
            other => panic!("expected spoof rejection, got {other:?}"),
        }
        assert_eq!(identifier.search.as_ref().unwrap().calls, 0);
    }

    #[test]
    fn test_no_face_is_dedicated_error() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        let result = identifier.identify(&png_bytes(&flat()), &gallery);
        assert_eq!(result, Identification::Error(IdentifyError::NoFaceDetected));
        assert_eq!(result.code(), "no_face_detected");
        assert_eq!(result.to_string(), "no clear face detected in the image");
    }

    #[test]
    fn test_undecodable_input_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = pixel_identifier();

        let result = identifier.identify(b"definitely not an image", &gallery);
        assert!(matches!(result, Identification::Error(IdentifyError::Decode(_))));
        assert_eq!(identifier.search.as_ref().unwrap().calls, 0);
    }

    #[test]
    fn test_missing_capability() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier: Identifier<PixelSearch> =
            Identifier::new(SpoofDetector::default(), Err(SearchError::Unavailable("models missing".into())));
        assert!(!identifier.search_available());

        let result = identifier.identify(&png_bytes(&noise(1)), &gallery);
        assert_eq!(result.code(), "capability_unavailable");
    }

    #[test]
    fn test_search_failure_carries_message() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let mut identifier = Identifier::new(
            SpoofDetector::default(),
            Ok(FixedSearch(Err(SearchError::Failed("index corrupted".into())))),
        );

        let result = identifier.identify(&png_bytes(&noise(1)), &gallery);
        assert_eq!(result, Identification::Error(IdentifyError::SearchFailure("index corrupted".into())));
    }

    #[test]
    fn test_candidate_outside_partition_is_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let stray = Candidate { identity: gallery.root().join("stray.jpg"), distance: 0.1 };
        let mut identifier = Identifier::new(SpoofDetector::default(), Ok(FixedSearch(Ok(vec![stray]))));

        assert_eq!(identifier.identify(&png_bytes(&noise(1)), &gallery), Identification::Unknown);
    }

    #[test]
    fn test_lowest_distance_candidate_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = seeded_gallery(tmp.path());
        let candidates = vec![
            Candidate { identity: gallery.root().join("E1/rec_0.png"), distance: 0.3 },
            Candidate { identity: gallery.root().join("E2/rec_0.png"), distance: 0.2 },
            Candidate { identity: gallery.root().join("E1/rec_0.png"), distance: 0.5 },
        ];
        let mut identifier = Identifier::new(SpoofDetector::default(), Ok(FixedSearch(Ok(candidates))));

        assert_eq!(
            identifier.identify(&png_bytes(&noise(1)), &gallery),
            Identification::Employee { employee_id: "E2".into(), distance: 0.2 }
        );
    }
}
