//! Single-image spoof detection.
//!
//! Four independent heuristics look for the artifacts left when a face is
//! re-photographed from a screen or a print. Each triggered heuristic adds a
//! fixed weight to the score; the image is rejected once the score reaches
//! the decision threshold.
//!
//! | signal | weight |
//! |---|---|
//! | periodic high-frequency energy (moiré / pixel grid) | 35 |
//! | overexposed specular highlights (glare) | 25 |
//! | flat colour variance (lost dynamic range) | 20 |
//! | long straight edges (bezel / paper border) | 20 |

use crate::edges::{self, CannyParams, HoughParams};
use crate::image_ops;
use crate::spectrum;
use image::{DynamicImage, RgbImage};
use serde::Serialize;

const AUTHENTIC_REASON: &str = "image appears authentic";

/// Tunable thresholds and weights for [`SpoofDetector`].
#[derive(Debug, Clone)]
pub struct SpoofConfig {
    /// Score at or above which an image is rejected.
    pub decision_threshold: u32,

    /// A spectrum entry is a peak when above `peak_factor × mean`.
    pub peak_factor: f64,
    /// Fraction of pixels that must be peaks.
    pub peak_fraction: f64,
    pub frequency_weight: u32,

    /// Grayscale level above which a pixel counts as overexposed.
    pub bright_level: u8,
    /// Percentage (0–100) of overexposed pixels that triggers the signal.
    pub bright_percentage: f64,
    pub glare_weight: u32,

    /// Mean per-channel variance below which the image is considered flat.
    pub min_color_variance: f64,
    pub flatness_weight: u32,

    pub canny: CannyParams,
    pub hough: HoughParams,
    /// More than this many straight segments triggers the signal.
    pub max_straight_lines: usize,
    pub edge_weight: u32,
}

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 65,
            peak_factor: 1.5,
            peak_fraction: 0.01,
            frequency_weight: 35,
            bright_level: 245,
            bright_percentage: 0.5,
            glare_weight: 25,
            min_color_variance: 1500.0,
            flatness_weight: 20,
            canny: CannyParams { low: 50.0, high: 150.0 },
            hough: HoughParams {
                rho: 1.0,
                theta: std::f64::consts::PI / 180.0,
                threshold: 80,
                min_line_length: 100,
                max_line_gap: 10,
            },
            max_straight_lines: 2,
            edge_weight: 20,
        }
    }
}

/// One triggered heuristic, with the measurement that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SpoofSignal {
    HighFrequency { peaks: usize, total: usize },
    Glare { percentage: f64 },
    FlatColor { variance: f64 },
    StraightEdges { lines: usize },
}

impl SpoofSignal {
    pub fn describe(&self) -> String {
        match self {
            SpoofSignal::HighFrequency { .. } => {
                "high-frequency pattern detected (possible screen)".to_string()
            }
            SpoofSignal::Glare { percentage } => {
                format!("reflections or overexposed areas detected ({percentage:.2}%)")
            }
            SpoofSignal::FlatColor { variance } => format!("low color variance ({variance:.1})"),
            SpoofSignal::StraightEdges { lines } => {
                format!("straight edges detected ({lines}), possible screen frame")
            }
        }
    }
}

/// Evidence trail of one spoof analysis.
#[derive(Debug, Clone, Serialize)]
pub struct SpoofAnalysis {
    pub score: u32,
    pub is_spoof: bool,
    /// Triggered signals when spoofing; otherwise a single authentic marker.
    /// Carries the decode error when `evaluated` is false.
    pub reasons: Vec<String>,
    /// Every triggered signal, regardless of the decision.
    pub signals: Vec<SpoofSignal>,
    /// False when the image could not be decoded and nothing was measured.
    pub evaluated: bool,
}

impl SpoofAnalysis {
    /// Result for an image that could not be read. Not a spoof, not authentic.
    pub fn undetermined(error: impl std::fmt::Display) -> Self {
        Self {
            score: 0,
            is_spoof: false,
            reasons: vec![format!("could not decode image: {error}")],
            signals: Vec::new(),
            evaluated: false,
        }
    }
}

/// Heuristic photo-of-a-photo detector. Stateless and deterministic.
#[derive(Debug, Clone, Default)]
pub struct SpoofDetector {
    config: SpoofConfig,
}

impl SpoofDetector {
    pub fn new(config: SpoofConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpoofConfig {
        &self.config
    }

    /// Decode and analyze an encoded image (JPEG, PNG, ...).
    pub fn analyze_bytes(&self, bytes: &[u8]) -> SpoofAnalysis {
        match image::load_from_memory(bytes) {
            Ok(img) => self.analyze(&img),
            Err(e) => {
                tracing::warn!(error = %e, "spoof analysis skipped: image could not be decoded");
                SpoofAnalysis::undetermined(e)
            }
        }
    }

    /// Run all four heuristics on a decoded image.
    pub fn analyze(&self, image: &DynamicImage) -> SpoofAnalysis {
        let rgb = image.to_rgb8();
        self.analyze_rgb(&rgb)
    }

    pub fn analyze_rgb(&self, rgb: &RgbImage) -> SpoofAnalysis {
        let cfg = &self.config;
        let gray = image_ops::to_grayscale(rgb);
        let total = gray.as_raw().len();

        let mut score = 0u32;
        let mut signals = Vec::new();

        // Periodic high-frequency energy
        let spectrum = spectrum::log_magnitude_spectrum(&gray);
        let peaks = spectrum::count_peaks(&spectrum, cfg.peak_factor);
        if peaks as f64 > total as f64 * cfg.peak_fraction {
            score += cfg.frequency_weight;
            signals.push(SpoofSignal::HighFrequency { peaks, total });
        }

        // Specular highlights
        let percentage = image_ops::bright_pixel_percentage(&gray, cfg.bright_level);
        if percentage > cfg.bright_percentage {
            score += cfg.glare_weight;
            signals.push(SpoofSignal::Glare { percentage });
        }

        // Colour flatness
        let variance = image_ops::channel_variance(rgb).iter().sum::<f64>() / 3.0;
        if variance < cfg.min_color_variance {
            score += cfg.flatness_weight;
            signals.push(SpoofSignal::FlatColor { variance });
        }

        // Straight edges
        let edge_map = edges::canny(&gray, cfg.canny);
        let lines = edges::hough_lines_p(&edge_map, cfg.hough).len();
        if lines > cfg.max_straight_lines {
            score += cfg.edge_weight;
            signals.push(SpoofSignal::StraightEdges { lines });
        }

        let is_spoof = score >= cfg.decision_threshold;
        let reasons = if is_spoof {
            signals.iter().map(SpoofSignal::describe).collect()
        } else {
            vec![AUTHENTIC_REASON.to_string()]
        };

        tracing::debug!(
            score,
            is_spoof,
            peaks,
            bright_pct = percentage,
            variance,
            lines,
            "spoof analysis"
        );

        SpoofAnalysis {
            score,
            is_spoof,
            reasons,
            signals,
            evaluated: true,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn analyze(img: &RgbImage) -> SpoofAnalysis {
        SpoofDetector::default().analyze_rgb(img)
    }

    fn kinds(analysis: &SpoofAnalysis) -> Vec<&'static str> {
        analysis
            .signals
            .iter()
            .map(|s| match s {
                SpoofSignal::HighFrequency { .. } => "frequency",
                SpoofSignal::Glare { .. } => "glare",
                SpoofSignal::FlatColor { .. } => "flat",
                SpoofSignal::StraightEdges { .. } => "edges",
            })
            .collect()
    }

    #[test]
    fn test_noise_triggers_nothing() {
        let a = analyze(&noise(1));
        assert_eq!(a.score, 0, "signals: {:?}", a.signals);
        assert!(!a.is_spoof);
        assert!(a.evaluated);
        assert_eq!(a.reasons, vec![AUTHENTIC_REASON.to_string()]);
    }

    #[test]
    fn test_frequency_signal_alone() {
        let a = analyze(&column_pattern(0, 200));
        assert_eq!(kinds(&a), vec!["frequency"]);
        assert_eq!(a.score, 35);
        assert!(!a.is_spoof);
    }

    #[test]
    fn test_glare_signal_alone() {
        let a = analyze(&noise_with_glare());
        assert_eq!(kinds(&a), vec!["glare"]);
        assert_eq!(a.score, 25);
        assert!(!a.is_spoof);
    }

    #[test]
    fn test_flat_signal_alone() {
        let a = analyze(&flat());
        assert_eq!(kinds(&a), vec!["flat"]);
        assert_eq!(a.score, 20);
        assert!(!a.is_spoof);
        assert_eq!(a.reasons, vec![AUTHENTIC_REASON.to_string()]);
    }

    #[test]
    fn test_edge_signal_alone() {
        let a = analyze(&bands());
        assert_eq!(kinds(&a), vec!["edges"]);
        assert_eq!(a.score, 20);
        assert!(!a.is_spoof);
    }

    #[test]
    fn test_frequency_and_glare_below_threshold() {
        // 35 + 25 = 60
        let a = analyze(&column_pattern(0, 250));
        assert_eq!(kinds(&a), vec!["frequency", "glare"]);
        assert_eq!(a.score, 60);
        assert!(!a.is_spoof);
    }

    #[test]
    fn test_frequency_and_flat_below_threshold() {
        // 35 + 20 = 55
        let a = analyze(&column_pattern(100, 160));
        assert_eq!(kinds(&a), vec!["frequency", "flat"]);
        assert_eq!(a.score, 55);
        assert!(!a.is_spoof);
    }

    #[test]
    fn test_three_signals_reject() {
        // 35 + 25 + 20 = 80
        let a = analyze(&column_pattern(220, 250));
        assert_eq!(kinds(&a), vec!["frequency", "glare", "flat"]);
        assert_eq!(a.score, 80);
        assert!(a.is_spoof);
        assert_eq!(a.reasons.len(), 3);
        assert!(a.reasons[0].contains("high-frequency"));
        assert!(a.reasons[1].contains('%'));
    }

    #[test]
    fn test_edges_flat_glare_reject_at_threshold() {
        // 20 + 20 + 25 = 65, exactly the decision threshold
        let a = analyze(&screen_bands());
        assert_eq!(kinds(&a), vec!["glare", "flat", "edges"]);
        assert_eq!(a.score, 65);
        assert!(a.is_spoof);
        assert_eq!(a.reasons.len(), 3);
        assert!(a.reasons[2].starts_with("straight edges detected"));
    }

    #[test]
    fn test_one_below_threshold_accepts() {
        let detector = SpoofDetector::new(SpoofConfig { decision_threshold: 66, ..Default::default() });
        let a = detector.analyze_rgb(&screen_bands());
        assert_eq!(a.score, 65);
        assert!(!a.is_spoof);
        assert_eq!(a.reasons, vec![AUTHENTIC_REASON.to_string()]);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let detector = SpoofDetector::new(SpoofConfig { decision_threshold: 20, ..Default::default() });
        let a = detector.analyze_rgb(&flat());
        assert!(a.is_spoof);
        assert_eq!(a.reasons, vec!["low color variance (0.0)".to_string()]);
    }

    #[test]
    fn test_deterministic() {
        let img = column_pattern(0, 250);
        let a = analyze(&img);
        let b = analyze(&img);
        assert_eq!(a.score, b.score);
        assert_eq!(a.signals, b.signals);
    }

    #[test]
    fn test_analyze_bytes_roundtrip_png() {
        let a = SpoofDetector::default().analyze_bytes(&png_bytes(&flat()));
        assert!(a.evaluated);
        assert_eq!(a.score, 20);
    }

    #[test]
    fn test_undecodable_bytes_marked_unevaluated() {
        let a = SpoofDetector::default().analyze_bytes(b"definitely not an image");
        assert!(!a.evaluated);
        assert!(!a.is_spoof);
        assert_eq!(a.score, 0);
        assert!(a.reasons[0].starts_with("could not decode image"));
        assert_ne!(a.reasons[0], AUTHENTIC_REASON);
    }
}
