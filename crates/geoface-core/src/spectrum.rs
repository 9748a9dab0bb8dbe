//! 2D frequency analysis of grayscale images.

use image::GrayImage;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Log-magnitude spectrum of a grayscale image, zero frequency shifted to the centre.
///
/// Each entry is `20 * ln(|F(u, v)| + 1)`. Returned row-major, same
/// dimensions as the input.
pub fn log_magnitude_spectrum(gray: &GrayImage) -> Vec<f64> {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let mut data: Vec<Complex<f64>> = gray
        .as_raw()
        .iter()
        .map(|&p| Complex::new(p as f64, 0.0))
        .collect();

    let mut planner = FftPlanner::<f64>::new();

    // Rows
    let row_fft = planner.plan_fft_forward(w);
    for row in data.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    // Columns, via a scratch column buffer
    let col_fft = planner.plan_fft_forward(h);
    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = data[y * w + x];
        }
        col_fft.process(&mut column);
        for y in 0..h {
            data[y * w + x] = column[y];
        }
    }

    let magnitude: Vec<f64> = data.iter().map(|c| 20.0 * (c.norm() + 1.0).ln()).collect();
    fft_shift(&magnitude, w, h)
}

/// Move the zero-frequency entry from (0, 0) to (w/2, h/2).
pub fn fft_shift(values: &[f64], w: usize, h: usize) -> Vec<f64> {
    let mut shifted = vec![0.0; values.len()];
    let (sx, sy) = (w / 2, h / 2);
    for y in 0..h {
        let dy = (y + sy) % h;
        for x in 0..w {
            let dx = (x + sx) % w;
            shifted[dy * w + dx] = values[y * w + x];
        }
    }
    shifted
}

/// Count spectrum entries strictly above `factor` times the spectrum mean.
pub fn count_peaks(spectrum: &[f64], factor: f64) -> usize {
    if spectrum.is_empty() {
        return 0;
    }
    let mean = spectrum.iter().sum::<f64>() / spectrum.len() as f64;
    let cutoff = mean * factor;
    spectrum.iter().filter(|&&v| v > cutoff).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_uniform_image_only_dc() {
        let gray = GrayImage::from_pixel(16, 16, Luma([100]));
        let spectrum = log_magnitude_spectrum(&gray);
        assert_eq!(spectrum.len(), 256);

        // DC lands at the centre after the shift: 20 * ln(256 * 100 + 1)
        let dc = spectrum[8 * 16 + 8];
        let expected = 20.0 * (25_601.0f64).ln();
        assert!((dc - expected).abs() < 1e-6, "dc = {dc}, expected {expected}");

        let others = spectrum.iter().enumerate().filter(|(i, _)| *i != 8 * 16 + 8);
        for (_, v) in others {
            assert!(*v < 1e-6, "non-DC energy {v}");
        }
        assert_eq!(count_peaks(&spectrum, 1.5), 1);
    }

    #[test]
    fn test_vertical_grating_peaks_on_horizontal_axis() {
        // Columns alternate 0 / 200 → energy at DC and the horizontal Nyquist bin.
        let gray = GrayImage::from_fn(8, 4, |x, _| if x % 2 == 0 { Luma([0]) } else { Luma([200]) });
        let spectrum = log_magnitude_spectrum(&gray);
        assert_eq!(count_peaks(&spectrum, 1.5), 2);
        // Shifted DC at (4, 2), Nyquist column 4 → shifted to column 0 on the same row.
        assert!(spectrum[2 * 8 + 4] > 1.0);
        assert!(spectrum[2 * 8] > 1.0);
    }

    #[test]
    fn test_fft_shift_odd_size() {
        // 3x1: [a, b, c] → centre index 1 receives a.
        let shifted = fft_shift(&[1.0, 2.0, 3.0], 3, 1);
        assert_eq!(shifted, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_empty_image() {
        let gray = GrayImage::new(0, 0);
        assert!(log_magnitude_spectrum(&gray).is_empty());
        assert_eq!(count_peaks(&[], 1.5), 0);
    }
}
