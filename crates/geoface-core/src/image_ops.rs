//! Pixel-level helpers shared by the spoof detector and the face models:
//! BT.601 grayscale, per-channel statistics, bilinear resampling.

use image::{GrayImage, RgbImage};

// Fixed-point BT.601 weights (scaled by 2^14), matching OpenCV's RGB→GRAY.
const GRAY_R: u32 = 4899;
const GRAY_G: u32 = 9617;
const GRAY_B: u32 = 1868;
const GRAY_SHIFT: u32 = 14;

/// Convert an RGB image to 8-bit grayscale using `0.299 R + 0.587 G + 0.114 B`.
///
/// `image`'s own `to_luma8` uses Rec. 709 weights, which shifts the
/// overexposure threshold for saturated colours.
pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (src, dst) in rgb.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = (r as u32 * GRAY_R + g as u32 * GRAY_G + b as u32 * GRAY_B + (1 << (GRAY_SHIFT - 1)))
            >> GRAY_SHIFT;
        dst.0[0] = y.min(255) as u8;
    }
    gray
}

/// Population variance of each RGB channel.
pub fn channel_variance(rgb: &RgbImage) -> [f64; 3] {
    let n = (rgb.width() as u64 * rgb.height() as u64) as f64;
    if n == 0.0 {
        return [0.0; 3];
    }

    let mut sum = [0.0f64; 3];
    let mut sum_sq = [0.0f64; 3];
    for px in rgb.pixels() {
        for c in 0..3 {
            let v = px.0[c] as f64;
            sum[c] += v;
            sum_sq[c] += v * v;
        }
    }

    std::array::from_fn(|c| {
        let mean = sum[c] / n;
        (sum_sq[c] / n - mean * mean).max(0.0)
    })
}

/// Percentage (0–100) of grayscale pixels strictly above `threshold`.
pub fn bright_pixel_percentage(gray: &GrayImage, threshold: u8) -> f64 {
    let total = gray.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let bright = gray.as_raw().iter().filter(|&&p| p > threshold).count();
    bright as f64 / total as f64 * 100.0
}

/// Resize an RGB image with bilinear interpolation (pixel-centre aligned).
pub fn resize_bilinear(rgb: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let mut out = RgbImage::new(new_w, new_h);
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return out;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;
    let src = rgb.as_raw();

    for y in 0..new_h as usize {
        // Half-pixel centres; the first output rows replicate the border
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - src_y.floor();

        for x in 0..new_w as usize {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - src_x.floor();

            let dst = out.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                let tl = src[(y0 * width + x0) * 3 + c] as f32;
                let tr = src[(y0 * width + x1) * 3 + c] as f32;
                let bl = src[(y1 * width + x0) * 3 + c] as f32;
                let br = src[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                dst.0[c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
