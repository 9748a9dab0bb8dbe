//! Canny edge detection and progressive probabilistic Hough line extraction.
//!
//! Both follow the classic OpenCV formulations so that thresholds tuned
//! against them carry over: Sobel 3×3 with L1 gradient magnitude, 4-direction
//! non-maximum suppression with asymmetric tie-breaking, 8-connected
//! hysteresis, and the Matas/Galambos/Kittler randomized Hough transform
//! driven by the same seeded generator as OpenCV.

use image::GrayImage;
use std::f64::consts::PI;

/// Canny parameters.
#[derive(Debug, Clone, Copy)]
pub struct CannyParams {
    pub low: f32,
    pub high: f32,
}

/// Probabilistic Hough parameters.
#[derive(Debug, Clone, Copy)]
pub struct HoughParams {
    /// Distance resolution in pixels.
    pub rho: f64,
    /// Angle resolution in radians.
    pub theta: f64,
    /// Minimum accumulator votes for a line candidate.
    pub threshold: u32,
    pub min_line_length: i32,
    pub max_line_gap: i32,
}

/// A detected line segment, endpoints inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// Binary edge map (`true` = edge pixel), row-major.
pub struct EdgeMap {
    pub width: usize,
    pub height: usize,
    pub edges: Vec<bool>,
}

impl EdgeMap {
    pub fn count(&self) -> usize {
        self.edges.iter().filter(|&&e| e).count()
    }
}

// tan(22.5°), for quantizing gradient direction.
const TAN_22_5: f32 = 0.414_213_56;

/// Run Canny edge detection with a 3×3 Sobel aperture.
pub fn canny(gray: &GrayImage, params: CannyParams) -> EdgeMap {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    let mut edges = vec![false; w * h];
    if w < 3 || h < 3 {
        return EdgeMap { width: w, height: h, edges };
    }

    let px = gray.as_raw();
    // Replicated border
    let at = |x: isize, y: isize| -> i32 {
        let xc = x.clamp(0, w as isize - 1) as usize;
        let yc = y.clamp(0, h as isize - 1) as usize;
        px[yc * w + xc] as i32
    };

    let mut gx = vec![0i32; w * h];
    let mut gy = vec![0i32; w * h];
    let mut mag = vec![0f32; w * h];

    for y in 0..h as isize {
        for x in 0..w as isize {
            let dx = (at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2 * at(x - 1, y) + at(x - 1, y + 1));
            let dy = (at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2 * at(x, y - 1) + at(x + 1, y - 1));
            let i = y as usize * w + x as usize;
            gx[i] = dx;
            gy[i] = dy;
            mag[i] = (dx.abs() + dy.abs()) as f32;
        }
    }

    let m = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            mag[y as usize * w + x as usize]
        }
    };

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    let mut stack = Vec::new();

    for y in 0..h as isize {
        for x in 0..w as isize {
            let i = y as usize * w + x as usize;
            let v = mag[i];
            if v <= params.low {
                continue;
            }

            let ax = gx[i].abs() as f32;
            let ay = gy[i].abs() as f32;
            let is_max = if ay < ax * TAN_22_5 {
                // Horizontal gradient: compare left / right
                v > m(x - 1, y) && v >= m(x + 1, y)
            } else if ay > ax / TAN_22_5 {
                // Vertical gradient: compare up / down
                v > m(x, y - 1) && v >= m(x, y + 1)
            } else {
                let s: isize = if (gx[i] ^ gy[i]) < 0 { -1 } else { 1 };
                v > m(x - s, y - 1) && v > m(x + s, y + 1)
            };

            if !is_max {
                continue;
            }
            if v > params.high {
                class[i] = 2;
                stack.push(i);
            } else {
                class[i] = 1;
            }
        }
    }

    // Hysteresis: grow strong edges through 8-connected weak pixels.
    while let Some(i) = stack.pop() {
        edges[i] = true;
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    EdgeMap { width: w, height: h, edges }
}

/// OpenCV's multiply-with-carry `cv::RNG`, so edge points are visited in the
/// same order as `HoughLinesP`.
struct CvRng(u64);

impl CvRng {
    const COEFF: u64 = 4_164_903_690;

    fn next(&mut self) -> u32 {
        self.0 = (self.0 & 0xFFFF_FFFF) * Self::COEFF + (self.0 >> 32);
        self.0 as u32
    }

    /// Uniform in `0..n`, as `cv::RNG::uniform(0, n)`.
    fn uniform(&mut self, n: usize) -> usize {
        (self.next() % n as u32) as usize
    }
}

const HOUGH_SEED: u64 = u64::MAX;
const SHIFT: i32 = 16;

/// Progressive probabilistic Hough transform over an edge map.
///
/// Edge pixels are visited in a seeded random order. Each vote updates the
/// accumulator; once a bin crosses `threshold`, the corridor along that
/// line is walked in both directions (tolerating up to `max_line_gap` missing
/// pixels), its pixels are removed from the map and, when long enough, the
/// segment is emitted.
pub fn hough_lines_p(map: &EdgeMap, params: HoughParams) -> Vec<LineSegment> {
    let (w, h) = (map.width as i32, map.height as i32);
    if w == 0 || h == 0 || params.rho <= 0.0 || params.theta <= 0.0 {
        return Vec::new();
    }

    let irho = 1.0 / params.rho;
    let num_angle = (PI / params.theta).round() as usize;
    let num_rho = (((w + h) * 2 + 1) as f64 / params.rho).round() as usize;
    let rho_offset = (num_rho as i32 - 1) / 2;

    let trig: Vec<(f64, f64)> = (0..num_angle)
        .map(|n| {
            let ang = n as f64 * params.theta;
            (ang.cos() * irho, ang.sin() * irho)
        })
        .collect();

    let mut accum = vec![0i32; num_angle * num_rho];
    let mut mask = map.edges.clone();
    let mut points: Vec<(i32, i32)> = map
        .edges
        .iter()
        .enumerate()
        .filter(|(_, e)| **e)
        .map(|(i, _)| ((i % map.width) as i32, (i / map.width) as i32))
        .collect();

    let bin = |n: usize, x: i32, y: i32| -> usize {
        let (c, s) = trig[n];
        let r = (x as f64 * c + y as f64 * s).round() as i32 + rho_offset;
        n * num_rho + r.clamp(0, num_rho as i32 - 1) as usize
    };

    let mut rng = CvRng(HOUGH_SEED);
    let mut lines = Vec::new();

    let mut remaining = points.len();
    while remaining > 0 {
        let idx = rng.uniform(remaining);
        let (x, y) = points[idx];
        points.swap(idx, remaining - 1);
        remaining -= 1;

        let pi = (y * w + x) as usize;
        if !mask[pi] {
            continue;
        }

        let mut max_val = params.threshold as i32 - 1;
        let mut max_n = None;
        for n in 0..num_angle {
            let b = bin(n, x, y);
            accum[b] += 1;
            if accum[b] > max_val {
                max_val = accum[b];
                max_n = Some(n);
            }
        }

        let Some(max_n) = max_n else {
            continue;
        };

        // Direction along the line (perpendicular to its normal).
        let a = -trig[max_n].1;
        let b = trig[max_n].0;
        let (mut x0, mut y0) = (x as i64, y as i64);
        let (xflag, dx0, dy0) = if a.abs() > b.abs() {
            y0 = (y0 << SHIFT) + (1 << (SHIFT - 1));
            let step = (b * (1i64 << SHIFT) as f64 / a.abs()).round() as i64;
            (true, if a > 0.0 { 1i64 } else { -1 }, step)
        } else {
            x0 = (x0 << SHIFT) + (1 << (SHIFT - 1));
            let step = (a * (1i64 << SHIFT) as f64 / b.abs()).round() as i64;
            (false, step, if b > 0.0 { 1i64 } else { -1 })
        };

        let to_pixel = |px: i64, py: i64| -> (i32, i32) {
            if xflag {
                (px as i32, (py >> SHIFT) as i32)
            } else {
                ((px >> SHIFT) as i32, py as i32)
            }
        };

        let mut line_end = [(x, y), (x, y)];
        for (k, end) in line_end.iter_mut().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut px, mut py) = (x0, y0);
            let mut gap = 0;
            loop {
                let (j1, i1) = to_pixel(px, py);
                if j1 < 0 || j1 >= w || i1 < 0 || i1 >= h {
                    break;
                }
                if mask[(i1 * w + j1) as usize] {
                    gap = 0;
                    *end = (j1, i1);
                } else {
                    gap += 1;
                    if gap > params.max_line_gap {
                        break;
                    }
                }
                px += dx;
                py += dy;
            }
        }

        let good_line = (line_end[1].0 - line_end[0].0).abs() >= params.min_line_length
            || (line_end[1].1 - line_end[0].1).abs() >= params.min_line_length;

        for (k, end) in line_end.iter().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut px, mut py) = (x0, y0);
            loop {
                let (j1, i1) = to_pixel(px, py);
                if j1 < 0 || j1 >= w || i1 < 0 || i1 >= h {
                    break;
                }
                let mi = (i1 * w + j1) as usize;
                if mask[mi] {
                    if good_line {
                        for n in 0..num_angle {
                            accum[bin(n, j1, i1)] -= 1;
                        }
                    }
                    mask[mi] = false;
                }
                if (j1, i1) == *end {
                    break;
                }
                px += dx;
                py += dy;
            }
        }

        if good_line {
            lines.push(LineSegment {
                x0: line_end[0].0,
                y0: line_end[0].1,
                x1: line_end[1].0,
                y1: line_end[1].1,
            });
        }
    }

    lines
}
