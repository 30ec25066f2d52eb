//! Template correlation matching
//!
//! Slides a reference image over a search region and scores every offset with
//! zero-mean normalized cross-correlation on luma. Scores are clamped to
//! `[0, 1]`; an exact copy of the template scores 1.0.

use image::imageops;
use serde::{Deserialize, Serialize};

use super::library::ReferenceImage;
use super::{order_results, round2, select, Found, Frame, MatchResult, OrderBy, Rect};

/// Default acceptance threshold for correlation scores
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Mean absolute RGB difference allowed by colour-sensitive matching
pub const COLOR_TOLERANCE: f64 = 30.0;

/// Pixels of exactly this colour are ignored when `green_mask` is set
pub const MASK_GREEN: [u8; 3] = [0, 255, 0];

const SCORE_EPSILON: f32 = 1e-4;
const VARIANCE_EPSILON: f64 = 1e-6;

/// Parameters for [`template_match`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateParams {
    /// Search region; `None` searches the whole frame
    pub region: Option<Rect>,
    #[serde(alias = "match_threshold")]
    pub threshold: f32,
    /// Reject candidates whose colours drift from the template
    #[serde(alias = "is_color")]
    pub color_sensitive: bool,
    pub order_by: OrderBy,
    pub index: i32,
    /// Exclude pure green template pixels from scoring
    pub green_mask: bool,
}

impl TemplateParams {
    pub fn in_region(region: Rect) -> Self {
        Self {
            region: Some(region),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn color_sensitive(mut self) -> Self {
        self.color_sensitive = true;
        self
    }

    pub fn with_index(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    pub fn with_order(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_green_mask(mut self) -> Self {
        self.green_mask = true;
        self
    }
}

impl Default for TemplateParams {
    fn default() -> Self {
        Self {
            region: None,
            threshold: DEFAULT_THRESHOLD,
            color_sensitive: false,
            order_by: OrderBy::Horizontal,
            index: 0,
            green_mask: false,
        }
    }
}

/// Locate `template` inside `frame`.
///
/// Candidates are deduplicated, ordered by `params.order_by` and picked by
/// `params.index`. `None` means no offset cleared the threshold or the index
/// was out of range.
pub fn template_match(
    frame: &Frame,
    template: &ReferenceImage,
    params: &TemplateParams,
) -> Option<Found> {
    let mut candidates = template_candidates(frame, template, params);
    for candidate in &mut candidates {
        candidate.name.clone_from(&template.name);
    }
    select(candidates, params.index)
}

/// Every deduplicated candidate, ordered, before index selection
pub fn template_candidates(
    frame: &Frame,
    template: &ReferenceImage,
    params: &TemplateParams,
) -> Vec<MatchResult> {
    let (fw, fh) = frame.dimensions();
    let Some(roi) = params.region.unwrap_or(Rect::full(fw, fh)).clamp_to(fw, fh) else {
        return Vec::new();
    };
    let (tw, th) = template.pixels.dimensions();
    if tw == 0 || th == 0 || tw > roi.w || th > roi.h {
        log::trace!(
            "{}: template {}x{} does not fit region {}",
            template.name,
            tw,
            th,
            roi
        );
        return Vec::new();
    }

    let Some(stats) = TemplateStats::new(template, params.green_mask) else {
        log::debug!("{}: template has no usable contrast", template.name);
        return Vec::new();
    };

    let roi_luma = luma_plane(&imageops::crop_imm(frame, roi.x, roi.y, roi.w, roi.h).to_image());
    let integral = stats
        .dense
        .then(|| Integral::new(&roi_luma, roi.w as usize, roi.h as usize));

    let mut raw = Vec::new();
    for oy in 0..=(roi.h - th) {
        for ox in 0..=(roi.w - tw) {
            let window = Window {
                plane: &roi_luma,
                stride: roi.w as usize,
                x: ox as usize,
                y: oy as usize,
            };
            let Some(score) = stats.correlate(&window, integral.as_ref()) else {
                continue;
            };
            if score + SCORE_EPSILON < params.threshold {
                continue;
            }
            let (x, y) = (roi.x + ox, roi.y + oy);
            if params.color_sensitive && !colors_agree(frame, template, x, y) {
                continue;
            }
            raw.push(Candidate { x, y, score });
        }
    }

    let kept = suppress_neighbours(raw, tw / 2, th / 2);
    let total = kept.len();
    let mut results: Vec<MatchResult> = kept
        .into_iter()
        .map(|c| MatchResult {
            rect: Rect::new(c.x, c.y, tw, th),
            score: round2(c.score),
            count: total,
            name: String::new(),
        })
        .collect();
    order_results(&mut results, params.order_by);
    results
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: u32,
    y: u32,
    score: f32,
}

/// Precomputed template terms for the correlation sum
struct TemplateStats {
    /// (dx, dy, centred template value) for every included pixel
    samples: Vec<(usize, usize, f64)>,
    count: f64,
    norm: f64,
    width: usize,
    height: usize,
    /// No pixel is masked out, so window sums can come from the integral
    dense: bool,
}

/// Template-sized window of a luma plane
struct Window<'a> {
    plane: &'a [f64],
    stride: usize,
    x: usize,
    y: usize,
}

/// Summed-area tables of a luma plane and of its squares
struct Integral {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    stride: usize,
}

impl Integral {
    fn new(plane: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        let mut sum_sq = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width {
                let v = plane[y * width + x];
                row += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row;
                sum_sq[at] = sum_sq[at - stride] + row_sq;
            }
        }
        Self {
            sum,
            sum_sq,
            stride,
        }
    }

    /// (sum, sum of squares) over `w` x `h` pixels at `(x, y)`
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let area = |t: &[f64]| {
            t[(y + h) * s + x + w] - t[y * s + x + w] - t[(y + h) * s + x] + t[y * s + x]
        };
        (area(&self.sum), area(&self.sum_sq))
    }
}

impl TemplateStats {
    fn new(template: &ReferenceImage, green_mask: bool) -> Option<Self> {
        let (tw, th) = template.pixels.dimensions();
        let mut included = Vec::with_capacity((tw * th) as usize);
        for (x, y, px) in template.pixels.enumerate_pixels() {
            if template.has_alpha {
                if px[3] <= 127 {
                    continue;
                }
            } else if green_mask && [px[0], px[1], px[2]] == MASK_GREEN {
                continue;
            }
            included.push((x as usize, y as usize, luma(px.0)));
        }
        if included.is_empty() {
            return None;
        }

        let count = included.len() as f64;
        let mean = included.iter().map(|s| s.2).sum::<f64>() / count;
        let samples: Vec<(usize, usize, f64)> = included
            .into_iter()
            .map(|(x, y, v)| (x, y, v - mean))
            .collect();
        let norm = samples.iter().map(|s| s.2 * s.2).sum::<f64>().sqrt();
        if norm * norm < VARIANCE_EPSILON {
            return None;
        }

        Some(Self {
            dense: samples.len() == (tw * th) as usize,
            samples,
            count,
            norm,
            width: tw as usize,
            height: th as usize,
        })
    }

    /// Correlation of the template with `window`.
    ///
    /// `None` when the window is flat, which makes the score undefined.
    fn correlate(&self, window: &Window<'_>, integral: Option<&Integral>) -> Option<f32> {
        let Window { plane, stride, x, y } = *window;
        let (sum, sum_sq, cross) = match integral {
            Some(integral) => {
                let (sum, sum_sq) = integral.window(x, y, self.width, self.height);
                // Flat windows are rejected before touching the pixels
                if sum_sq - sum * sum / self.count < variance_floor(sum_sq) {
                    return None;
                }
                let cross = self
                    .samples
                    .iter()
                    .map(|&(dx, dy, t)| t * plane[(y + dy) * stride + x + dx])
                    .sum::<f64>();
                (sum, sum_sq, cross)
            }
            None => {
                let mut sum = 0.0;
                let mut sum_sq = 0.0;
                let mut cross = 0.0;
                for &(dx, dy, t) in &self.samples {
                    let v = plane[(y + dy) * stride + x + dx];
                    sum += v;
                    sum_sq += v * v;
                    cross += t * v;
                }
                (sum, sum_sq, cross)
            }
        };
        let variance = sum_sq - sum * sum / self.count;
        if variance < variance_floor(sum_sq) {
            return None;
        }
        let r = cross / (self.norm * variance.sqrt());
        if !r.is_finite() {
            return None;
        }
        Some(r.clamp(0.0, 1.0) as f32)
    }
}

/// Variance below which a window counts as flat. Scales with the window's
/// energy to absorb rounding in the summed-area tables.
fn variance_floor(sum_sq: f64) -> f64 {
    VARIANCE_EPSILON.max(sum_sq * 1e-9)
}

fn luma(px: [u8; 4]) -> f64 {
    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
}

fn luma_plane(image: &Frame) -> Vec<f64> {
    image.pixels().map(|px| luma(px.0)).collect()
}

/// Mean absolute RGB difference between the template and the frame window
fn colors_agree(frame: &Frame, template: &ReferenceImage, x: u32, y: u32) -> bool {
    let mut total = 0.0;
    let mut n = 0.0;
    for (tx, ty, tp) in template.pixels.enumerate_pixels() {
        let fp = frame.get_pixel(x + tx, y + ty);
        for c in 0..3 {
            total += (fp[c] as f64 - tp[c] as f64).abs();
            n += 1.0;
        }
    }
    n > 0.0 && total / n <= COLOR_TOLERANCE
}

/// Keep the strongest candidate in each neighbourhood.
///
/// Candidates are visited by descending score; one lying within `rx`/`ry` of
/// an already kept candidate is dropped.
fn suppress_neighbours(mut candidates: Vec<Candidate>, rx: u32, ry: u32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        let near = kept
            .iter()
            .any(|k| k.x.abs_diff(c.x) <= rx && k.y.abs_diff(c.y) <= ry);
        if !near {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> RgbaImage {
        let mut rng = StdRng::seed_from_u64(seed);
        ImageBuffer::from_fn(width, height, |_, _| {
            Rgba([rng.random(), rng.random(), rng.random(), 255])
        })
    }

    fn gray(width: u32, height: u32, v: u8) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |_, _| Rgba([v, v, v, 255]))
    }

    fn paste(frame: &mut RgbaImage, patch: &RgbaImage, x: u32, y: u32) {
        imageops::replace(frame, patch, x as i64, y as i64);
    }

    fn reference(pixels: RgbaImage) -> ReferenceImage {
        ReferenceImage::new("patch", pixels)
    }

    #[test]
    fn test_exact_copy_scores_one() {
        let patch = noise(12, 10, 1);
        let mut frame = gray(80, 60, 128);
        paste(&mut frame, &patch, 30, 20);

        let found = template_match(&frame, &reference(patch), &TemplateParams::default())
            .and_then(Found::into_first)
            .unwrap();
        assert_eq!(found.rect, Rect::new(30, 20, 12, 10));
        assert_eq!(found.score, 1.0);
        assert_eq!(found.count, 1);
        assert_eq!(found.name, "patch");
    }

    #[test]
    fn test_result_stays_inside_region() {
        let patch = noise(10, 10, 2);
        let mut frame = gray(100, 100, 90);
        paste(&mut frame, &patch, 5, 5);
        paste(&mut frame, &patch, 60, 60);

        let params = TemplateParams::in_region(Rect::new(50, 50, 40, 40));
        let found = template_match(&frame, &reference(patch), &params)
            .and_then(Found::into_first)
            .unwrap();
        assert_eq!(found.rect, Rect::new(60, 60, 10, 10));
        assert!(Rect::new(50, 50, 40, 40).contains_rect(&found.rect));
    }

    #[test]
    fn test_template_larger_than_region() {
        let patch = noise(20, 20, 3);
        let frame = gray(100, 100, 90);
        let params = TemplateParams::in_region(Rect::new(0, 0, 10, 10));
        assert!(template_match(&frame, &reference(patch), &params).is_none());
    }

    #[test]
    fn test_out_of_bounds_region_is_clamped() {
        let patch = noise(8, 8, 4);
        let mut frame = gray(64, 64, 90);
        paste(&mut frame, &patch, 50, 50);

        let params = TemplateParams::in_region(Rect::new(40, 40, 500, 500));
        let found = template_match(&frame, &reference(patch), &params)
            .and_then(Found::into_first)
            .unwrap();
        assert_eq!(found.rect, Rect::new(50, 50, 8, 8));
    }

    #[test]
    fn test_threshold_monotonic() {
        let patch = noise(10, 10, 5);
        let mut frame = noise(60, 40, 6);
        paste(&mut frame, &patch, 7, 9);
        paste(&mut frame, &patch, 40, 20);

        let mut previous = usize::MAX;
        for threshold in [0.3, 0.5, 0.7, 0.9, 1.0] {
            let params = TemplateParams::default()
                .with_threshold(threshold)
                .with_index(-1);
            let n = template_match(&frame, &reference(patch.clone()), &params)
                .map_or(0, |f| f.len());
            assert!(n <= previous, "threshold {} grew the candidate set", threshold);
            previous = n;
        }
        assert_eq!(previous, 2);
    }

    #[test]
    fn test_duplicates_are_suppressed_and_ordered() {
        let patch = noise(10, 10, 7);
        let mut frame = gray(120, 40, 100);
        paste(&mut frame, &patch, 80, 10);
        paste(&mut frame, &patch, 10, 15);
        paste(&mut frame, &patch, 45, 5);

        let params = TemplateParams::default().with_threshold(0.9).with_index(-1);
        let Some(Found::All(all)) = template_match(&frame, &reference(patch.clone()), &params)
        else {
            panic!("expected every candidate");
        };
        assert_eq!(all.iter().map(|r| r.rect.x).collect::<Vec<_>>(), [10, 45, 80]);
        assert!(all.iter().all(|r| r.count == 3));

        let params = TemplateParams::default()
            .with_threshold(0.9)
            .with_order(OrderBy::Vertical)
            .with_index(-1);
        let found = template_match(&frame, &reference(patch.clone()), &params).unwrap();
        let Found::All(all) = found else { panic!() };
        assert_eq!(all.iter().map(|r| r.rect.y).collect::<Vec<_>>(), [5, 10, 15]);

        let params = TemplateParams::default().with_threshold(0.9).with_index(1);
        let second = template_match(&frame, &reference(patch), &params)
            .and_then(Found::into_first)
            .unwrap();
        assert_eq!(second.rect.x, 45);
    }

    #[test]
    fn test_color_sensitive_rejects_shifted_hue() {
        let patch = noise(10, 10, 8);
        // Green kept, red and blue pushed apart.
        let tinted: RgbaImage = ImageBuffer::from_fn(10, 10, |x, y| {
            let p = patch.get_pixel(x, y);
            Rgba([p[0].saturating_add(90), p[1], p[2].saturating_sub(90), 255])
        });
        let mut frame = gray(60, 60, 100);
        paste(&mut frame, &tinted, 20, 20);

        let loose = TemplateParams::default().with_threshold(0.5);
        let strict = loose.clone().color_sensitive();
        let template = reference(patch);
        assert!(template_match(&frame, &template, &loose).is_some());
        assert!(template_match(&frame, &template, &strict).is_none());
    }

    #[test]
    fn test_green_mask_ignores_background() {
        let mut patch = noise(12, 12, 9);
        for y in 0..12 {
            for x in 0..3 {
                patch.put_pixel(x, y, Rgba([0, 255, 0, 255]));
            }
        }
        let visible = imageops::crop_imm(&patch, 3, 0, 9, 12).to_image();
        let mut frame = gray(60, 60, 30);
        paste(&mut frame, &visible, 33, 20);

        let params = TemplateParams::default().with_threshold(0.95).with_green_mask();
        let found = template_match(&frame, &reference(patch), &params)
            .and_then(Found::into_first)
            .unwrap();
        assert_eq!(found.rect, Rect::new(30, 20, 12, 12));
    }

    #[test]
    fn test_flat_template_never_matches() {
        let frame = noise(40, 40, 10);
        let template = reference(gray(8, 8, 77));
        assert!(template_match(&frame, &template, &TemplateParams::default()).is_none());
    }
}
