//! Keypoint feature matching
//!
//! Finds FAST corners in the template and the search region, describes each
//! with a descriptor computed over a smoothed patch, keeps matches that pass
//! a nearest/second-nearest ratio test and fits a homography through them.
//! The template's projected corners give the result rectangle.
//!
//! Two descriptor families are available:
//! - [`DetectorKind::Brief`]: 256 binary intensity comparisons, Hamming distance
//! - [`DetectorKind::Patch`]: normalized sampled intensities, Euclidean distance

use image::{imageops, GrayImage, RgbaImage};
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::homography::find_homography;
use super::library::ReferenceImage;
use super::template::MASK_GREEN;
use super::{order_results, round2, select, Found, Frame, MatchResult, OrderBy, Rect};

/// Default minimum number of ratio-test survivors
pub const DEFAULT_MIN_MATCH_COUNT: usize = 8;
/// Default nearest/second-nearest distance ratio
pub const DEFAULT_RATIO: f32 = 0.7;

const FAST_THRESHOLD: u8 = 20;
const MAX_KEYPOINTS: usize = 500;
const PATCH_RADIUS: i32 = 8;
const BLUR_SIGMA: f32 = 1.2;
/// Keypoints closer than this to an image edge are discarded
const BORDER: u32 = PATCH_RADIUS as u32 + 6;
const RANSAC_TOLERANCE: f64 = 5.0;
const BRIEF_SEED: u64 = 0xb41e_f5ee;
const FLAT_PATCH_EPSILON: f32 = 1e-3;

/// Binary test pairs for BRIEF, fixed for the life of the process
static BRIEF_PAIRS: Lazy<Vec<[(i32, i32); 2]>> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(BRIEF_SEED);
    let mut offset = || {
        (
            rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
            rng.random_range(-PATCH_RADIUS..=PATCH_RADIUS),
        )
    };
    (0..256).map(|_| [offset(), offset()]).collect()
});

/// Descriptor family used by [`feature_match`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectorKind {
    Brief,
    #[default]
    Patch,
}

impl DetectorKind {
    /// Map a detector name onto a descriptor family.
    ///
    /// Binary detector names (`ORB`, `AKAZE`, `BRISK`) select [`Brief`];
    /// float ones (`SIFT`, `KAZE`) select [`Patch`]. Unknown names fall back
    /// to the default.
    ///
    /// [`Brief`]: DetectorKind::Brief
    /// [`Patch`]: DetectorKind::Patch
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "ORB" | "AKAZE" | "BRISK" | "BRIEF" => DetectorKind::Brief,
            "SIFT" | "KAZE" | "PATCH" => DetectorKind::Patch,
            other => {
                log::debug!("Unknown detector {:?}, using default", other);
                DetectorKind::default()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Brief => "BRIEF",
            DetectorKind::Patch => "PATCH",
        }
    }
}

impl From<String> for DetectorKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<DetectorKind> for String {
    fn from(kind: DetectorKind) -> Self {
        kind.name().to_string()
    }
}

/// Parameters for [`feature_match`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    pub region: Option<Rect>,
    #[serde(alias = "count")]
    pub min_match_count: usize,
    pub order_by: OrderBy,
    pub index: i32,
    /// Ignore search-region pixels that are exactly pure green
    pub green_mask: bool,
    pub detector: DetectorKind,
    pub ratio: f32,
}

impl FeatureParams {
    pub fn in_region(region: Rect) -> Self {
        Self {
            region: Some(region),
            ..Self::default()
        }
    }

    pub fn with_detector(mut self, detector: DetectorKind) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_min_match_count(mut self, count: usize) -> Self {
        self.min_match_count = count;
        self
    }
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            region: None,
            min_match_count: DEFAULT_MIN_MATCH_COUNT,
            order_by: OrderBy::Horizontal,
            index: 0,
            green_mask: false,
            detector: DetectorKind::default(),
            ratio: DEFAULT_RATIO,
        }
    }
}

/// Locate `template` inside `frame` by keypoint correspondence
pub fn feature_match(
    frame: &Frame,
    template: &ReferenceImage,
    params: &FeatureParams,
) -> Option<Found> {
    let (fw, fh) = frame.dimensions();
    let roi = params.region.unwrap_or(Rect::full(fw, fh)).clamp_to(fw, fh)?;
    let roi_image = imageops::crop_imm(frame, roi.x, roi.y, roi.w, roi.h).to_image();

    let roi_mask = params.green_mask.then(|| green_mask(&roi_image));
    let scene = Features::extract(&roi_image, roi_mask.as_deref(), params.detector);
    if scene.len() < 2 {
        log::trace!("{}: too few keypoints in region {}", template.name, roi);
        return None;
    }
    let model = Features::extract(&template.pixels, None, params.detector);
    if model.len() < 2 {
        log::trace!("{}: too few keypoints in template", template.name);
        return None;
    }

    let good = scene.ratio_matches(&model, params.ratio);
    if good.len() < params.min_match_count {
        log::trace!(
            "{}: {} of {} matches survived, need {}",
            template.name,
            good.len(),
            scene.len(),
            params.min_match_count
        );
        return None;
    }

    let src: Vec<(f64, f64)> = good.iter().map(|&(_, m)| model.point(m)).collect();
    let dst: Vec<(f64, f64)> = good.iter().map(|&(s, _)| scene.point(s)).collect();
    let (homography, _) = find_homography(&src, &dst, RANSAC_TOLERANCE)?;

    let (tw, th) = template.dimensions();
    let (tw, th) = (tw as f64 - 1.0, th as f64 - 1.0);
    let mut xs = Vec::with_capacity(4);
    let mut ys = Vec::with_capacity(4);
    for (cx, cy) in [(0.0, 0.0), (0.0, th), (tw, th), (tw, 0.0)] {
        let (x, y) = homography.project(cx, cy)?;
        xs.push(x);
        ys.push(y);
    }
    let bound = |values: &[f64], hi: u32| {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min).round();
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max).round();
        let limit = hi.saturating_sub(1) as f64;
        let lo = min.clamp(0.0, limit);
        let hi = max.clamp(lo, limit);
        (lo as u32, hi as u32)
    };
    let (x1, x2) = bound(&xs, roi.w);
    let (y1, y2) = bound(&ys, roi.h);

    let result = MatchResult {
        rect: Rect::new(roi.x + x1, roi.y + y1, x2 - x1 + 1, y2 - y1 + 1),
        score: round2(good.len() as f32 / scene.len() as f32),
        count: good.len(),
        name: template.name.clone(),
    };
    let mut results = vec![result];
    order_results(&mut results, params.order_by);
    select(results, params.index)
}

fn green_mask(image: &RgbaImage) -> Vec<bool> {
    image
        .pixels()
        .map(|p| [p[0], p[1], p[2]] != MASK_GREEN)
        .collect()
}

enum Descriptors {
    Binary(Vec<[u64; 4]>),
    Float(Vec<Vec<f32>>),
}

/// Keypoints and their descriptors for one image
struct Features {
    points: Vec<(u32, u32)>,
    descriptors: Descriptors,
}

impl Features {
    fn extract(image: &RgbaImage, mask: Option<&[bool]>, kind: DetectorKind) -> Self {
        let gray: GrayImage = imageops::grayscale(image);
        let (w, h) = gray.dimensions();
        let empty = Self {
            points: Vec::new(),
            descriptors: match kind {
                DetectorKind::Brief => Descriptors::Binary(Vec::new()),
                DetectorKind::Patch => Descriptors::Float(Vec::new()),
            },
        };
        if w <= 2 * BORDER || h <= 2 * BORDER {
            return empty;
        }

        let mut corners: Vec<_> = corners_fast9(&gray, FAST_THRESHOLD)
            .into_iter()
            .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x < w - BORDER && c.y < h - BORDER)
            .filter(|c| mask.map_or(true, |m| m[(c.y * w + c.x) as usize]))
            .collect();
        corners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        corners.truncate(MAX_KEYPOINTS);

        let smooth = gaussian_blur_f32(&gray, BLUR_SIGMA);
        let sample = |x: u32, y: u32, dx: i32, dy: i32| -> f32 {
            smooth.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f32
        };

        let mut points = Vec::with_capacity(corners.len());
        let descriptors = match kind {
            DetectorKind::Brief => {
                let mut out = Vec::with_capacity(corners.len());
                for c in &corners {
                    let mut bits = [0u64; 4];
                    for (i, [p, q]) in BRIEF_PAIRS.iter().enumerate() {
                        if sample(c.x, c.y, p.0, p.1) < sample(c.x, c.y, q.0, q.1) {
                            bits[i / 64] |= 1 << (i % 64);
                        }
                    }
                    points.push((c.x, c.y));
                    out.push(bits);
                }
                Descriptors::Binary(out)
            }
            DetectorKind::Patch => {
                let mut out = Vec::with_capacity(corners.len());
                for c in &corners {
                    let mut values = Vec::with_capacity(81);
                    for dy in (-PATCH_RADIUS..=PATCH_RADIUS).step_by(2) {
                        for dx in (-PATCH_RADIUS..=PATCH_RADIUS).step_by(2) {
                            values.push(sample(c.x, c.y, dx, dy));
                        }
                    }
                    let mean = values.iter().sum::<f32>() / values.len() as f32;
                    values.iter_mut().for_each(|v| *v -= mean);
                    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
                    if norm < FLAT_PATCH_EPSILON {
                        continue;
                    }
                    values.iter_mut().for_each(|v| *v /= norm);
                    points.push((c.x, c.y));
                    out.push(values);
                }
                Descriptors::Float(out)
            }
        };
        Self {
            points,
            descriptors,
        }
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn point(&self, i: usize) -> (f64, f64) {
        let (x, y) = self.points[i];
        (x as f64, y as f64)
    }

    /// Two smallest distances from descriptor `i` of `self` into `other`
    fn nearest_two(&self, i: usize, other: &Features) -> Option<(usize, f32, f32)> {
        let distances: Vec<f32> = match (&self.descriptors, &other.descriptors) {
            (Descriptors::Binary(a), Descriptors::Binary(b)) => b
                .iter()
                .map(|d| {
                    a[i].iter()
                        .zip(d)
                        .map(|(x, y)| (x ^ y).count_ones())
                        .sum::<u32>() as f32
                })
                .collect(),
            (Descriptors::Float(a), Descriptors::Float(b)) => b
                .iter()
                .map(|d| {
                    a[i].iter()
                        .zip(d)
                        .map(|(x, y)| (x - y) * (x - y))
                        .sum::<f32>()
                        .sqrt()
                })
                .collect(),
            _ => return None,
        };

        let mut best = (usize::MAX, f32::INFINITY);
        let mut second = f32::INFINITY;
        for (j, &d) in distances.iter().enumerate() {
            if d < best.1 {
                second = best.1;
                best = (j, d);
            } else if d < second {
                second = d;
            }
        }
        (best.0 != usize::MAX && second.is_finite()).then_some((best.0, best.1, second))
    }

    /// `(self index, other index)` pairs passing the ratio test
    fn ratio_matches(&self, other: &Features, ratio: f32) -> Vec<(usize, usize)> {
        (0..self.len())
            .filter_map(|i| {
                let (j, best, second) = self.nearest_two(i, other)?;
                (best < ratio * second).then_some((i, j))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    /// Blocky noise: FAST fires on block corners
    fn blocks(width: u32, height: u32, block: u32, seed: u64) -> RgbaImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cols = width.div_ceil(block);
        let rows = height.div_ceil(block);
        let levels: Vec<u8> = (0..cols * rows).map(|_| rng.random()).collect();
        ImageBuffer::from_fn(width, height, |x, y| {
            let v = levels[((y / block) * cols + x / block) as usize];
            Rgba([v, v, v, 255])
        })
    }

    fn gray(width: u32, height: u32, v: u8) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |_, _| Rgba([v, v, v, 255]))
    }

    #[test]
    fn test_detector_names() {
        assert_eq!(DetectorKind::from_name("ORB"), DetectorKind::Brief);
        assert_eq!(DetectorKind::from_name("akaze"), DetectorKind::Brief);
        assert_eq!(DetectorKind::from_name("SIFT"), DetectorKind::Patch);
        assert_eq!(DetectorKind::from_name("SURF"), DetectorKind::default());

        let params: FeatureParams =
            serde_json::from_str(r#"{"detector": "BRISK", "count": 12}"#).unwrap();
        assert_eq!(params.detector, DetectorKind::Brief);
        assert_eq!(params.min_match_count, 12);
        assert_eq!(params.ratio, DEFAULT_RATIO);
    }

    #[test]
    fn test_locates_translated_template() {
        let template = ReferenceImage::new("emblem", blocks(64, 64, 4, 11));
        let mut frame = gray(320, 240, 128);
        imageops::replace(&mut frame, &template.pixels, 150, 90);

        for kind in [DetectorKind::Patch, DetectorKind::Brief] {
            let params = FeatureParams::in_region(Rect::new(100, 50, 200, 160)).with_detector(kind);
            let found = feature_match(&frame, &template, &params)
                .and_then(Found::into_first)
                .unwrap_or_else(|| panic!("{:?} found nothing", kind));
            assert_eq!(found.rect, Rect::new(150, 90, 64, 64), "{:?}", kind);
            assert!(found.count >= DEFAULT_MIN_MATCH_COUNT);
            assert!(found.score > 0.0 && found.score <= 1.0);
            assert_eq!(found.name, "emblem");
        }
    }

    #[test]
    fn test_min_match_count_gate() {
        let template = ReferenceImage::new("emblem", blocks(64, 64, 4, 11));
        let mut frame = gray(200, 200, 128);
        imageops::replace(&mut frame, &template.pixels, 60, 60);

        let params = FeatureParams::default().with_min_match_count(10_000);
        assert!(feature_match(&frame, &template, &params).is_none());
    }

    #[test]
    fn test_flat_region_has_no_keypoints() {
        let template = ReferenceImage::new("emblem", blocks(64, 64, 4, 11));
        let frame = gray(200, 200, 60);
        assert!(feature_match(&frame, &template, &FeatureParams::default()).is_none());
    }
}
