//! Vision and image processing module
//!
//! Locates reference images inside captured frames, either by sliding-window
//! correlation ([`template`]) or by keypoint matching with a fitted
//! perspective transform ([`features`]). Colour probes live in [`color`].
//!
//! A miss is never an error here: every search returns `Option`/empty and the
//! caller decides what an absent template means.

pub mod capture;
pub mod color;
pub mod features;
pub mod homography;
pub mod library;
pub mod matcher;
pub mod ocr;
pub mod template;

use std::fmt;
use std::path::PathBuf;

use image::RgbaImage;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub use capture::{frame_from_raw, Capture, FrameSource, ScriptedCapture, ThrottledCapture};
pub use color::{compare_color, compare_color_at, get_hsv, get_hsv_at, ColorSpec, Hsv, Point};
pub use features::{feature_match, DetectorKind, FeatureParams};
pub use library::{DirImageLibrary, ImageLibrary, MemoryImageLibrary, ReferenceImage};
pub use matcher::{
    first_match, multi_match, single_match, MatchParams, MatchResultContainer, TemplateEntry,
    TemplateSet,
};
pub use ocr::{normalise_text, ScriptedText, TextRecognition};
pub use template::{template_match, TemplateParams};

/// One captured screen image. Alpha is carried but never compared.
pub type Frame = RgbaImage;

/// Axis-aligned rectangle in frame coordinates, origin top-left.
///
/// Serialized as `[x, y, w, h]` so template regions read the same way in
/// JSON as they do on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole of a `width` x `height` frame
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Clamp this rectangle to a `width` x `height` frame.
    ///
    /// The origin is pulled inside the frame and the size shrunk to fit.
    /// Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if width == 0 || height == 0 {
            return None;
        }
        let x = self.x.min(width - 1);
        let y = self.y.min(height - 1);
        let w = self.w.min(width - x);
        let h = self.h.min(height - y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::new(x, y, w, h))
    }

    /// Center point, rounded down
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Whether `other` lies fully inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }
}

impl From<[u32; 4]> for Rect {
    fn from(v: [u32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [u32; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{},{}]", self.x, self.y, self.w, self.h)
    }
}

/// A located template.
///
/// `score` is the correlation value for template matching and the surviving
/// match ratio for feature matching. `count` is the number of candidates the
/// search produced, for ranking context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub rect: Rect,
    pub score: f32,
    pub count: usize,
    pub name: String,
}

impl MatchResult {
    pub fn center(&self) -> (u32, u32) {
        self.rect.center()
    }

    /// A point offset from the top-left corner, used for button taps
    pub fn offset(&self, dx: u32, dy: u32) -> (u32, u32) {
        (self.rect.x + dx, self.rect.y + dy)
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} score={:.2} count={}",
            if self.name.is_empty() { "unnamed" } else { &self.name },
            self.rect,
            self.score,
            self.count
        )
    }
}

/// Ordering applied to candidates before index selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderBy {
    /// Ascending x
    #[default]
    Horizontal,
    /// Ascending y
    Vertical,
    /// Descending score
    Score,
    /// Descending rectangle area
    Area,
    Random,
}

/// What a search returns once candidates are selected by index
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    One(MatchResult),
    /// Every ordered candidate, requested with index `-1`
    All(Vec<MatchResult>),
}

impl Found {
    /// Collapse to a single result; `All` yields its first element
    pub fn into_first(self) -> Option<MatchResult> {
        match self {
            Found::One(result) => Some(result),
            Found::All(results) => results.into_iter().next(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Found::One(_) => 1,
            Found::All(results) => results.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sort candidates in place according to `order`
pub(crate) fn order_results(results: &mut [MatchResult], order: OrderBy) {
    match order {
        OrderBy::Horizontal => results.sort_by_key(|r| r.rect.x),
        OrderBy::Vertical => results.sort_by_key(|r| r.rect.y),
        OrderBy::Score => results.sort_by(|a, b| b.score.total_cmp(&a.score)),
        OrderBy::Area => results.sort_by_key(|r| std::cmp::Reverse(r.rect.area())),
        OrderBy::Random => results.shuffle(&mut rand::rng()),
    }
}

/// Pick the candidate at `index` from an ordered list.
///
/// `-1` returns everything, other negative values count from the end, and an
/// out-of-range index yields `None`.
pub(crate) fn select(results: Vec<MatchResult>, index: i32) -> Option<Found> {
    if results.is_empty() {
        return None;
    }
    if index == -1 {
        return Some(Found::All(results));
    }
    let len = results.len() as i64;
    let idx = if index < 0 { len + index as i64 } else { index as i64 };
    if !(0..len).contains(&idx) {
        return None;
    }
    results.into_iter().nth(idx as usize).map(Found::One)
}

/// Round to two decimals, the precision scores are reported at
pub(crate) fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to read image directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Reference image not found: {0}")]
    MissingTemplate(String),
    #[error("Invalid match parameters for {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
    #[error("Invalid colour spec: {0}")]
    InvalidColorSpec(String),
    #[error("Invalid frame data")]
    InvalidFrameData,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_at(x: u32, y: u32, score: f32) -> MatchResult {
        MatchResult {
            rect: Rect::new(x, y, 10, 10),
            score,
            count: 1,
            name: String::new(),
        }
    }

    #[test]
    fn test_rect_clamp() {
        let r = Rect::new(100, 100, 50, 50).clamp_to(1280, 720).unwrap();
        assert_eq!(r, Rect::new(100, 100, 50, 50));

        let r = Rect::new(1270, 700, 50, 50).clamp_to(1280, 720).unwrap();
        assert_eq!(r, Rect::new(1270, 700, 10, 20));

        let r = Rect::new(5000, 5000, 50, 50).clamp_to(1280, 720).unwrap();
        assert_eq!(r, Rect::new(1279, 719, 1, 1));

        assert!(Rect::new(10, 10, 0, 5).clamp_to(100, 100).is_none());
        assert!(Rect::new(0, 0, 5, 5).clamp_to(0, 100).is_none());
    }

    #[test]
    fn test_rect_json_is_a_list() {
        let r: Rect = serde_json::from_str("[58,619,350,92]").unwrap();
        assert_eq!(r, Rect::new(58, 619, 350, 92));
        assert_eq!(serde_json::to_string(&r).unwrap(), "[58,619,350,92]");
    }

    #[test]
    fn test_select_indexing() {
        let results = vec![result_at(0, 0, 0.9), result_at(5, 0, 0.8), result_at(9, 0, 0.7)];

        match select(results.clone(), 0) {
            Some(Found::One(r)) => assert_eq!(r.rect.x, 0),
            other => panic!("unexpected {:?}", other),
        }
        match select(results.clone(), -2) {
            Some(Found::One(r)) => assert_eq!(r.rect.x, 5),
            other => panic!("unexpected {:?}", other),
        }
        match select(results.clone(), -1) {
            Some(Found::All(all)) => assert_eq!(all.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(select(results.clone(), 3).is_none());
        assert!(select(results, -4).is_none());
        assert!(select(Vec::new(), 0).is_none());
    }

    #[test]
    fn test_ordering() {
        let mut results = vec![result_at(9, 1, 0.7), result_at(0, 5, 0.8), result_at(5, 3, 0.9)];

        order_results(&mut results, OrderBy::Horizontal);
        assert_eq!(results.iter().map(|r| r.rect.x).collect::<Vec<_>>(), [0, 5, 9]);

        order_results(&mut results, OrderBy::Vertical);
        assert_eq!(results.iter().map(|r| r.rect.y).collect::<Vec<_>>(), [1, 3, 5]);

        order_results(&mut results, OrderBy::Score);
        assert_eq!(results[0].score, 0.9);

        order_results(&mut results, OrderBy::Random);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.876), 0.88);
        assert_eq!(round2(1.0), 1.0);
    }
}
