//! Named template batches
//!
//! A [`TemplateEntry`] pairs a reference image with the method and
//! parameters used to find it. Controllers build a [`TemplateSet`] once at
//! startup and query it by name every tick.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::features::{feature_match, FeatureParams};
use super::library::{ImageLibrary, ReferenceImage};
use super::template::{template_match, TemplateParams};
use super::{Found, Frame, MatchResult, Rect, VisionError};

/// Method selection plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum MatchParams {
    Template(TemplateParams),
    Feature(FeatureParams),
}

impl MatchParams {
    /// Template correlation inside `region` with default settings
    pub fn template(region: Rect) -> Self {
        MatchParams::Template(TemplateParams::in_region(region))
    }

    /// Color-sensitive template correlation inside `region`
    pub fn template_color(region: Rect) -> Self {
        MatchParams::Template(TemplateParams::in_region(region).color_sensitive())
    }

    pub fn feature(region: Rect) -> Self {
        MatchParams::Feature(FeatureParams::in_region(region))
    }

    /// Reject parameter values no search can honour
    pub fn validate(&self, name: &str) -> Result<(), VisionError> {
        let invalid = |reason: &str| VisionError::InvalidParameters {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            MatchParams::Template(p) => {
                if !p.threshold.is_finite() {
                    return Err(invalid("threshold is not a number"));
                }
            }
            MatchParams::Feature(p) => {
                if !(p.ratio > 0.0 && p.ratio <= 1.0) {
                    return Err(invalid("ratio must be in (0, 1]"));
                }
            }
        }
        Ok(())
    }
}

/// A reference image bound to its search parameters.
///
/// `image` is `None` when the library could not supply the template; such an
/// entry never matches.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub name: String,
    pub image: Option<Arc<ReferenceImage>>,
    pub params: MatchParams,
}

impl TemplateEntry {
    pub fn new(name: impl Into<String>, image: Arc<ReferenceImage>, params: MatchParams) -> Self {
        Self {
            name: name.into(),
            image: Some(image),
            params,
        }
    }

    /// Look the image up in `library`, logging and degrading to an empty
    /// entry when it is missing or the parameters are unusable
    pub fn resolve(library: &dyn ImageLibrary, name: &str, params: MatchParams) -> Self {
        let image = match params.validate(name).and_then(|_| library.get(name)) {
            Ok(image) => Some(image),
            Err(e) => {
                log::error!("Template {} unavailable: {}", name, e);
                None
            }
        };
        Self {
            name: name.to_string(),
            image,
            params,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// Run the configured search
    pub fn search(&self, frame: &Frame) -> Option<Found> {
        let image = self.image.as_deref()?;
        match &self.params {
            MatchParams::Template(p) => template_match(frame, image, p),
            MatchParams::Feature(p) => feature_match(frame, image, p),
        }
    }
}

/// Match one entry, collapsing to a single result stamped with the entry name
pub fn single_match(frame: &Frame, entry: &TemplateEntry) -> Option<MatchResult> {
    let mut result = entry.search(frame)?.into_first()?;
    result.name.clone_from(&entry.name);
    Some(result)
}

/// Match every entry; the container holds a slot per submitted name
pub fn multi_match(frame: &Frame, entries: &[&TemplateEntry]) -> MatchResultContainer {
    let mut container = MatchResultContainer::new();
    for entry in entries {
        container.insert(&entry.name, single_match(frame, entry));
    }
    container
}

/// First entry, in submission order, that matches
pub fn first_match(frame: &Frame, entries: &[&TemplateEntry]) -> Option<MatchResult> {
    entries.iter().find_map(|entry| single_match(frame, entry))
}

/// Per-name outcome of a batch match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResultContainer {
    results: Vec<(String, Option<MatchResult>)>,
}

impl MatchResultContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, replacing any earlier one for the same name
    pub fn insert(&mut self, name: &str, result: Option<MatchResult>) {
        match self.results.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = result,
            None => self.results.push((name.to_string(), result)),
        }
    }

    /// The result for `name`, if it was submitted and found
    pub fn get(&self, name: &str) -> Option<&MatchResult> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, r)| r.as_ref())
    }

    pub fn found(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether `name` was part of the batch at all
    pub fn contains(&self, name: &str) -> bool {
        self.results.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&MatchResult>)> {
        self.results.iter().map(|(n, r)| (n.as_str(), r.as_ref()))
    }

    /// Names that were found, in submission order
    pub fn found_names(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, r)| r.is_some())
            .map(|(n, _)| n)
            .collect()
    }
}

impl fmt::Display for MatchResultContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.found_names();
        if names.is_empty() {
            write!(f, "nothing matched")
        } else {
            write!(f, "matched: {}", names.join(", "))
        }
    }
}

/// Templates a controller searches for, keyed by name
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    entries: HashMap<String, TemplateEntry>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every `(name, params)` pair against `library`
    pub fn load(library: &dyn ImageLibrary, specs: &[(&str, MatchParams)]) -> Self {
        let mut set = Self::new();
        for (name, params) in specs {
            set.insert(TemplateEntry::resolve(library, name, params.clone()));
        }
        let missing = set.entries.values().filter(|e| !e.is_loaded()).count();
        if missing > 0 {
            log::warn!("{} of {} templates failed to load", missing, set.entries.len());
        }
        set
    }

    pub fn insert(&mut self, entry: TemplateEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find one template by name; unknown names never match
    pub fn find(&self, frame: &Frame, name: &str) -> Option<MatchResult> {
        single_match(frame, self.entries.get(name)?)
    }

    /// Batch match by name. Unknown names still get an empty slot.
    pub fn find_all(&self, frame: &Frame, names: &[&str]) -> MatchResultContainer {
        let mut container = MatchResultContainer::new();
        for name in names {
            let result = self.entries.get(*name).and_then(|e| single_match(frame, e));
            container.insert(name, result);
        }
        container
    }

    /// First of `names` that matches
    pub fn find_first(&self, frame: &Frame, names: &[&str]) -> Option<MatchResult> {
        names.iter().find_map(|name| self.find(frame, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::library::MemoryImageLibrary;
    use crate::vision::OrderBy;
    use image::{imageops, ImageBuffer, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> RgbaImage {
        let mut rng = StdRng::seed_from_u64(seed);
        ImageBuffer::from_fn(width, height, |_, _| {
            Rgba([rng.random(), rng.random(), rng.random(), 255])
        })
    }

    fn scene() -> (Frame, MemoryImageLibrary) {
        let a = noise(12, 12, 1);
        let b = noise(12, 12, 2);
        let mut frame: Frame = ImageBuffer::from_pixel(200, 100, Rgba([120, 120, 120, 255]));
        imageops::replace(&mut frame, &a, 20, 20);
        imageops::replace(&mut frame, &a, 150, 60);
        let library = MemoryImageLibrary::new().with("a", a).with("b", b);
        (frame, library)
    }

    #[test]
    fn test_single_match_stamps_name() {
        let (frame, library) = scene();
        let entry = TemplateEntry::resolve(&library, "a", MatchParams::template(Rect::full(200, 100)));
        let result = single_match(&frame, &entry).unwrap();
        assert_eq!(result.name, "a");
        assert_eq!(result.rect, Rect::new(20, 20, 12, 12));
    }

    #[test]
    fn test_single_match_all_collapses_to_first() {
        let (frame, library) = scene();
        let params = MatchParams::Template(
            TemplateParams::default()
                .with_index(-1)
                .with_order(OrderBy::Horizontal),
        );
        let entry = TemplateEntry::resolve(&library, "a", params);
        assert_eq!(entry.search(&frame).map(|f| f.len()), Some(2));
        assert_eq!(single_match(&frame, &entry).unwrap().rect.x, 20);
    }

    #[test]
    fn test_multi_match_slots() {
        let (frame, library) = scene();
        let region = Rect::full(200, 100);
        let a = TemplateEntry::resolve(&library, "a", MatchParams::template(region));
        let b = TemplateEntry::resolve(&library, "b", MatchParams::template(region));
        let missing = TemplateEntry::resolve(&library, "missing", MatchParams::template(region));
        assert!(!missing.is_loaded());

        let container = multi_match(&frame, &[&a, &b, &missing]);
        assert_eq!(container.len(), 3);
        assert!(container.found("a"));
        assert!(container.contains("b") && !container.found("b"));
        assert!(container.contains("missing") && container.get("missing").is_none());
        assert!(!container.contains("c"));
        assert_eq!(container.found_names(), vec!["a"]);
        assert_eq!(container.to_string(), "matched: a");
    }

    #[test]
    fn test_first_match_short_circuits() {
        let (frame, library) = scene();
        let region = Rect::full(200, 100);
        let a = TemplateEntry::resolve(&library, "a", MatchParams::template(region));
        let b = TemplateEntry::resolve(&library, "b", MatchParams::template(region));

        assert_eq!(first_match(&frame, &[&b, &a]).unwrap().name, "a");
        assert!(first_match(&frame, &[&b]).is_none());
    }

    #[test]
    fn test_invalid_params_degrade() {
        let (frame, library) = scene();
        let params = MatchParams::Template(TemplateParams::default().with_threshold(f32::NAN));
        let entry = TemplateEntry::resolve(&library, "a", params);
        assert!(!entry.is_loaded());
        assert!(single_match(&frame, &entry).is_none());
    }

    #[test]
    fn test_params_from_json() {
        let params: MatchParams = serde_json::from_str(
            r#"{"method": "Template", "region": [58, 619, 350, 92], "is_color": true}"#,
        )
        .unwrap();
        let MatchParams::Template(p) = params else {
            panic!("expected template params");
        };
        assert_eq!(p.region, Some(Rect::new(58, 619, 350, 92)));
        assert!(p.color_sensitive);
        assert_eq!(p.threshold, 0.7);

        let params: MatchParams =
            serde_json::from_str(r#"{"method": "Feature", "detector": "ORB"}"#).unwrap();
        assert!(matches!(params, MatchParams::Feature(_)));
    }

    #[test]
    fn test_template_set_lookup() {
        let (frame, library) = scene();
        let region = Rect::full(200, 100);
        let set = TemplateSet::load(
            &library,
            &[("a", MatchParams::template(region)), ("b", MatchParams::template(region))],
        );
        assert_eq!(set.len(), 2);
        assert!(set.find(&frame, "a").is_some());
        assert!(set.find(&frame, "unknown").is_none());

        let all = set.find_all(&frame, &["b", "a", "unknown"]);
        assert_eq!(all.len(), 3);
        assert!(all.found("a"));
        assert_eq!(set.find_first(&frame, &["b", "a"]).unwrap().name, "a");
    }
}
