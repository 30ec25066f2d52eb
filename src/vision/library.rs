//! Reference image storage
//!
//! Templates are decoded once and shared behind `Arc` so every controller
//! tick can match against them without touching the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use image::{DynamicImage, RgbaImage};

use super::VisionError;

/// A decoded template image
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub name: String,
    pub pixels: RgbaImage,
    /// Whether any pixel is transparent; transparent pixels are excluded
    /// from matching
    pub has_alpha: bool,
}

impl ReferenceImage {
    pub fn new(name: impl Into<String>, pixels: RgbaImage) -> Self {
        let has_alpha = pixels.pixels().any(|p| p[3] < u8::MAX);
        Self {
            name: name.into(),
            pixels,
            has_alpha,
        }
    }

    pub fn from_dynamic(name: impl Into<String>, image: DynamicImage) -> Self {
        Self::new(name, image.to_rgba8())
    }

    /// Decode an image file, naming it after the file stem
    pub fn open(path: &Path) -> Result<Self, VisionError> {
        let image = image::open(path).map_err(|source| VisionError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_dynamic(name, image))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Named template lookup
pub trait ImageLibrary: Send + Sync {
    fn get(&self, name: &str) -> Result<Arc<ReferenceImage>, VisionError>;
}

/// Templates read from `<dir>/<name>.png`, decoded on first use and cached
pub struct DirImageLibrary {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<ReferenceImage>>>,
}

impl DirImageLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Open a directory and decode every `*.png` in it up front
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, VisionError> {
        let library = Self::new(dir);
        let entries = std::fs::read_dir(&library.dir).map_err(|source| VisionError::Io {
            path: library.dir.clone(),
            source,
        })?;
        let mut loaded = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            match ReferenceImage::open(&path) {
                Ok(image) => {
                    loaded.insert(image.name.clone(), Arc::new(image));
                }
                Err(e) => log::warn!("Skipping template: {}", e),
            }
        }
        log::info!("Loaded {} templates from {}", loaded.len(), library.dir.display());
        if let Ok(mut cache) = library.cache.write() {
            *cache = loaded;
        }
        Ok(library)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of every cached template, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cache
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl ImageLibrary for DirImageLibrary {
    fn get(&self, name: &str) -> Result<Arc<ReferenceImage>, VisionError> {
        if let Some(image) = self.cache.read().ok().and_then(|c| c.get(name).cloned()) {
            return Ok(image);
        }
        let path = self.dir.join(format!("{}.png", name));
        if !path.is_file() {
            return Err(VisionError::MissingTemplate(name.to_string()));
        }
        let image = Arc::new(ReferenceImage::open(&path)?);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), Arc::clone(&image));
        }
        Ok(image)
    }
}

/// In-memory templates, for tests and embedding
#[derive(Default)]
pub struct MemoryImageLibrary {
    images: HashMap<String, Arc<ReferenceImage>>,
}

impl MemoryImageLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, pixels: RgbaImage) {
        let name = name.into();
        let image = ReferenceImage::new(name.clone(), pixels);
        self.images.insert(name, Arc::new(image));
    }

    pub fn with(mut self, name: impl Into<String>, pixels: RgbaImage) -> Self {
        self.insert(name, pixels);
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageLibrary for MemoryImageLibrary {
    fn get(&self, name: &str) -> Result<Arc<ReferenceImage>, VisionError> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| VisionError::MissingTemplate(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn checker(size: u32) -> RgbaImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn test_alpha_detection() {
        let opaque = ReferenceImage::new("opaque", checker(4));
        assert!(!opaque.has_alpha);

        let mut pixels = checker(4);
        pixels.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let cutout = ReferenceImage::new("cutout", pixels);
        assert!(cutout.has_alpha);
    }

    #[test]
    fn test_dir_library_loads_png() {
        let dir = tempfile::tempdir().unwrap();
        checker(6).save(dir.path().join("close_button.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let library = DirImageLibrary::open(dir.path()).unwrap();
        assert_eq!(library.names(), vec!["close_button".to_string()]);

        let image = library.get("close_button").unwrap();
        assert_eq!(image.dimensions(), (6, 6));
        assert_eq!(image.name, "close_button");

        assert!(matches!(
            library.get("missing"),
            Err(VisionError::MissingTemplate(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_dir_library_lazy_load() {
        let dir = tempfile::tempdir().unwrap();
        let library = DirImageLibrary::new(dir.path());
        checker(3).save(dir.path().join("late.png")).unwrap();

        let first = library.get("late").unwrap();
        let second = library.get("late").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_directory() {
        let result = DirImageLibrary::open("/nonexistent/templates");
        assert!(matches!(result, Err(VisionError::Io { .. })));
    }

    #[test]
    fn test_memory_library() {
        let library = MemoryImageLibrary::new().with("a", checker(2));
        assert_eq!(library.len(), 1);
        assert!(library.get("a").is_ok());
        assert!(library.get("b").is_err());
    }
}
