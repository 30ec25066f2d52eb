//! Text recognition
//!
//! The recognizer itself is an external model; controllers only need
//! "what text is where" inside a region.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{Frame, Rect};

/// Text reader consumed by the gathering controller
pub trait TextRecognition: Send + Sync {
    /// All text read from `region`, concatenated
    fn read_region(&self, frame: &Frame, region: Rect) -> String;

    /// Every text line found in `region` with its bounding box in frame
    /// coordinates
    fn read_all_in(&self, frame: &Frame, region: Rect) -> HashMap<String, Rect>;
}

/// Strip everything but letters and digits, lowercased.
///
/// Recognizers tend to add stray punctuation or spacing to short labels.
pub fn normalise_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Recognizer returning prepared readings in order, then repeating the last.
#[derive(Default)]
pub struct ScriptedText {
    readings: Mutex<Vec<HashMap<String, Rect>>>,
    last: Mutex<HashMap<String, Rect>>,
}

impl ScriptedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, lines: &[(&str, Rect)]) {
        let reading = lines.iter().map(|(t, r)| (t.to_string(), *r)).collect();
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reading);
    }

    fn next(&self) -> HashMap<String, Rect> {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if !readings.is_empty() {
            *last = readings.remove(0);
        }
        last.clone()
    }
}

impl TextRecognition for ScriptedText {
    fn read_region(&self, _frame: &Frame, _region: Rect) -> String {
        let mut lines: Vec<(String, Rect)> = self.next().into_iter().collect();
        lines.sort_by_key(|(_, r)| (r.y, r.x));
        lines
            .into_iter()
            .map(|(t, _)| t)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn read_all_in(&self, _frame: &Frame, _region: Rect) -> HashMap<String, Rect> {
        self.next()
    }
}
