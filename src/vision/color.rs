//! Pixel colour probes
//!
//! Cheap checks used where a full template search would be overkill: a few
//! known pixels of a dialog, or the hue of a status light.

use std::str::FromStr;

use image::Rgba;
use serde::Serialize;

use super::{Frame, VisionError};

/// A frame coordinate that may fall outside the frame
pub type Point = (i32, i32);

/// Target colour with per-channel tolerance, parsed from `RRGGBB[-TTTTTT]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpec {
    pub rgb: [u8; 3],
    pub tolerance: [u8; 3],
}

impl ColorSpec {
    pub const fn exact(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            tolerance: [0, 0, 0],
        }
    }

    /// Every channel within tolerance
    pub fn matches(&self, px: &Rgba<u8>) -> bool {
        (0..3).all(|c| px[c].abs_diff(self.rgb[c]) <= self.tolerance[c])
    }
}

impl FromStr for ColorSpec {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().trim_start_matches('#');
        let (color, tolerance) = match body.split_once('-') {
            Some((c, t)) => (c, Some(t)),
            None => (body, None),
        };
        let invalid = || VisionError::InvalidColorSpec(s.to_string());
        let rgb = parse_hex_triplet(color).ok_or_else(invalid)?;
        let tolerance = match tolerance {
            Some(t) => parse_hex_triplet(t).ok_or_else(invalid)?,
            None => [0, 0, 0],
        };
        Ok(Self { rgb, tolerance })
    }
}

fn parse_hex_triplet(s: &str) -> Option<[u8; 3]> {
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

fn pixel_at(frame: &Frame, (x, y): Point) -> Option<&Rgba<u8>> {
    let x = u32::try_from(x).ok()?;
    let y = u32::try_from(y).ok()?;
    if x < frame.width() && y < frame.height() {
        Some(frame.get_pixel(x, y))
    } else {
        None
    }
}

/// Whether every point matches `spec`.
///
/// An empty point list is vacuously true. A malformed spec or any point
/// outside the frame yields `false`.
pub fn compare_color(frame: &Frame, points: &[Point], spec: &str) -> bool {
    let spec = match spec.parse::<ColorSpec>() {
        Ok(spec) => spec,
        Err(e) => {
            log::warn!("{}", e);
            return false;
        }
    };
    points
        .iter()
        .all(|&p| pixel_at(frame, p).is_some_and(|px| spec.matches(px)))
}

/// Single-point form of [`compare_color`]
pub fn compare_color_at(frame: &Frame, point: Point, spec: &str) -> bool {
    compare_color(frame, &[point], spec)
}

/// 8-bit HSV: hue in `[0, 180)`, saturation and value in `[0, 255]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let delta = max - min;

        let s = if max > 0.0 {
            (255.0 * delta / max).round()
        } else {
            0.0
        };

        let mut h = if delta == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / delta
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        if h < 0.0 {
            h += 360.0;
        }
        let h = (h / 2.0).round() as u32 % 180;

        Self {
            h: h as u8,
            s: s as u8,
            v: max as u8,
        }
    }
}

/// HSV at each point, or `None` if the list is empty or any point is off
/// the frame
pub fn get_hsv(frame: &Frame, points: &[Point]) -> Option<Vec<Hsv>> {
    if points.is_empty() {
        return None;
    }
    points.iter().map(|&p| get_hsv_at(frame, p)).collect()
}

pub fn get_hsv_at(frame: &Frame, point: Point) -> Option<Hsv> {
    let px = pixel_at(frame, point)?;
    Some(Hsv::from_rgb(px[0], px[1], px[2]))
}
