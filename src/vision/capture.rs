//! Screen capture handling
//!
//! Controllers pull frames through the [`Capture`] trait. [`ThrottledCapture`]
//! wraps a raw [`FrameSource`] and caps the frame rate so a polling loop
//! cannot flood the emulator's screenshot pipe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::{imageops, ImageBuffer};

use super::{Frame, Rect, VisionError};

/// Default capture rate limit
pub const DEFAULT_MAX_FPS: u32 = 15;

/// Frame provider consumed by the activity controllers
pub trait Capture: Send + Sync {
    /// Grab the current screen, optionally cropped to `region`.
    ///
    /// `None` means no frame is available right now.
    fn screenshot(&self, region: Option<Rect>) -> Option<Frame>;
}

/// Unthrottled raw frame grabber, e.g. an emulator screenshot pipe
pub trait FrameSource: Send + Sync {
    fn grab(&self) -> Option<Frame>;
}

/// Build a frame from tightly packed RGBA bytes
pub fn frame_from_raw(data: &[u8], width: u32, height: u32) -> Result<Frame, VisionError> {
    let expected = width as usize * height as usize * 4;
    if data.len() != expected {
        return Err(VisionError::InvalidFrameData);
    }
    ImageBuffer::from_raw(width, height, data.to_vec()).ok_or(VisionError::InvalidFrameData)
}

fn crop(frame: Frame, region: Option<Rect>) -> Option<Frame> {
    let Some(region) = region else {
        return Some(frame);
    };
    let r = region.clamp_to(frame.width(), frame.height())?;
    Some(imageops::crop_imm(&frame, r.x, r.y, r.w, r.h).to_image())
}

/// Rate-limited capture over a [`FrameSource`].
///
/// Successive grabs are spaced at least `1 / max_fps` apart; a caller that
/// asks sooner blocks until the interval has elapsed.
pub struct ThrottledCapture<S> {
    source: S,
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
    frame_count: AtomicU64,
}

impl<S: FrameSource> ThrottledCapture<S> {
    pub fn new(source: S, max_fps: u32) -> Self {
        let min_interval = if max_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / max_fps as f64)
        };
        Self {
            source,
            min_interval,
            last: Mutex::new(None),
            frame_count: AtomicU64::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Frames delivered so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

impl<S: FrameSource> Capture for ThrottledCapture<S> {
    fn screenshot(&self, region: Option<Rect>) -> Option<Frame> {
        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_interval {
                    std::thread::sleep(self.min_interval - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
        let frame = self.source.grab()?;
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        crop(frame, region)
    }
}

/// Replays queued frames, then keeps returning the last one.
///
/// Used to drive controllers from prepared screens.
#[derive(Default)]
pub struct ScriptedCapture {
    queue: Mutex<VecDeque<Frame>>,
    last: Mutex<Option<Frame>>,
    served: AtomicU64,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        let capture = Self::new();
        for frame in frames {
            capture.push(frame);
        }
        capture
    }

    pub fn push(&self, frame: Frame) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame);
    }

    /// Drop queued frames and show `frame` from now on
    pub fn show(&self, frame: Frame) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
    }

    /// Screenshots taken so far
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

impl FrameSource for ScriptedCapture {
    fn grab(&self) -> Option<Frame> {
        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(frame) = next {
            *last = Some(frame);
        }
        let frame = last.clone()?;
        self.served.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }
}

impl Capture for ScriptedCapture {
    fn screenshot(&self, region: Option<Rect>) -> Option<Frame> {
        crop(self.grab()?, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, v: u8) -> Frame {
        ImageBuffer::from_fn(width, height, |_, _| Rgba([v, v, v, 255]))
    }

    #[test]
    fn test_frame_from_raw() {
        let data = vec![255u8; 10 * 10 * 4];
        let frame = frame_from_raw(&data, 10, 10).unwrap();
        assert_eq!(frame.dimensions(), (10, 10));

        assert!(matches!(
            frame_from_raw(&data[..100], 10, 10),
            Err(VisionError::InvalidFrameData)
        ));
    }

    #[test]
    fn test_scripted_capture_repeats_last() {
        let capture = ScriptedCapture::with_frames([solid(4, 4, 1), solid(4, 4, 2)]);
        assert_eq!(capture.screenshot(None).unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(capture.screenshot(None).unwrap().get_pixel(0, 0)[0], 2);
        assert_eq!(capture.screenshot(None).unwrap().get_pixel(0, 0)[0], 2);
        assert_eq!(capture.served(), 3);

        capture.show(solid(4, 4, 9));
        assert_eq!(capture.screenshot(None).unwrap().get_pixel(0, 0)[0], 9);
    }

    #[test]
    fn test_empty_capture() {
        let capture = ScriptedCapture::new();
        assert!(capture.screenshot(None).is_none());
    }

    #[test]
    fn test_region_crop() {
        let capture = ScriptedCapture::with_frames([solid(100, 50, 7)]);
        let frame = capture.screenshot(Some(Rect::new(90, 40, 30, 30))).unwrap();
        assert_eq!(frame.dimensions(), (10, 10));
    }

    #[test]
    fn test_throttle_spacing() {
        let capture = ThrottledCapture::new(ScriptedCapture::with_frames([solid(2, 2, 0)]), 50);
        assert_eq!(capture.min_interval(), Duration::from_millis(20));

        let start = Instant::now();
        for _ in 0..4 {
            assert!(capture.screenshot(None).is_some());
        }
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(capture.frame_count(), 4);
    }
}
