//! Touch command generation and dispatch
//!
//! Controllers speak in 1280x720 reference coordinates. [`ScaledActuation`]
//! maps them onto the emulator's real resolution before handing them to the
//! device backend.

use std::sync::Mutex;
use std::time::Duration;

/// Reference resolution every screen coordinate in this crate is written for
pub const REFERENCE_WIDTH: u32 = 1280;
pub const REFERENCE_HEIGHT: u32 = 720;

/// Default press duration for a tap
pub const DEFAULT_HOLD_MS: u64 = 100;

/// A press at one point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tap {
    pub x: u32,
    pub y: u32,
    pub hold_ms: u64,
    /// Pause the caller takes once the tap is done
    pub wait_after: Duration,
    pub repeats: u32,
}

impl Tap {
    pub fn at(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            hold_ms: DEFAULT_HOLD_MS,
            wait_after: Duration::from_millis(100),
            repeats: 1,
        }
    }

    pub fn wait(mut self, secs: f32) -> Self {
        self.wait_after = Duration::from_secs_f32(secs.max(0.0));
        self
    }

    pub fn hold(mut self, hold_ms: u64) -> Self {
        self.hold_ms = hold_ms;
        self
    }

    pub fn repeat(mut self, repeats: u32) -> Self {
        self.repeats = repeats.max(1);
        self
    }
}

/// A drag through a polyline of points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swipe {
    pub points: Vec<(u32, u32)>,
    pub duration_ms: u64,
    pub wait_after: Duration,
}

impl Swipe {
    pub fn through(points: &[(u32, u32)], duration_ms: u64) -> Self {
        Self {
            points: points.to_vec(),
            duration_ms,
            wait_after: Duration::from_millis(100),
        }
    }

    pub fn wait(mut self, secs: f32) -> Self {
        self.wait_after = Duration::from_secs_f32(secs.max(0.0));
        self
    }
}

/// Either kind of touch, as recorded or replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchCommand {
    Tap(Tap),
    Swipe(Swipe),
}

impl TouchCommand {
    pub fn wait_after(&self) -> Duration {
        match self {
            TouchCommand::Tap(t) => t.wait_after,
            TouchCommand::Swipe(s) => s.wait_after,
        }
    }
}

/// Input backend errors
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Input device not connected")]
    Disconnected,
    #[error("Input rejected: {0}")]
    Rejected(String),
}

/// Synthetic touch sink.
///
/// Implementations perform the gesture itself (press, hold, drag, repeats).
/// The `wait_after` pause is left to the caller so it can be interrupted.
pub trait Actuation: Send + Sync {
    fn tap(&self, tap: &Tap) -> Result<(), InputError>;

    fn swipe(&self, swipe: &Swipe) -> Result<(), InputError>;

    fn perform(&self, command: &TouchCommand) -> Result<(), InputError> {
        match command {
            TouchCommand::Tap(t) => self.tap(t),
            TouchCommand::Swipe(s) => self.swipe(s),
        }
    }
}

/// Reference-to-device coordinate mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenCoordinates {
    pub ref_width: u32,
    pub ref_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl ScreenCoordinates {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            ref_width: REFERENCE_WIDTH,
            ref_height: REFERENCE_HEIGHT,
            screen_width,
            screen_height,
        }
    }

    pub fn scale_x(&self, x: u32) -> u32 {
        (x as u64 * self.screen_width as u64 / self.ref_width as u64) as u32
    }

    pub fn scale_y(&self, y: u32) -> u32 {
        (y as u64 * self.screen_height as u64 / self.ref_height as u64) as u32
    }

    pub fn scale_point(&self, (x, y): (u32, u32)) -> (u32, u32) {
        (self.scale_x(x), self.scale_y(y))
    }

    pub fn is_identity(&self) -> bool {
        self.ref_width == self.screen_width && self.ref_height == self.screen_height
    }
}

impl Default for ScreenCoordinates {
    fn default() -> Self {
        Self::new(REFERENCE_WIDTH, REFERENCE_HEIGHT)
    }
}

/// Scales reference coordinates before forwarding to `inner`
pub struct ScaledActuation<A> {
    inner: A,
    coords: ScreenCoordinates,
}

impl<A: Actuation> ScaledActuation<A> {
    pub fn new(inner: A, screen_width: u32, screen_height: u32) -> Self {
        Self {
            inner,
            coords: ScreenCoordinates::new(screen_width, screen_height),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Actuation> Actuation for ScaledActuation<A> {
    fn tap(&self, tap: &Tap) -> Result<(), InputError> {
        let (x, y) = self.coords.scale_point((tap.x, tap.y));
        self.inner.tap(&Tap { x, y, ..tap.clone() })
    }

    fn swipe(&self, swipe: &Swipe) -> Result<(), InputError> {
        let points = swipe
            .points
            .iter()
            .map(|&p| self.coords.scale_point(p))
            .collect();
        self.inner.swipe(&Swipe {
            points,
            ..swipe.clone()
        })
    }
}

/// Records every command instead of touching a device
#[derive(Default)]
pub struct RecordingActuation {
    commands: Mutex<Vec<TouchCommand>>,
}

impl RecordingActuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<TouchCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tap points in order
    pub fn taps(&self) -> Vec<(u32, u32)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                TouchCommand::Tap(t) => Some((t.x, t.y)),
                TouchCommand::Swipe(_) => None,
            })
            .collect()
    }

    /// Taps with their hold durations
    pub fn holds(&self) -> Vec<((u32, u32), u64)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                TouchCommand::Tap(t) => Some(((t.x, t.y), t.hold_ms)),
                TouchCommand::Swipe(_) => None,
            })
            .collect()
    }

    pub fn swipes(&self) -> Vec<Swipe> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                TouchCommand::Swipe(s) => Some(s),
                TouchCommand::Tap(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, command: TouchCommand) {
        log::trace!("touch {:?}", command);
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
    }
}

impl Actuation for RecordingActuation {
    fn tap(&self, tap: &Tap) -> Result<(), InputError> {
        self.record(TouchCommand::Tap(tap.clone()));
        Ok(())
    }

    fn swipe(&self, swipe: &Swipe) -> Result<(), InputError> {
        self.record(TouchCommand::Swipe(swipe.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_scaling() {
        let coords = ScreenCoordinates::new(1920, 1080);
        assert_eq!(coords.scale_point((640, 360)), (960, 540));
        assert_eq!(coords.scale_point((1280, 720)), (1920, 1080));
        assert!(ScreenCoordinates::default().is_identity());
    }

    #[test]
    fn test_tap_builder() {
        let tap = Tap::at(790, 350).wait(1.5).hold(1200).repeat(0);
        assert_eq!(tap.wait_after, Duration::from_millis(1500));
        assert_eq!(tap.hold_ms, 1200);
        assert_eq!(tap.repeats, 1);
    }

    #[test]
    fn test_recording() {
        let input = RecordingActuation::new();
        input.tap(&Tap::at(1, 2)).unwrap();
        input
            .swipe(&Swipe::through(&[(230, 545), (230, 370)], 1500))
            .unwrap();
        input.perform(&TouchCommand::Tap(Tap::at(3, 4).hold(50))).unwrap();

        assert_eq!(input.commands().len(), 3);
        assert_eq!(input.taps(), vec![(1, 2), (3, 4)]);
        assert_eq!(input.holds()[1], ((3, 4), 50));
        assert_eq!(input.swipes()[0].duration_ms, 1500);

        input.clear();
        assert!(input.commands().is_empty());
    }

    #[test]
    fn test_scaled_actuation() {
        let scaled = ScaledActuation::new(RecordingActuation::new(), 2560, 1440);
        scaled.tap(&Tap::at(640, 360)).unwrap();
        scaled
            .swipe(&Swipe::through(&[(100, 100), (200, 200)], 500))
            .unwrap();

        assert_eq!(scaled.inner().taps(), vec![(1280, 720)]);
        assert_eq!(scaled.inner().swipes()[0].points, vec![(200, 200), (400, 400)]);
    }
}
