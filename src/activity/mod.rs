//! Activity controllers
//!
//! Each controller (gathering, fishing, the Gold Saucer ball game) is an
//! [`Activity`]: a small state machine advanced one tick at a time by a
//! [`Worker`] thread. Controllers reach the emulator only through the
//! collaborators bundled in [`Context`].

pub mod fish;
pub mod gather;
pub mod goldsaucer;
pub mod recovery;
pub mod worker;

use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::android::Actuation;
use crate::config::{FishSettings, Settings, TimingSettings};
use crate::game::{SharedWorkList, WorkList};
use crate::notify::{LogNotifier, Notifier};
use crate::vision::{Capture, ScriptedText, TextRecognition};

pub use fish::Fish;
pub use gather::Gather;
pub use goldsaucer::GoldSaucer;
pub use recovery::{Maneuver, RecoveryToggle, RepairOutcome};
pub use worker::{RunFlag, Session, Worker};

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
    #[error("{0} is not running")]
    NotRunning(&'static str),
    #[error("Screen capture returned no frame")]
    CaptureUnavailable,
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One automated activity.
///
/// `tick` performs one observe-decide-act step. Errors and panics are logged
/// by the worker and the next tick runs as usual.
pub trait Activity: Send + 'static {
    /// Name used for the worker thread and in logs
    const NAME: &'static str;

    /// Clear per-run state. Called on the worker thread before the first tick.
    fn reset(&mut self, session: &Session);

    fn tick(&mut self, session: &Session) -> Result<(), ActivityError>;
}

/// Time source for controller timers and waits
pub trait Clock: Send + Sync {
    /// Monotonic time for timers
    fn now(&self) -> Instant;

    /// Wall time for progress timestamps
    fn wall_now(&self) -> SystemTime;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly.
///
/// Lets tests run controller timeouts measured in minutes without waiting.
pub struct ManualClock {
    base: Instant,
    wall_base: SystemTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            wall_base: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }

    /// Virtual time passed since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn wall_now(&self) -> SystemTime {
        self.wall_base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        thread::yield_now();
    }
}

/// Handles a controller works through, built by the host.
///
/// The work list and fish settings are shared with the host, which may read
/// or replace them while a controller runs.
#[derive(Clone)]
pub struct Context {
    pub capture: Arc<dyn Capture>,
    pub input: Arc<dyn Actuation>,
    pub text: Arc<dyn TextRecognition>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub work_list: SharedWorkList,
    pub fish_settings: Arc<RwLock<FishSettings>>,
    pub timings: TimingSettings,
}

impl Context {
    /// Context with a log notifier, the system clock, an empty work list and
    /// a text reader that never reads anything
    pub fn new(capture: Arc<dyn Capture>, input: Arc<dyn Actuation>) -> Self {
        Self {
            capture,
            input,
            text: Arc::new(ScriptedText::new()),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            work_list: WorkList::default().shared(),
            fish_settings: Arc::new(RwLock::new(FishSettings::default())),
            timings: TimingSettings::default(),
        }
    }

    pub fn with_text(mut self, text: Arc<dyn TextRecognition>) -> Self {
        self.text = text;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_work_list(mut self, work_list: SharedWorkList) -> Self {
        self.work_list = work_list;
        self
    }

    pub fn with_timings(mut self, timings: TimingSettings) -> Self {
        self.timings = timings;
        self
    }

    /// Take fish options and timers from loaded settings
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.fish_settings = Arc::new(RwLock::new(settings.fish.clone()));
        self.timings = settings.timings.clone();
        self
    }

    pub fn fish_settings(&self) -> FishSettings {
        self.fish_settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Synthetic screens and a fully faked context for controller tests
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use image::{imageops, ImageBuffer, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{Context, ManualClock, RunFlag, Session};
    use crate::android::RecordingActuation;
    use crate::notify::RecordingNotifier;
    use crate::vision::{Frame, MatchParams, MemoryImageLibrary, Rect, ScriptedCapture, ScriptedText};

    pub type Specs = [(&'static str, MatchParams)];

    /// Noise image that only `name` produces
    pub fn sprite(name: &str, width: u32, height: u32) -> RgbaImage {
        let seed = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
        let mut rng = StdRng::seed_from_u64(seed);
        ImageBuffer::from_fn(width, height, |_, _| {
            Rgba([rng.random(), rng.random(), rng.random(), 255])
        })
    }

    pub fn region(specs: &Specs, name: &str) -> Rect {
        let (_, params) = specs
            .iter()
            .find(|(n, _)| *n == name)
            .unwrap_or_else(|| panic!("no template {}", name));
        match params {
            MatchParams::Template(p) => p.region.unwrap(),
            MatchParams::Feature(p) => p.region.unwrap(),
        }
    }

    /// Sprites stay small so searches over large regions are quick
    pub fn sprite_size(region: Rect) -> (u32, u32) {
        (region.w.saturating_sub(4).min(12), region.h.saturating_sub(4).min(12))
    }

    pub fn library(specs: &Specs) -> MemoryImageLibrary {
        specs.iter().fold(MemoryImageLibrary::new(), |lib, (name, params)| {
            let r = match params {
                MatchParams::Template(p) => p.region.unwrap(),
                MatchParams::Feature(p) => p.region.unwrap(),
            };
            let (w, h) = sprite_size(r);
            lib.with(*name, sprite(name, w, h))
        })
    }

    pub fn blank() -> Frame {
        ImageBuffer::from_pixel(1280, 720, Rgba([90, 90, 90, 255]))
    }

    /// Paste `name` two pixels into its search region
    pub fn show(frame: &mut Frame, specs: &Specs, name: &str) {
        let r = region(specs, name);
        show_at(frame, specs, name, r.x + 2, r.y + 2);
    }

    pub fn show_at(frame: &mut Frame, specs: &Specs, name: &str, x: u32, y: u32) {
        let (w, h) = sprite_size(region(specs, name));
        imageops::replace(frame, &sprite(name, w, h), x as i64, y as i64);
    }

    pub fn screen(specs: &Specs, names: &[&str]) -> Frame {
        let mut frame = blank();
        for name in names {
            show(&mut frame, specs, name);
        }
        frame
    }

    pub struct Rig {
        pub capture: Arc<ScriptedCapture>,
        pub input: Arc<RecordingActuation>,
        pub notifier: Arc<RecordingNotifier>,
        pub clock: Arc<ManualClock>,
        pub text: Arc<ScriptedText>,
        pub ctx: Context,
    }

    impl Rig {
        pub fn new() -> Self {
            let capture = Arc::new(ScriptedCapture::new());
            let input = Arc::new(RecordingActuation::new());
            let notifier = Arc::new(RecordingNotifier::new());
            let clock = Arc::new(ManualClock::new());
            let text = Arc::new(ScriptedText::new());
            let ctx = Context::new(capture.clone(), input.clone())
                .with_notifier(notifier.clone())
                .with_clock(clock.clone())
                .with_text(text.clone());
            Self {
                capture,
                input,
                notifier,
                clock,
                text,
                ctx,
            }
        }

        pub fn session(&self) -> Session {
            Session::new(self.ctx.clone(), RunFlag::running())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::RecordingActuation;
    use crate::vision::ScriptedCapture;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        let wall = clock.wall_now();
        clock.sleep(Duration::from_secs(90));
        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!(
            clock.wall_now().duration_since(wall).unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_context_from_settings() {
        let mut settings = Settings::default();
        settings.fish = FishSettings::mooch_preset();
        settings.timings.stuck_timeout = 60;

        let ctx = Context::new(
            Arc::new(ScriptedCapture::new()),
            Arc::new(RecordingActuation::new()),
        )
        .with_settings(&settings);

        assert!(ctx.fish_settings().small_to_big);
        assert_eq!(ctx.timings.stuck_timeout, 60);
        assert!(ctx.work_list.read().unwrap().items().is_empty());
    }
}
