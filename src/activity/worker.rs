//! Controller threads and cooperative waiting
//!
//! A [`Worker`] owns one activity and runs it on a dedicated thread until
//! stopped. Everything the activity does goes through a [`Session`], whose
//! waits poll the [`RunFlag`] so `stop` takes effect within one poll interval
//! even in the middle of a long pause.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use super::{Activity, ActivityError, Context};
use crate::android::{Swipe, Tap, TouchCommand};
use crate::config::{ConfigError, FishSettings};
use crate::game::{GatherItem, ItemProgress};
use crate::notify::ToastLevel;
use crate::vision::Frame;

/// Longest single sleep inside a cooperative wait
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between two ticks of the run loop
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Shared running flag
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// A flag that is already raised
    pub fn running() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What an activity sees of the world during one run
pub struct Session {
    ctx: Context,
    flag: RunFlag,
}

impl Session {
    pub fn new(ctx: Context, flag: RunFlag) -> Self {
        Self { ctx, flag }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_running()
    }

    /// Ask the run to end; the current wait returns early
    pub fn stop(&self) {
        self.flag.stop();
    }

    pub fn screenshot(&self) -> Result<Frame, ActivityError> {
        self.ctx
            .capture
            .screenshot(None)
            .ok_or(ActivityError::CaptureUnavailable)
    }

    pub fn now(&self) -> Instant {
        self.ctx.clock.now()
    }

    pub fn wall_now(&self) -> SystemTime {
        self.ctx.clock.wall_now()
    }

    /// Sleep for `duration`, waking every [`POLL_INTERVAL`] to check the flag.
    ///
    /// Returns `false` when the run was stopped before the time was up.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = self.ctx.clock.now() + duration;
        loop {
            if !self.is_running() {
                return false;
            }
            let now = self.ctx.clock.now();
            if now >= deadline {
                return true;
            }
            self.ctx.clock.sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    pub fn wait_secs(&self, secs: f32) -> bool {
        self.wait(Duration::from_secs_f32(secs.max(0.0)))
    }

    /// Send a touch command, then wait its `wait_after`.
    ///
    /// Skipped once stopped. Input failures are logged and otherwise ignored;
    /// the next observation decides what to do about them.
    pub fn perform(&self, command: TouchCommand) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Err(e) = self.ctx.input.perform(&command) {
            log::warn!("Touch {:?} failed: {}", command, e);
        }
        self.wait(command.wait_after())
    }

    pub fn tap(&self, tap: Tap) -> bool {
        self.perform(TouchCommand::Tap(tap))
    }

    pub fn swipe(&self, swipe: Swipe) -> bool {
        self.perform(TouchCommand::Swipe(swipe))
    }

    pub fn toast(&self, level: ToastLevel, message: &str) {
        self.ctx.notifier.toast(level, message);
    }
}

/// Runs one activity on its own thread
pub struct Worker<A: Activity> {
    activity: Arc<Mutex<A>>,
    ctx: Context,
    flag: RunFlag,
    handle: Option<JoinHandle<()>>,
}

impl<A: Activity> Worker<A> {
    pub fn new(activity: A, ctx: Context) -> Self {
        Self {
            activity: Arc::new(Mutex::new(activity)),
            ctx,
            flag: RunFlag::default(),
            handle: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Start the run loop. Refused while a previous run is still going.
    pub fn start(&mut self) -> Result<(), ActivityError> {
        if self.is_running() {
            return Err(ActivityError::AlreadyRunning(A::NAME));
        }
        if let Some(handle) = self.handle.take() {
            // Finished on its own; collect it before starting over
            let _ = handle.join();
        }

        self.flag.raise();
        let session = Session::new(self.ctx.clone(), self.flag.clone());
        let activity = Arc::clone(&self.activity);
        let spawned = thread::Builder::new()
            .name(A::NAME.to_lowercase())
            .spawn(move || run_loop(&activity, &session));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.flag.stop();
                Err(ActivityError::Spawn(e))
            }
        }
    }

    /// Stop the run loop and wait for the thread to finish
    pub fn stop(&mut self) -> Result<(), ActivityError> {
        self.flag.stop();
        let handle = self.handle.take().ok_or(ActivityError::NotRunning(A::NAME))?;
        handle
            .join()
            .map_err(|_| ActivityError::WorkerPanicked(A::NAME))
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_running() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<A: Activity> Drop for Worker<A> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop() {
                log::error!("{}", e);
            }
        }
    }
}

fn run_loop<A: Activity>(activity: &Mutex<A>, session: &Session) {
    log::info!("{} started", A::NAME);
    let mut activity = activity.lock().unwrap_or_else(|e| e.into_inner());
    activity.reset(session);

    while session.is_running() {
        match panic::catch_unwind(AssertUnwindSafe(|| activity.tick(session))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("{} tick failed: {}", A::NAME, e),
            Err(_) => log::error!("{} tick panicked", A::NAME),
        }
        session.wait(TICK_INTERVAL);
    }
    log::info!("{} stopped", A::NAME);
}

impl Worker<super::Gather> {
    /// Per-item progress of the shared work list
    pub fn progress(&self) -> std::collections::BTreeMap<String, ItemProgress> {
        self.ctx
            .work_list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .progress()
    }

    /// Replace the work list; picked up on the next tick
    pub fn set_work_list(&self, items: Vec<GatherItem>) {
        self.ctx
            .work_list
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set(items);
    }
}

impl Worker<super::Fish> {
    pub fn settings(&self) -> FishSettings {
        self.ctx.fish_settings()
    }

    /// Change one fishing option by name; takes effect on the next tick
    pub fn update_setting(&self, key: &str, value: bool) -> Result<(), ConfigError> {
        self.ctx
            .fish_settings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .update(key, value)
    }
}
