//! Fishing controller
//!
//! Casts, reels in and accepts collectables. On timers, and only when the
//! matching option is on, it also repairs gear and hands collectables in.

use std::time::{Duration, Instant};

use super::recovery::{self, RepairOutcome};
use super::{Activity, ActivityError, Session};
use crate::android::{Swipe, Tap};
use crate::notify::ToastLevel;
use crate::vision::{compare_color_at, ImageLibrary, MatchParams, Point, Rect, TemplateSet};

pub const CAST: &str = "cast";
pub const REEL_IN: &str = "reel_in";
pub const COLLECTABLE_CONFIRM: &str = "collectable_confirm";
pub const SUBMIT_COLLECTABLE: &str = "submit_collectable";
pub const MOOCH: &str = "mooch";

/// Pixel of the catch prompt; while it shows, reeling in is left alone
pub const CATCH_PROMPT: Point = (861, 371);
pub const CATCH_PROMPT_COLOR: &str = "fcd795-101010";

const MAX_CAST_TAPS: usize = 10;
const MAX_HAUL_STEPS: usize = 60;
const MAX_SUBMIT_STEPS: usize = 50;

pub fn template_specs() -> Vec<(&'static str, MatchParams)> {
    let mut specs = vec![
        (CAST, MatchParams::template(Rect::new(1085, 548, 71, 49))),
        (REEL_IN, MatchParams::template(Rect::new(1085, 549, 58, 43))),
        (COLLECTABLE_CONFIRM, MatchParams::template(Rect::new(769, 514, 106, 49))),
        (SUBMIT_COLLECTABLE, MatchParams::template(Rect::new(1060, 593, 82, 40))),
        (MOOCH, MatchParams::template_color(Rect::new(1090, 398, 53, 50))),
    ];
    specs.extend(recovery::shared_templates());
    specs
}

#[derive(Debug, Clone)]
struct FishState {
    casts: u64,
    repaired_at: Instant,
    submitted_at: Instant,
}

impl FishState {
    fn new(now: Instant) -> Self {
        Self {
            casts: 0,
            repaired_at: now,
            submitted_at: now,
        }
    }
}

/// Fishing controller
pub struct Fish {
    templates: TemplateSet,
    state: FishState,
}

impl Fish {
    pub fn new(library: &dyn ImageLibrary) -> Self {
        Self {
            templates: TemplateSet::load(library, &template_specs()),
            state: FishState::new(Instant::now()),
        }
    }

    /// Casts made this run
    pub fn casts(&self) -> u64 {
        self.state.casts
    }

    fn fish(&mut self, session: &Session) -> Result<(), ActivityError> {
        let frame = session.screenshot()?;
        let found = self.templates.find_all(&frame, &[CAST, REEL_IN, MOOCH]);

        if let Some(cast) = found.get(CAST) {
            self.state.casts += 1;
            log::debug!("Cast #{}", self.state.casts);
            let small_to_big = session.context().fish_settings().small_to_big;
            let button = match found.get(MOOCH) {
                Some(mooch) if small_to_big => Tap::at(mooch.rect.x + 8, mooch.rect.y + 8).wait(1.0),
                _ => Tap::at(cast.rect.x + 8, cast.rect.y + 8).wait(2.0),
            };
            for _ in 0..MAX_CAST_TAPS {
                if !session.is_running() {
                    break;
                }
                let frame = session.screenshot()?;
                if self.templates.find(&frame, REEL_IN).is_some() {
                    return Ok(());
                }
                session.tap(button.clone());
            }
            log::warn!("Line never went out");
        } else if let Some(reel) = found.get(REEL_IN) {
            let frame = session.screenshot()?;
            if compare_color_at(&frame, CATCH_PROMPT, CATCH_PROMPT_COLOR) {
                return Ok(());
            }
            log::debug!("Reeling in");
            session.tap(Tap::at(1070, 640).wait(0.2)); // sit down to skip the animation
            session.tap(Tap::at(reel.rect.x + 8, reel.rect.y + 8).wait(2.0));
            self.haul(session)?;
        } else {
            log::warn!("No fishing buttons on screen");
            session.toast(
                ToastLevel::Warning,
                "Switch to a fisher and stand at a fishing spot",
            );
            session.wait(Duration::from_secs(5));
        }
        Ok(())
    }

    /// Accept collectable prompts until the cast button is back
    fn haul(&mut self, session: &Session) -> Result<(), ActivityError> {
        for _ in 0..MAX_HAUL_STEPS {
            if !session.is_running() {
                break;
            }
            let frame = session.screenshot()?;
            let found = self.templates.find_all(&frame, &[CAST, COLLECTABLE_CONFIRM]);
            if found.found(CAST) {
                return Ok(());
            }
            match found.get(COLLECTABLE_CONFIRM) {
                Some(confirm) => {
                    log::debug!("Keeping the collectable");
                    session.tap(Tap::at(confirm.rect.x + 8, confirm.rect.y + 8).wait(1.0));
                }
                None => {
                    session.wait(Duration::from_secs(1));
                }
            }
        }
        Ok(())
    }

    fn maybe_repair(&mut self, session: &Session) -> Result<(), ActivityError> {
        let interval = session.context().timings.fish_repair_interval();
        if !session.context().fish_settings().need_repair
            || session.now().duration_since(self.state.repaired_at) <= interval
        {
            return Ok(());
        }
        if recovery::repair_equipment(session, &self.templates, true)? == RepairOutcome::Repaired {
            self.state.repaired_at = session.now();
        }
        Ok(())
    }

    fn maybe_submit(&mut self, session: &Session) -> Result<(), ActivityError> {
        let interval = session.context().timings.fish_submit_interval();
        if !session.context().fish_settings().need_submit
            || session.now().duration_since(self.state.submitted_at) <= interval
        {
            return Ok(());
        }
        let frame = session.screenshot()?;
        if self.templates.find(&frame, CAST).is_none() {
            return Ok(());
        }

        log::info!("Handing in collectables");
        session.swipe(Swipe::through(&[(230, 545), (300, 545)], 1000).wait(3.0));
        session.tap(Tap::at(1060, 290).wait(1.5));
        for _ in 0..MAX_SUBMIT_STEPS {
            if !session.is_running() {
                return Ok(());
            }
            let frame = session.screenshot()?;
            if self.templates.find(&frame, SUBMIT_COLLECTABLE).is_some() {
                session.tap(Tap::at(1100, 615).wait(1.0)); // exchange
            } else {
                break;
            }
        }
        session.tap(Tap::at(1240, 30).wait(1.0));
        self.state.submitted_at = session.now();
        Ok(())
    }
}

impl Activity for Fish {
    const NAME: &'static str = "Fish";

    fn reset(&mut self, session: &Session) {
        self.state = FishState::new(session.now());
    }

    fn tick(&mut self, session: &Session) -> Result<(), ActivityError> {
        self.fish(session)?;
        self.maybe_repair(session)?;
        self.maybe_submit(session)
    }
}
