//! Gathering controller
//!
//! Works through the shared work list: picks the first unfinished item,
//! switches to the job that gathers it, opens the gathering log to path to a
//! node, then collects the item from the node's window. Pathing failures,
//! worn gear and long stalls each have a scripted way out.
//!
//! One tick runs select-target, navigate and collect once, or the repair or
//! unstuck step when their flags are raised.

use std::time::{Duration, Instant};

use super::recovery::{self, RecoveryToggle, RepairOutcome, CLOSE_BUTTON};
use super::{Activity, ActivityError, Session};
use crate::android::{Swipe, Tap, TouchCommand};
use crate::game::catalog::{self, Job};
use crate::notify::ToastLevel;
use crate::vision::{
    normalise_text, ImageLibrary, MatchParams, MatchResult, MatchResultContainer, Rect,
    TemplateSet,
};

pub const MAIN_HUD: &str = "main_hud";
pub const SWITCH_JOB_PROMPT: &str = "switch_job_prompt";
pub const NOTE_BUTTON: &str = "note_button";
pub const NOTE_UI: &str = "note_ui";
pub const PATH_BUTTON: &str = "path_button";
pub const CANCEL_PATH_BUTTON: &str = "cancel_path_button";
pub const NAVIGATING: &str = "navigating";
pub const FLYING: &str = "flying";
pub const CAN_HARVEST: &str = "can_harvest";
pub const CAN_MINE: &str = "can_mine";
pub const GATHERING_EXHAUSTED: &str = "gathering_exhausted";
pub const COMBAT_TOGGLE: &str = "combat_toggle";
pub const PATH_INTERRUPTED: &str = "path_interrupted";
pub const PATH_IMPOSSIBLE: &str = "path_impossible";
pub const PATH_BLOCKED_WHILE_GATHERING: &str = "path_blocked_while_gathering";
pub const MINER_ICON: &str = "miner_icon";
pub const BOTANIST_ICON: &str = "botanist_icon";

/// No "navigating" sign this long after starting a path means it never began
pub const PATH_START_TIMEOUT: Duration = Duration::from_secs(10);
pub const PATH_TIMEOUT: Duration = Duration::from_secs(120);
/// A close button still showing this long after tapping "path" means the tap
/// missed
pub const PATH_TAP_TIMEOUT: Duration = Duration::from_secs(5);

/// The HUD must stay up this long before a collect counts as done
pub const COLLECT_SETTLE: Duration = Duration::from_secs(5);
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the node window lists its items
pub const ITEM_LIST_REGION: Rect = Rect::new(20, 61, 212, 232);
const ITEM_TAP_X: u32 = 370;

const MAX_UI_STEPS: usize = 5;
const POLL: Duration = Duration::from_millis(100);
const BACK_BUTTON: (u32, u32) = (1240, 30);

const NAV_SIGNALS: [&str; 8] = [
    NAVIGATING,
    MAIN_HUD,
    CAN_HARVEST,
    CAN_MINE,
    CLOSE_BUTTON,
    PATH_INTERRUPTED,
    PATH_IMPOSSIBLE,
    PATH_BLOCKED_WHILE_GATHERING,
];

/// Every template the controller searches for
pub fn template_specs() -> Vec<(&'static str, MatchParams)> {
    let path_area = Rect::new(271, 117, 856, 557);
    let job_icon = Rect::new(442, 649, 38, 37);
    let mut specs = vec![
        (MAIN_HUD, MatchParams::template(Rect::new(58, 619, 350, 92))),
        (SWITCH_JOB_PROMPT, MatchParams::template(Rect::new(575, 200, 127, 48))),
        (NOTE_BUTTON, MatchParams::template(Rect::new(1185, 294, 42, 37))),
        (NOTE_UI, MatchParams::template(Rect::new(192, 7, 95, 45))),
        (PATH_BUTTON, MatchParams::template(path_area)),
        (CANCEL_PATH_BUTTON, MatchParams::template(path_area)),
        (NAVIGATING, MatchParams::template(Rect::new(527, 521, 218, 41))),
        (FLYING, MatchParams::template(Rect::new(1098, 511, 44, 31))),
        (CAN_HARVEST, MatchParams::template(Rect::new(718, 334, 33, 37))),
        (CAN_MINE, MatchParams::template(Rect::new(717, 328, 35, 37))),
        (GATHERING_EXHAUSTED, MatchParams::template(Rect::new(479, 62, 153, 183))),
        (COMBAT_TOGGLE, MatchParams::template(Rect::new(1190, 632, 28, 27))),
        (PATH_INTERRUPTED, MatchParams::template(Rect::new(451, 91, 210, 155))),
        (PATH_IMPOSSIBLE, MatchParams::template(Rect::new(534, 59, 145, 152))),
        (
            PATH_BLOCKED_WHILE_GATHERING,
            MatchParams::template(Rect::new(487, 67, 218, 125)),
        ),
        (MINER_ICON, MatchParams::template(job_icon)),
        (BOTANIST_ICON, MatchParams::template(job_icon)),
    ];
    specs.extend(recovery::shared_templates());
    specs.push(recovery::mounted_template());
    specs
}

/// What one poll of an active path says
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavEvent {
    /// Keep polling
    Continue,
    /// The path looks finished; look once more after a pause
    Settle,
    Arrived,
    /// A gatherable node is in reach
    AtNode,
    Interrupted,
    Impossible,
    /// A collect window is still open underneath
    BlockedWhileGathering,
    /// Pathing never started
    NoSignal,
    Timeout,
    /// The path button was never pressed
    NotStarted,
}

/// What has been seen so far on the current path
#[derive(Debug, Clone, Default)]
pub struct NavProgress {
    seen_navigating: bool,
    settling: bool,
}

/// Classify one poll of an active path. `elapsed` counts from the path tap.
pub fn nav_step(
    found: &MatchResultContainer,
    progress: &mut NavProgress,
    elapsed: Duration,
) -> NavEvent {
    let navigating = found.found(NAVIGATING);
    if navigating && !progress.seen_navigating {
        progress.seen_navigating = true;
        NavEvent::Continue
    } else if found.found(PATH_BLOCKED_WHILE_GATHERING) {
        NavEvent::BlockedWhileGathering
    } else if found.found(PATH_INTERRUPTED) {
        NavEvent::Interrupted
    } else if found.found(PATH_IMPOSSIBLE) {
        NavEvent::Impossible
    } else if !progress.seen_navigating && elapsed > PATH_START_TIMEOUT {
        NavEvent::NoSignal
    } else if elapsed > PATH_TIMEOUT {
        NavEvent::Timeout
    } else if found.found(CLOSE_BUTTON) && elapsed > PATH_TAP_TIMEOUT {
        NavEvent::NotStarted
    } else if found.found(CAN_HARVEST) || found.found(CAN_MINE) {
        NavEvent::AtNode
    } else if found.found(MAIN_HUD) && progress.seen_navigating && !navigating {
        if progress.settling {
            NavEvent::Arrived
        } else {
            progress.settling = true;
            NavEvent::Settle
        }
    } else {
        NavEvent::Continue
    }
}

const LEVEL_LIST: (u32, u32) = (268, 150);
const LEVEL_POINTS: [(u32, u32); 8] = [
    (268, 190),
    (268, 230),
    (268, 270),
    (268, 310),
    (268, 350),
    (268, 390),
    (268, 430),
    (268, 460),
];
const ITEM_POINTS: [(u32, u32); 6] = [
    (350, 215),
    (350, 300),
    (350, 385),
    (350, 470),
    (350, 555),
    (350, 640),
];
const ITEM_PITCH: u32 = 85;

fn tap(point: (u32, u32), secs: f32) -> TouchCommand {
    TouchCommand::Tap(Tap::at(point.0, point.1).wait(secs))
}

fn swipe(points: &[(u32, u32)], duration_ms: u64, secs: f32) -> TouchCommand {
    TouchCommand::Swipe(Swipe::through(points, duration_ms).wait(secs))
}

/// Touches that pick the level band of `level` in the gathering log.
///
/// The list shows seven bands of five levels; higher bands are scrolled into
/// view first. Levels outside 1..=50 only reset the list.
pub fn level_plan(level: u32) -> Vec<TouchCommand> {
    // Reopen the list so it starts from the top
    let mut plan = vec![
        tap(LEVEL_LIST, 0.5),
        tap(LEVEL_POINTS[0], 0.5),
        tap(LEVEL_LIST, 0.5),
    ];
    let scroll = |steps: u32| {
        let (x, y) = LEVEL_POINTS[6];
        swipe(&[(x, y), (x, y - 40 * steps)], 500, 0.5)
    };
    match level {
        1..=35 => plan.push(tap(LEVEL_POINTS[((level - 1) / 5) as usize], 0.5)),
        36..=40 => plan.extend([scroll(1), tap(LEVEL_POINTS[6], 0.5)]),
        41..=45 => plan.extend([scroll(2), tap(LEVEL_POINTS[6], 0.5)]),
        46..=50 => plan.extend([scroll(3), tap(LEVEL_POINTS[7], 0.5)]),
        _ => log::warn!("No gathering log band for level {}", level),
    }
    plan
}

/// Touches that pick the `index`th (1-based) item of a log page.
///
/// Six items fit on screen; later ones are scrolled up under the last slot.
pub fn item_plan(index: u32) -> Vec<TouchCommand> {
    match index {
        0 => {
            log::warn!("Gathering log index starts at 1");
            Vec::new()
        }
        1..=6 => vec![tap(ITEM_POINTS[(index - 1) as usize], 0.5)],
        _ => {
            let (x, y) = ITEM_POINTS[5];
            let mut plan = Vec::new();
            for _ in 0..(index - 6) / 6 {
                plan.push(swipe(
                    &[(x, y), (x, y - ITEM_PITCH * 3), (x, y - ITEM_PITCH * 6 - 5)],
                    1000,
                    0.5,
                ));
            }
            if index % 6 != 0 {
                plan.push(swipe(&[(x, y), (x, y - ITEM_PITCH * (index % 6))], 500, 0.5));
            }
            plan.push(tap((x, y), 0.5));
            plan
        }
    }
}

/// Per-run controller state
#[derive(Debug, Clone)]
struct GatherState {
    target: Option<String>,
    /// Item the gathering log was last set to
    note_target: Option<String>,
    need_repair: bool,
    stuck: bool,
    repaired_at: Instant,
    last_collect: Instant,
    toggle: RecoveryToggle,
}

impl GatherState {
    fn new(now: Instant) -> Self {
        Self {
            target: None,
            note_target: None,
            need_repair: false,
            stuck: false,
            repaired_at: now,
            last_collect: now,
            toggle: RecoveryToggle::new(),
        }
    }
}

/// Gathering controller
pub struct Gather {
    templates: TemplateSet,
    state: GatherState,
}

impl Gather {
    pub fn new(library: &dyn ImageLibrary) -> Self {
        Self {
            templates: TemplateSet::load(library, &template_specs()),
            state: GatherState::new(Instant::now()),
        }
    }

    /// Item currently worked on
    pub fn target(&self) -> Option<&str> {
        self.state.target.as_deref()
    }

    pub fn needs_repair(&self) -> bool {
        self.state.need_repair
    }

    pub fn is_stuck(&self) -> bool {
        self.state.stuck
    }

    fn refresh_timers(&mut self, session: &Session) {
        let now = session.now();
        let timings = &session.context().timings;
        if now.duration_since(self.state.last_collect) > timings.stuck_timeout() {
            log::warn!(
                "Nothing gathered for {}s, assuming stuck",
                timings.stuck_timeout
            );
            self.state.last_collect = now;
            self.state.stuck = true;
        } else if now.duration_since(self.state.repaired_at) > timings.gather_repair_interval() {
            log::info!("Repair interval reached");
            self.state.need_repair = true;
        }
    }

    /// Keep the current target while it is unfinished, otherwise move to the
    /// first unfinished item. `None` when the whole list is done.
    fn select_target(&mut self, session: &Session) -> Result<Option<String>, ActivityError> {
        let (keep, next) = {
            let list = session
                .context()
                .work_list
                .read()
                .unwrap_or_else(|e| e.into_inner());
            let keep = self.state.target.as_deref().is_some_and(|t| list.is_pending(t));
            (keep, list.next_target().map(|i| (i.name.clone(), i.job)))
        };
        if keep {
            return Ok(self.state.target.clone());
        }

        match next {
            Some((name, job)) => {
                log::info!("Next target: {} ({})", name, job);
                self.state.target = Some(name.clone());
                self.switch_job(session, job)?;
                Ok(Some(name))
            }
            None => {
                self.state.target = None;
                session.toast(ToastLevel::Success, "Gathering list complete");
                session.wait(Duration::from_secs(10));
                Ok(None)
            }
        }
    }

    fn switch_job(&mut self, session: &Session, job: Job) -> Result<(), ActivityError> {
        let icon = match job {
            Job::Miner => MINER_ICON,
            Job::Botanist => BOTANIST_ICON,
        };
        for _ in 0..MAX_UI_STEPS {
            let frame = session.screenshot()?;
            let found = self
                .templates
                .find_all(&frame, &[COMBAT_TOGGLE, CLOSE_BUTTON, icon]);
            if found.found(COMBAT_TOGGLE) {
                if found.found(icon) {
                    log::debug!("Already a {}", job);
                    return Ok(());
                }
                log::info!("Switching job to {}", job);
                recovery::cancel_collect(session)?;
                session.tap(Tap::at(463, 668).wait(0.8)); // gear sets
                session.tap(Tap::at(1139, 669).wait(0.8)); // gathering jobs
                let slot = match job {
                    Job::Miner => Tap::at(1155, 143),
                    Job::Botanist => Tap::at(1155, 200),
                };
                session.tap(slot.wait(1.5));
                return Ok(());
            }
            match found.get(CLOSE_BUTTON) {
                Some(close) => {
                    session.tap(Tap::at(close.rect.x, close.rect.y).wait(0.8));
                }
                None => return Ok(()),
            }
        }
        log::warn!("Job switch gave up after {} steps", MAX_UI_STEPS);
        Ok(())
    }

    fn navigate(&mut self, session: &Session, target: &str) -> Result<(), ActivityError> {
        let frame = session.screenshot()?;
        let found = self
            .templates
            .find_all(&frame, &[FLYING, NOTE_BUTTON, PATH_BUTTON, CANCEL_PATH_BUTTON]);

        if found.found(FLYING) {
            if !recovery::dismount(session, &self.templates)? {
                self.state.stuck = true;
            }
        } else if let Some(button) = found.get(NOTE_BUTTON) {
            self.open_note(session, button, target)?;
        } else if let Some(button) = found.get(PATH_BUTTON) {
            self.follow_path(session, button)?;
        } else if let Some(button) = found.get(CANCEL_PATH_BUTTON) {
            log::debug!("Cancelling a pending path");
            let (x, y) = button.offset(8, 8);
            session.tap(Tap::at(x, y).wait(0.5));
            session.tap(Tap::at(10, 30).wait(0.5)); // off the path button
            session.tap(Tap::at(BACK_BUTTON.0, BACK_BUTTON.1).wait(0.7));
            session.tap(Tap::at(913, 436).wait(2.0));
        } else {
            recovery::cancel_collect(session)?;
            let frame = session.screenshot()?;
            if let Some(close) = self.templates.find(&frame, CLOSE_BUTTON) {
                session.tap(Tap::at(close.rect.x, close.rect.y).wait(0.8));
            }
        }
        Ok(())
    }

    fn open_note(
        &mut self,
        session: &Session,
        button: &MatchResult,
        target: &str,
    ) -> Result<(), ActivityError> {
        recovery::cancel_collect(session)?;
        let (x, y) = button.offset(10, 10);
        session.tap(Tap::at(x, y).wait(1.0));

        let frame = session.screenshot()?;
        if self.templates.find(&frame, NOTE_UI).is_none() {
            log::debug!("Gathering log did not open");
            return Ok(());
        }

        if self.state.note_target.as_deref() != Some(target) {
            let position = session
                .context()
                .work_list
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(target)
                .map(|i| (i.level, i.note_index));
            if let Some((level, note_index)) = position {
                log::debug!("Selecting {} in the gathering log", target);
                for command in level_plan(level).into_iter().chain(item_plan(note_index)) {
                    session.perform(command);
                }
                self.state.note_target = Some(target.to_string());
            }
        }
        session.tap(Tap::at(880, 440).wait(2.0)); // gathering point
        Ok(())
    }

    fn follow_path(
        &mut self,
        session: &Session,
        button: &MatchResult,
    ) -> Result<(), ActivityError> {
        let frame = session.screenshot()?;
        if self.templates.find(&frame, SWITCH_JOB_PROMPT).is_some() {
            session.tap(Tap::at(780, 470).wait(1.0));
        }
        let (x, y) = button.offset(8, 8);
        session.tap(Tap::at(x, y).wait(3.0));

        let start = session.now();
        let mut progress = NavProgress::default();
        while session.is_running() {
            session.wait(POLL);
            let frame = session.screenshot()?;
            let found = self.templates.find_all(&frame, &NAV_SIGNALS);
            let event = nav_step(&found, &mut progress, session.now().duration_since(start));
            match event {
                NavEvent::Continue => continue,
                NavEvent::Settle => {
                    session.wait(Duration::from_secs(1));
                    continue;
                }
                NavEvent::Arrived | NavEvent::AtNode => log::debug!("Path ended: {:?}", event),
                NavEvent::BlockedWhileGathering => {
                    log::warn!("Cannot path with a collect window open");
                    session.tap(Tap::at(BACK_BUTTON.0, BACK_BUTTON.1).wait(1.0));
                    session.tap(Tap::at(BACK_BUTTON.0, BACK_BUTTON.1).wait(1.0));
                    recovery::walk_back(session);
                }
                NavEvent::Interrupted => {
                    let maneuver = self.state.toggle.next();
                    log::warn!("Path interrupted, trying {:?}", maneuver);
                    recovery::perform(maneuver, session, &self.templates)?;
                }
                NavEvent::Impossible => {
                    log::warn!("No path to the node, walking back");
                    recovery::walk_back(session);
                }
                NavEvent::NoSignal | NavEvent::Timeout | NavEvent::NotStarted => {
                    log::warn!("Path abandoned: {:?}", event);
                }
            }
            break;
        }
        Ok(())
    }

    fn collect(&mut self, session: &Session, target: &str) -> Result<(), ActivityError> {
        let frame = session.screenshot()?;
        let found = self.templates.find_all(&frame, &[CAN_HARVEST, CAN_MINE]);
        if found.found_names().is_empty() {
            return Ok(());
        }

        session.tap(Tap::at(790, 350).wait(1.5));
        let start = session.now();
        self.state.last_collect = start;
        log::debug!("Collecting {}", target);

        let Some((x, y)) = self.locate_in_list(session, target)? else {
            log::warn!("{} is not offered by this node", target);
            recovery::cancel_collect(session)?;
            return Ok(());
        };

        let mut hud_since: Option<Instant> = None;
        while session.is_running() {
            session.wait(POLL);
            let frame = session.screenshot()?;
            let found = self.templates.find_all(&frame, &[MAIN_HUD, GATHERING_EXHAUSTED]);
            let now = session.now();

            if found.found(GATHERING_EXHAUSTED) {
                log::error!("Gathering power exhausted, gear needs repair");
                self.state.need_repair = true;
                recovery::cancel_collect(session)?;
                return Ok(());
            }
            if found.found(MAIN_HUD) {
                let since = *hud_since.get_or_insert(now);
                if now.duration_since(since) > COLLECT_SETTLE {
                    self.record_success(session, target);
                    return Ok(());
                }
            } else {
                hud_since = None;
                session.tap(Tap::at(x, y));
            }
            if now.duration_since(start) > COLLECT_TIMEOUT {
                log::warn!("Collect timed out");
                recovery::cancel_collect(session)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Find `target` in the node's item list, scrolling while new items keep
    /// appearing. Returns the point to tap.
    fn locate_in_list(
        &self,
        session: &Session,
        target: &str,
    ) -> Result<Option<(u32, u32)>, ActivityError> {
        let wanted = normalise_text(target);
        let mut seen: Vec<&'static str> = Vec::new();
        while session.is_running() {
            let frame = session.screenshot()?;
            let mut lines: Vec<(String, Rect)> = session
                .context()
                .text
                .read_all_in(&frame, ITEM_LIST_REGION)
                .into_iter()
                .collect();
            lines.sort_by_key(|(_, r)| (r.y, r.x));

            let mut grew = false;
            for (text, rect) in &lines {
                if normalise_text(text) == wanted {
                    return Ok(Some((ITEM_TAP_X, rect.y + rect.h / 2)));
                }
                if let Some((name, _)) = catalog::lookup_loose(text) {
                    if !seen.contains(&name) {
                        seen.push(name);
                        grew = true;
                    }
                }
            }
            if !grew {
                return Ok(None);
            }
            session.swipe(Swipe::through(&[(195, 280), (195, 80)], 1500).wait(2.0));
        }
        Ok(None)
    }

    fn record_success(&mut self, session: &Session, target: &str) {
        let now = session.wall_now();
        let mut list = session
            .context()
            .work_list
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(item) = list.record_success(target, now) {
            log::info!(
                "Gathered {} ({}/{}, {:.2}/min)",
                item.name,
                item.complete,
                item.need,
                item.num_per_min
            );
        }
        self.state.toggle.reset();
    }

    fn repair(&mut self, session: &Session) -> Result<(), ActivityError> {
        match recovery::repair_equipment(session, &self.templates, false)? {
            RepairOutcome::Repaired => {
                self.state.need_repair = false;
                self.state.repaired_at = session.now();
            }
            RepairOutcome::Dismissed => {}
            RepairOutcome::NotFound => {
                if self.state.need_repair {
                    log::warn!("Character window unreachable, UI may be stuck");
                    self.state.stuck = true;
                }
            }
        }
        Ok(())
    }

    fn unstuck(&mut self, session: &Session) -> Result<(), ActivityError> {
        recovery::teleport(session)?;
        self.state.stuck = false;
        Ok(())
    }
}

impl Activity for Gather {
    const NAME: &'static str = "Gather";

    fn reset(&mut self, session: &Session) {
        self.state = GatherState::new(session.now());
    }

    fn tick(&mut self, session: &Session) -> Result<(), ActivityError> {
        self.refresh_timers(session);
        let Some(target) = self.select_target(session)? else {
            return Ok(());
        };
        if !self.state.need_repair && !self.state.stuck {
            self.navigate(session, &target)?;
            self.collect(session, &target)?;
        }
        if self.state.need_repair && !self.state.stuck {
            self.repair(session)?;
        }
        if self.state.stuck {
            self.unstuck(session)?;
        }
        Ok(())
    }
}
