//! Scripted recovery maneuvers
//!
//! Fixed touch sequences that get a character out of trouble: backing out of
//! a collect window, moving off an obstacle, teleporting to a safe point and
//! repairing gear. Coordinates are in the 1280x720 reference frame.

use std::time::Duration;

use super::{ActivityError, Session};
use crate::android::{Swipe, Tap};
use crate::vision::{compare_color, MatchParams, Point, Rect, TemplateSet};

pub const CHARACTER_BUTTON: &str = "character_button";
pub const CHARACTER_UI: &str = "character_ui";
pub const CLOSE_BUTTON: &str = "close_button";
pub const MOUNTED: &str = "mounted";

/// White banner pixels shown while a collect window is open
pub const COLLECT_BANNER: [Point; 3] = [(447, 48), (450, 48), (455, 48)];
pub const COLLECT_BANNER_COLOR: &str = "ffffff-020202";

/// Still mounted this long after dismounting means the character is stuck
pub const DISMOUNT_TIMEOUT: Duration = Duration::from_secs(8);

/// Upper bound on detect-and-dismiss steps in the repair sequence
pub const MAX_REPAIR_STEPS: usize = 5;

const MOUNT_BUTTON: (u32, u32) = (963, 646);
const BACK_BUTTON: (u32, u32) = (1240, 30);
const COLLECTABLE_CONFIRM: (u32, u32) = (774, 464);

/// Templates the maneuvers and the repair sequence look for
pub fn shared_templates() -> Vec<(&'static str, MatchParams)> {
    vec![
        (CHARACTER_BUTTON, MatchParams::template(Rect::new(961, 19, 40, 36))),
        (CHARACTER_UI, MatchParams::template(Rect::new(102, 4, 82, 48))),
        (CLOSE_BUTTON, MatchParams::template_color(Rect::new(1228, 18, 20, 19))),
    ]
}

pub fn mounted_template() -> (&'static str, MatchParams) {
    (MOUNTED, MatchParams::template(Rect::new(858, 620, 26, 31)))
}

/// Ways to get moving again after pathfinding is interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Maneuver {
    #[default]
    FlyForward,
    WalkBack,
}

impl Maneuver {
    fn other(self) -> Self {
        match self {
            Maneuver::FlyForward => Maneuver::WalkBack,
            Maneuver::WalkBack => Maneuver::FlyForward,
        }
    }
}

/// Alternates maneuvers so a failing one is not repeated back to back
#[derive(Debug, Clone, Default)]
pub struct RecoveryToggle {
    next: Maneuver,
}

impl RecoveryToggle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maneuver to use now; the following call returns the other one
    pub fn next(&mut self) -> Maneuver {
        let current = self.next;
        self.next = current.other();
        current
    }

    pub fn peek(&self) -> Maneuver {
        self.next
    }

    /// Start over from fly-forward, after progress was made
    pub fn reset(&mut self) {
        self.next = Maneuver::default();
    }
}

/// Outcome of [`repair_equipment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The repair script ran
    Repaired,
    /// A stray window was closed instead
    Dismissed,
    /// Neither the character button nor its window was visible
    NotFound,
}

/// Walk out of an open collect window, if there is one.
///
/// Returns whether the window was showing.
pub fn cancel_collect(session: &Session) -> Result<bool, ActivityError> {
    let frame = session.screenshot()?;
    if !compare_color(&frame, &COLLECT_BANNER, COLLECT_BANNER_COLOR) {
        return Ok(false);
    }
    log::debug!("Leaving the collect window");
    session.swipe(Swipe::through(&[(230, 545), (230, 370)], 1500).wait(1.0));
    session.tap(Tap::at(COLLECTABLE_CONFIRM.0, COLLECTABLE_CONFIRM.1).wait(2.0));
    Ok(true)
}

pub fn walk_back(session: &Session) {
    log::debug!("Walking back");
    session.swipe(Swipe::through(&[(230, 545), (230, 640)], 4000).wait(1.0));
    session.tap(Tap::at(COLLECTABLE_CONFIRM.0, COLLECTABLE_CONFIRM.1).wait(0.5));
}

/// Mount if needed, jump, fly a short way forward and land
pub fn fly_forward(session: &Session, templates: &TemplateSet) -> Result<(), ActivityError> {
    log::debug!("Flying forward");
    let frame = session.screenshot()?;
    if templates.find(&frame, MOUNTED).is_none() {
        session.tap(Tap::at(MOUNT_BUTTON.0, MOUNT_BUTTON.1).wait(3.5));
    }
    session.tap(Tap::at(1200, 510).hold(1200).wait(0.3));
    session.swipe(Swipe::through(&[(230, 545), (230, 430)], 800).wait(0.3));
    session.tap(Tap::at(MOUNT_BUTTON.0, MOUNT_BUTTON.1).wait(1.2));
    Ok(())
}

pub fn perform(
    maneuver: Maneuver,
    session: &Session,
    templates: &TemplateSet,
) -> Result<(), ActivityError> {
    match maneuver {
        Maneuver::FlyForward => fly_forward(session, templates),
        Maneuver::WalkBack => {
            walk_back(session);
            Ok(())
        }
    }
}

/// Get off the mount.
///
/// Returns `false` when the mount icon is still showing after
/// [`DISMOUNT_TIMEOUT`].
pub fn dismount(session: &Session, templates: &TemplateSet) -> Result<bool, ActivityError> {
    let start = session.now();
    session.tap(Tap::at(MOUNT_BUTTON.0, MOUNT_BUTTON.1).wait(1.0));
    while session.is_running() {
        let frame = session.screenshot()?;
        if templates.find(&frame, MOUNTED).is_none() {
            return Ok(true);
        }
        if session.now().duration_since(start) >= DISMOUNT_TIMEOUT {
            log::warn!("Still mounted after {:?}", DISMOUNT_TIMEOUT);
            return Ok(false);
        }
        session.wait(Duration::from_millis(100));
    }
    Ok(true)
}

/// Teleport to the aetheryte of a fixed safe area
pub fn teleport(session: &Session) -> Result<(), ActivityError> {
    log::info!("Teleporting to a safe point");
    cancel_collect(session)?;
    session.tap(Tap::at(1165, 72).wait(2.5)); // map
    session.tap(Tap::at(450, 30).wait(1.0)); // region list
    session.tap(Tap::at(340, 110).wait(2.5)); // area
    session.tap(Tap::at(547, 353).wait(1.0)); // aetheryte
    session.tap(Tap::at(665, 295).wait(1.0)); // teleport
    session.wait(Duration::from_secs(5));
    Ok(())
}

/// Open the character window and repair all gear.
///
/// With `nudge` the character takes a step first, which ends fishing.
pub fn repair_equipment(
    session: &Session,
    templates: &TemplateSet,
    nudge: bool,
) -> Result<RepairOutcome, ActivityError> {
    for _ in 0..MAX_REPAIR_STEPS {
        if !session.is_running() {
            break;
        }
        let frame = session.screenshot()?;
        let found = templates.find_all(&frame, &[CHARACTER_BUTTON, CHARACTER_UI, CLOSE_BUTTON]);

        if let Some(button) = found.get(CHARACTER_BUTTON) {
            if nudge {
                session.swipe(Swipe::through(&[(230, 545), (300, 545)], 1000).wait(3.0));
            }
            session.tap(Tap::at(button.rect.x, button.rect.y).wait(1.5));
        } else if found.found(CHARACTER_UI) {
            log::debug!("Repairing gear");
            for (x, y) in [(143, 177), (1110, 130), (400, 660), (480, 600)] {
                session.tap(Tap::at(x, y).wait(1.0));
            }
            session.tap(Tap::at(640, 600).wait(2.0)); // repair all
            session.tap(Tap::at(1183, 85).wait(1.0));
            session.tap(Tap::at(BACK_BUTTON.0, BACK_BUTTON.1).wait(1.0));
            session.tap(Tap::at(BACK_BUTTON.0, BACK_BUTTON.1).wait(1.0));
            log::info!("Gear repaired");
            return Ok(RepairOutcome::Repaired);
        } else if let Some(close) = found.get(CLOSE_BUTTON) {
            session.tap(Tap::at(close.rect.x, close.rect.y).wait(1.0));
            return Ok(RepairOutcome::Dismissed);
        } else {
            return Ok(RepairOutcome::NotFound);
        }
    }
    log::warn!("Character window never opened");
    Ok(RepairOutcome::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::testing::{self, Rig};
    use image::Rgba;

    fn specs() -> Vec<(&'static str, MatchParams)> {
        let mut specs = shared_templates();
        specs.push(mounted_template());
        specs
    }

    fn templates() -> TemplateSet {
        TemplateSet::load(&testing::library(&specs()), &specs())
    }

    #[test]
    fn test_toggle_alternates() {
        let mut toggle = RecoveryToggle::new();
        assert_eq!(toggle.next(), Maneuver::FlyForward);
        assert_eq!(toggle.next(), Maneuver::WalkBack);
        assert_eq!(toggle.next(), Maneuver::FlyForward);
        toggle.reset();
        assert_eq!(toggle.peek(), Maneuver::FlyForward);
        assert_eq!(toggle.next(), Maneuver::FlyForward);
    }

    #[test]
    fn test_cancel_collect_needs_banner() {
        let rig = Rig::new();
        rig.capture.show(testing::blank());
        assert!(!cancel_collect(&rig.session()).unwrap());
        assert!(rig.input.commands().is_empty());

        let mut frame = testing::blank();
        for (x, y) in COLLECT_BANNER {
            frame.put_pixel(x as u32, y as u32, Rgba([255, 254, 255, 255]));
        }
        rig.capture.show(frame);
        assert!(cancel_collect(&rig.session()).unwrap());
        assert_eq!(rig.input.swipes()[0].points, vec![(230, 545), (230, 370)]);
        assert_eq!(rig.input.taps(), vec![COLLECTABLE_CONFIRM]);
    }

    #[test]
    fn test_repair_opens_character_window() {
        let rig = Rig::new();
        let specs = specs();
        rig.capture.push(testing::screen(&specs, &[CHARACTER_BUTTON]));
        rig.capture.push(testing::screen(&specs, &[CHARACTER_UI]));

        let outcome = repair_equipment(&rig.session(), &templates(), true).unwrap();
        assert_eq!(outcome, RepairOutcome::Repaired);

        let taps = rig.input.taps();
        assert_eq!(taps[0], (963, 21));
        assert_eq!(taps.len(), 9);
        assert_eq!(taps[5], (640, 600));
        assert_eq!(rig.input.swipes().len(), 1);
    }

    #[test]
    fn test_repair_dismisses_or_gives_up() {
        let rig = Rig::new();
        let specs = specs();
        rig.capture.show(testing::screen(&specs, &[CLOSE_BUTTON]));
        let outcome = repair_equipment(&rig.session(), &templates(), false).unwrap();
        assert_eq!(outcome, RepairOutcome::Dismissed);
        assert_eq!(rig.input.taps(), vec![(1230, 20)]);

        rig.input.clear();
        rig.capture.show(testing::blank());
        let outcome = repair_equipment(&rig.session(), &templates(), false).unwrap();
        assert_eq!(outcome, RepairOutcome::NotFound);
        assert!(rig.input.commands().is_empty());
    }

    #[test]
    fn test_repair_step_limit() {
        let rig = Rig::new();
        rig.capture.show(testing::screen(&specs(), &[CHARACTER_BUTTON]));
        let outcome = repair_equipment(&rig.session(), &templates(), false).unwrap();
        assert_eq!(outcome, RepairOutcome::NotFound);
        assert_eq!(rig.input.taps().len(), MAX_REPAIR_STEPS);
    }

    #[test]
    fn test_dismount_timeout() {
        let rig = Rig::new();
        rig.capture.show(testing::screen(&specs(), &[MOUNTED]));
        assert!(!dismount(&rig.session(), &templates()).unwrap());
        assert!(rig.clock.elapsed() >= DISMOUNT_TIMEOUT);

        rig.capture.show(testing::blank());
        assert!(dismount(&rig.session(), &templates()).unwrap());
    }

    #[test]
    fn test_fly_forward_mounts_first() {
        let rig = Rig::new();
        rig.capture.show(testing::blank());
        perform(Maneuver::FlyForward, &rig.session(), &templates()).unwrap();
        assert_eq!(
            rig.input.holds(),
            vec![
                (MOUNT_BUTTON, 100),
                ((1200, 510), 1200),
                (MOUNT_BUTTON, 100)
            ]
        );

        rig.input.clear();
        rig.capture.show(testing::screen(&specs(), &[MOUNTED]));
        perform(Maneuver::FlyForward, &rig.session(), &templates()).unwrap();
        assert_eq!(rig.input.taps(), vec![(1200, 510), MOUNT_BUTTON]);
    }

    #[test]
    fn test_teleport_waits_after_script() {
        let rig = Rig::new();
        rig.capture.show(testing::blank());
        teleport(&rig.session()).unwrap();
        assert_eq!(rig.input.taps().len(), 5);
        assert!(rig.clock.elapsed() >= Duration::from_secs(13));
    }
}
