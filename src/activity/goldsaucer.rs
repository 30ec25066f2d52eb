//! Gold Saucer ball-catching minigame
//!
//! Reacts to whichever prompt is showing. The two grab buttons are held for a
//! time proportional to how far the target ball sits from the claw's start;
//! the claw swings faster once the stakes have been doubled, so the scale
//! factor changes with the number of rounds.

use std::time::Duration;

use super::{Activity, ActivityError, Session};
use crate::android::Tap;
use crate::vision::{ImageLibrary, MatchParams, MatchResult, Rect, TemplateSet};

pub const START: &str = "start";
pub const CONFIRM: &str = "confirm";
pub const DOUBLE: &str = "double";
pub const RETRY: &str = "retry";
pub const GRAB_LEFT: &str = "grab_left";
pub const GRAB_RIGHT: &str = "grab_right";
pub const RED_BALL: &str = "red_ball";
pub const PURPLE_BALL: &str = "purple_ball";
pub const BLUE_BALL: &str = "blue_ball";

/// Ball templates in the order they are tried
pub const BALLS: [&str; 3] = [RED_BALL, PURPLE_BALL, BLUE_BALL];

const PROMPTS: [&str; 6] = [START, CONFIRM, DOUBLE, RETRY, GRAB_LEFT, GRAB_RIGHT];

const LEFT_BUTTON: (u32, u32) = (920, 568);
const RIGHT_BUTTON: (u32, u32) = (1063, 577);

pub fn template_specs() -> Vec<(&'static str, MatchParams)> {
    let field = Rect::new(828, 250, 334, 292);
    vec![
        (START, MatchParams::template(Rect::new(711, 323, 72, 53))),
        (CONFIRM, MatchParams::template(Rect::new(734, 434, 84, 44))),
        (DOUBLE, MatchParams::template(Rect::new(770, 525, 107, 41))),
        (RETRY, MatchParams::template(Rect::new(1090, 639, 90, 48))),
        (GRAB_LEFT, MatchParams::template_color(Rect::new(876, 554, 85, 36))),
        (GRAB_RIGHT, MatchParams::template_color(Rect::new(1030, 553, 71, 39))),
        (RED_BALL, MatchParams::template_color(field)),
        (PURPLE_BALL, MatchParams::template_color(field)),
        (BLUE_BALL, MatchParams::template_color(field)),
    ]
}

/// Hold time of the left grab for a ball centred at `center_x`.
///
/// Holds under 400ms come out as a short 50ms tap.
pub fn left_hold_ms(center_x: f32, balls: u32) -> u64 {
    let ms = if balls <= 2 {
        (center_x - 853.0) * 14.71
    } else {
        (center_x - 846.0) * 10.07
    } as i64;
    if ms < 400 {
        50
    } else {
        ms as u64
    }
}

/// Hold time of the right grab for a ball centred at `center_y`
pub fn right_hold_ms(center_y: f32, balls: u32) -> u64 {
    let ms = if balls <= 2 {
        (center_y - 290.0) * 16.67
    } else {
        (center_y - 290.0) * 10.99
    } as i64;
    ms.max(0) as u64
}

/// Ball game controller
pub struct GoldSaucer {
    templates: TemplateSet,
    /// Rounds played this game, counting doubles
    balls: u32,
    /// Ball chosen by the left grab, reused by the right grab
    target: Option<MatchResult>,
}

impl GoldSaucer {
    pub fn new(library: &dyn ImageLibrary) -> Self {
        Self {
            templates: TemplateSet::load(library, &template_specs()),
            balls: 1,
            target: None,
        }
    }

    pub fn balls(&self) -> u32 {
        self.balls
    }

    fn grab_left(&mut self, session: &Session) -> Result<(), ActivityError> {
        let settle = if self.balls == 1 { 1000 } else { 300 };
        session.wait(Duration::from_millis(settle));

        let frame = session.screenshot()?;
        self.target = self.templates.find_first(&frame, &BALLS);
        if let Some(ball) = &self.target {
            let center_x = ball.rect.x as f32 + ball.rect.w as f32 / 2.0;
            let hold = left_hold_ms(center_x, self.balls);
            log::debug!("{} at x={}, holding left {}ms", ball.name, center_x, hold);
            session.tap(Tap::at(LEFT_BUTTON.0, LEFT_BUTTON.1).hold(hold).wait(0.5));
        }
        Ok(())
    }

    fn grab_right(&mut self, session: &Session) {
        if let Some(ball) = &self.target {
            let center_y = ball.rect.y as f32 + ball.rect.h as f32 / 2.0;
            let hold = right_hold_ms(center_y, self.balls);
            log::debug!("{} at y={}, holding right {}ms", ball.name, center_y, hold);
            session.tap(Tap::at(RIGHT_BUTTON.0, RIGHT_BUTTON.1).hold(hold).wait(0.5));
        }
    }
}

impl Activity for GoldSaucer {
    const NAME: &'static str = "GoldSaucer";

    fn reset(&mut self, _session: &Session) {
        self.balls = 1;
        self.target = None;
    }

    fn tick(&mut self, session: &Session) -> Result<(), ActivityError> {
        let frame = session.screenshot()?;
        let found = self.templates.find_all(&frame, &PROMPTS);
        let press = |result: &MatchResult| {
            session.tap(Tap::at(result.rect.x, result.rect.y).wait(0.5));
        };

        if let Some(start) = found.get(START) {
            press(start);
        } else if let Some(confirm) = found.get(CONFIRM) {
            press(confirm);
            self.balls = 1;
        } else if let Some(double) = found.get(DOUBLE) {
            press(double);
            self.balls += 1;
            log::debug!("Doubled, round {}", self.balls);
        } else if let Some(retry) = found.get(RETRY) {
            press(retry);
            self.balls = 1;
        } else if found.found(GRAB_LEFT) {
            self.grab_left(session)?;
        } else if found.found(GRAB_RIGHT) {
            self.grab_right(session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::testing::{self, Rig};
    use crate::vision::Frame;

    fn game(rig: &Rig) -> GoldSaucer {
        let mut game = GoldSaucer::new(&testing::library(&template_specs()));
        game.reset(&rig.session());
        game
    }

    fn screen(names: &[&str]) -> Frame {
        testing::screen(&template_specs(), names)
    }

    #[test]
    fn test_hold_scales() {
        assert_eq!(left_hold_ms(900.0, 1), 691);
        assert_eq!(left_hold_ms(900.0, 3), 543);
        assert_eq!(left_hold_ms(870.0, 2), 50);
        assert_eq!(right_hold_ms(350.0, 2), 1000);
        assert_eq!(right_hold_ms(350.0, 3), 659);
        assert_eq!(right_hold_ms(280.0, 1), 0);
    }

    #[test]
    fn test_rounds_follow_prompts() {
        let rig = Rig::new();
        let mut game = game(&rig);
        let session = rig.session();

        let rounds = [
            (START, 1),
            (DOUBLE, 2),
            (DOUBLE, 3),
            (RETRY, 1),
            (DOUBLE, 2),
            (CONFIRM, 1),
        ];
        for (prompt, balls) in rounds {
            rig.capture.show(screen(&[prompt]));
            game.tick(&session).unwrap();
            assert_eq!(game.balls(), balls, "after {}", prompt);
        }
        assert_eq!(rig.input.taps()[0], (713, 325));
    }

    #[test]
    fn test_grabs_aim_at_ball() {
        let rig = Rig::new();
        let specs = template_specs();
        let mut game = game(&rig);
        let session = rig.session();

        let mut frame = screen(&[GRAB_LEFT]);
        testing::show_at(&mut frame, &specs, RED_BALL, 900, 300);
        rig.capture.show(frame);
        game.tick(&session).unwrap();

        let mut frame = screen(&[GRAB_RIGHT]);
        testing::show_at(&mut frame, &specs, RED_BALL, 900, 300);
        rig.capture.show(frame);
        game.tick(&session).unwrap();

        assert_eq!(
            rig.input.holds(),
            vec![(LEFT_BUTTON, 779), (RIGHT_BUTTON, 266)]
        );
    }

    #[test]
    fn test_right_grab_without_ball_does_nothing() {
        let rig = Rig::new();
        let mut game = game(&rig);
        rig.capture.show(screen(&[GRAB_RIGHT]));
        game.tick(&rig.session()).unwrap();
        assert!(rig.input.commands().is_empty());
    }
}
