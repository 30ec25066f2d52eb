//! autoff - screen-driven activity automation for an emulated MMORPG
//!
//! The crate is split into a perception engine and the controllers built on
//! it:
//!
//! - [`vision`] finds reference images and pixel colours in captured frames
//!   (template correlation, keypoint matching, colour and HSV probes).
//! - [`activity`] drives the gathering, fishing and Gold Saucer routines,
//!   each on its own cancellable worker thread.
//!
//! The emulator itself is reached only through traits ([`vision::Capture`],
//! [`android::Actuation`], [`vision::TextRecognition`],
//! [`notify::Notifier`]), so the controllers run unchanged against scripted
//! fakes in tests.
//!
//! ## Logging
//!
//! Everything logs through the `log` facade. The library never installs a
//! logger; the `autoff` binary uses `env_logger`.

pub mod activity;
pub mod android;
pub mod config;
pub mod game;
pub mod notify;
pub mod vision;

pub use activity::{Context, Fish, Gather, GoldSaucer, Worker};
pub use config::Settings;
pub use vision::{Frame, MatchResult, Rect};
