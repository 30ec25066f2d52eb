//! Configuration module
//!
//! Handles user settings and the shared fishing options.

pub mod settings;

pub use settings::{CaptureSettings, ConfigError, FishSettings, Settings, TimingSettings};
