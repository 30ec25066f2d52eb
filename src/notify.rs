//! User notifications
//!
//! Controllers report noteworthy events (work list finished, wrong job,
//! missing gear) as toasts. The host decides how to show them.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToastLevel::Info => "info",
            ToastLevel::Success => "success",
            ToastLevel::Warning => "warning",
            ToastLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Toast sink
pub trait Notifier: Send + Sync {
    fn toast(&self, level: ToastLevel, message: &str);
}

/// Writes toasts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn toast(&self, level: ToastLevel, message: &str) {
        match level {
            ToastLevel::Info | ToastLevel::Success => log::info!("[{}] {}", level, message),
            ToastLevel::Warning => log::warn!("{}", message),
            ToastLevel::Error => log::error!("{}", message),
        }
    }
}

/// Keeps every toast for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<(ToastLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<(ToastLevel, String)> {
        self.toasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn toast(&self, level: ToastLevel, message: &str) {
        self.toasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}
