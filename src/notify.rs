//! User-visible notifications.
//!
//! Pipelines report failures through a [`Notifier`] instead of printing, so
//! the CLI can render them and tests can assert on them.

use std::sync::Mutex;

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

/// One notification: a short title and a longer description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            title: title.into(),
            description: description.into(),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notice: Notice);
}

/// Prints notices to stderr with color.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let title = match notice.level {
            Level::Info => notice.title.cyan().bold(),
            Level::Success => notice.title.green().bold(),
            Level::Error => notice.title.red().bold(),
        };
        eprintln!("{title}: {}", notice.description);
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == Level::Error)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_keeps_order() {
        let rec = RecordingNotifier::new();
        rec.notify(Notice::info("a", "1"));
        rec.notify(Notice::error("b", "2"));
        assert_eq!(rec.notices().len(), 2);
        assert_eq!(rec.errors(), vec![Notice::error("b", "2")]);
    }
}
