// Progress tracking for long-running operations, read by the progress feed

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressDetail {
    pub enable: bool,
    pub value: f64,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: Mutex<HashMap<String, ProgressDetail>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ProgressDetail>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, key: &str) {
        self.entries().insert(
            key.to_string(),
            ProgressDetail {
                enable: true,
                value: 0.0,
                text: String::new(),
            },
        );
    }

    /// Update the value (clamped to 0..=100) and text of an active entry
    pub fn update(&self, key: &str, value: f64, text: impl Into<String>) {
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_default();
        entry.enable = true;
        entry.value = value.clamp(0.0, 100.0);
        entry.text = text.into();
    }

    pub fn end(&self, key: &str) {
        if let Some(entry) = self.entries().get_mut(key) {
            entry.enable = false;
            entry.value = 100.0;
        }
    }

    /// Current progress; unknown keys report a disabled, empty entry
    pub fn get(&self, key: &str) -> ProgressDetail {
        self.entries().get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let tracker = ProgressTracker::new();
        tracker.start("transfer");
        assert!(tracker.get("transfer").enable);

        tracker.update("transfer", 140.0, "almost");
        let detail = tracker.get("transfer");
        assert_eq!(detail.value, 100.0);
        assert_eq!(detail.text, "almost");

        tracker.end("transfer");
        assert!(!tracker.get("transfer").enable);
    }

    #[test]
    fn test_unknown_key_is_disabled() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.get("missing"), ProgressDetail::default());
    }
}
