//! Operator-edited text fields shared between the front end and the engine.
//!
//! The engine re-reads these on demand (run time on profile restart, target
//! power every manual tick), so edits made mid-run take effect.

use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct TextEntry(Arc<RwLock<String>>);

impl TextEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(text.into())))
    }

    pub fn get(&self) -> String {
        self.0.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set(&self, text: impl Into<String>) {
        if let Ok(mut s) = self.0.write() {
            *s = text.into();
        }
    }

    /// Trimmed text parsed as a finite `f64`.
    pub fn parse_f64(&self) -> Option<f64> {
        self.get()
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

impl From<&str> for TextEntry {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TextEntry {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<f64> for TextEntry {
    fn from(v: f64) -> Self {
        Self::new(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_edits() {
        let a = TextEntry::new("10");
        let b = a.clone();
        a.set(" 2.5 ");
        assert_eq!(b.parse_f64(), Some(2.5));
    }

    #[test]
    fn rejects_garbage_and_non_finite() {
        assert_eq!(TextEntry::new("ten").parse_f64(), None);
        assert_eq!(TextEntry::new("").parse_f64(), None);
        assert_eq!(TextEntry::new("NaN").parse_f64(), None);
        assert_eq!(TextEntry::new("inf").parse_f64(), None);
    }
}
