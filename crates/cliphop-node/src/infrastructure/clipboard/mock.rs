//! In-memory clipboard.
//!
//! Used by unit and integration tests, and by the binary as a fallback when
//! no desktop session is available (received text then only lands in
//! history and the log).

use std::sync::Mutex;

use crate::application::sync_controller::{Clipboard, ClipboardError};

#[derive(Default)]
struct Inner {
    text: String,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

/// A [`Clipboard`] that stores text in memory.
#[derive(Default)]
pub struct MemoryClipboard {
    inner: Mutex<Inner>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let clipboard = Self::new();
        if let Ok(mut inner) = clipboard.inner.lock() {
            inner.text = text.to_owned();
        }
        clipboard
    }

    /// Simulates the user copying `text`, without counting it as a write.
    pub fn user_copy(&self, text: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.text = text.to_owned();
        }
    }

    /// Makes every subsequent [`Clipboard::get`] fail.
    pub fn fail_reads(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_reads = fail;
        }
    }

    /// Makes every subsequent [`Clipboard::set`] fail.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    /// Number of successful [`Clipboard::set`] calls.
    pub fn write_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ClipboardError> {
        self.inner
            .lock()
            .map_err(|_| ClipboardError::Access("lock poisoned".to_string()))
    }
}

impl Clipboard for MemoryClipboard {
    fn get(&self) -> Result<String, ClipboardError> {
        let inner = self.lock()?;
        if inner.fail_reads {
            return Err(ClipboardError::Access("simulated read failure".to_string()));
        }
        Ok(inner.text.clone())
    }

    fn set(&self, text: &str) -> Result<(), ClipboardError> {
        let mut inner = self.lock()?;
        if inner.fail_writes {
            return Err(ClipboardError::Access("simulated write failure".to_string()));
        }
        inner.text = text.to_owned();
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clipboard_reads_empty() {
        assert_eq!(MemoryClipboard::new().get().unwrap(), "");
    }

    #[test]
    fn test_set_then_get_returns_text_and_counts_write() {
        // Arrange
        let clipboard = MemoryClipboard::new();

        // Act
        clipboard.set("hello").unwrap();

        // Assert
        assert_eq!(clipboard.get().unwrap(), "hello");
        assert_eq!(clipboard.write_count(), 1);
    }

    #[test]
    fn test_user_copy_is_not_a_write() {
        let clipboard = MemoryClipboard::with_text("a");
        clipboard.user_copy("b");
        assert_eq!(clipboard.get().unwrap(), "b");
        assert_eq!(clipboard.write_count(), 0);
    }

    #[test]
    fn test_simulated_failures() {
        let clipboard = MemoryClipboard::new();
        clipboard.fail_reads(true);
        clipboard.fail_writes(true);

        assert!(clipboard.get().is_err());
        assert!(clipboard.set("x").is_err());
        assert_eq!(clipboard.write_count(), 0);
    }
}
