//! Copy-to-clipboard with automatic clearing
//!
//! The OS clipboard lives behind [`ClipboardSink`]; the embedding UI supplies
//! the real implementation. [`SecureClipboard`] writes a secret to the sink
//! and clears it again after a fixed delay, unless a newer copy has replaced
//! it in the meantime.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::crypto::SecretString;
use crate::error::Result;

/// Default delay before a copied secret is cleared
pub const DEFAULT_CLEAR_AFTER: Duration = Duration::from_secs(10);

/// Destination for copied secrets
pub trait ClipboardSink: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Clipboard that forgets what it was given after `clear_after`
pub struct SecureClipboard {
    sink: Arc<dyn ClipboardSink>,
    clear_after: Duration,
    generation: Arc<AtomicU64>,
}

impl SecureClipboard {
    pub fn new(sink: Arc<dyn ClipboardSink>, clear_after: Duration) -> Self {
        Self {
            sink,
            clear_after,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn clear_after(&self) -> Duration {
        self.clear_after
    }

    /// Put the secret on the clipboard and schedule the clear.
    /// Must be called within a Tokio runtime.
    pub fn copy(&self, secret: &SecretString) -> Result<JoinHandle<()>> {
        self.sink.set_text(secret.expose())?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let sink = Arc::clone(&self.sink);
        let delay = self.clear_after;
        debug!(clear_after_secs = delay.as_secs(), "Secret copied to clipboard");

        Ok(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // A later copy owns the clipboard now and schedules its own clear
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            match sink.clear() {
                Ok(()) => debug!("Clipboard cleared"),
                Err(e) => warn!("Failed to clear clipboard: {}", e),
            }
        }))
    }
}

/// In-process clipboard for tests and headless use
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl ClipboardSink for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.contents.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;

    struct BrokenClipboard;

    impl ClipboardSink for BrokenClipboard {
        fn set_text(&self, _text: &str) -> Result<()> {
            Err(VaultError::Clipboard("no display".to_string()))
        }

        fn clear(&self) -> Result<()> {
            Err(VaultError::Clipboard("no display".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_clears_after_delay() {
        let sink = Arc::new(MemoryClipboard::new());
        let clipboard = SecureClipboard::new(sink.clone(), DEFAULT_CLEAR_AFTER);

        let clear = clipboard.copy(&SecretString::from("s3cret!")).unwrap();
        assert_eq!(sink.contents().as_deref(), Some("s3cret!"));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(sink.contents().as_deref(), Some("s3cret!"));

        clear.await.unwrap();
        assert_eq!(sink.contents(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_copy_is_not_cleared_early() {
        let sink = Arc::new(MemoryClipboard::new());
        let clipboard = SecureClipboard::new(sink.clone(), DEFAULT_CLEAR_AFTER);

        let first = clipboard.copy(&SecretString::from("first")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = clipboard.copy(&SecretString::from("second")).unwrap();

        first.await.unwrap();
        assert_eq!(sink.contents().as_deref(), Some("second"));

        second.await.unwrap();
        assert_eq!(sink.contents(), None);
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let clipboard = SecureClipboard::new(Arc::new(BrokenClipboard), DEFAULT_CLEAR_AFTER);

        let result = clipboard.copy(&SecretString::from("x"));
        assert!(matches!(result, Err(VaultError::Clipboard(_))));
    }
}
