//! Clipboard synchronisation with echo suppression.
//!
//! Both peers run one [`ClipboardSync`]: remote text is written to
//! the OS clipboard *after* being remembered as the echo token, and
//! the local watcher drops any observation equal to that token.
//! Without the token every sync would bounce between the peers
//! forever.
//!
//! The watcher is a capability object: without a sink installed,
//! observations are discarded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EngineError;

/// Watcher poll cadence.
pub const CLIPBOARD_POLL: Duration = Duration::from_millis(500);

type Sink = Box<dyn Fn(String) + Send + Sync>;

// ── ClipboardBackend ─────────────────────────────────────────────

/// Minimal OS clipboard surface, swappable for tests.
pub trait ClipboardBackend: Send {
    /// Current clipboard text, `None` when empty or non-text.
    fn get_text(&mut self) -> Option<String>;

    /// Replace the clipboard contents.
    fn set_text(&mut self, text: &str) -> Result<(), EngineError>;
}

/// `arboard`-backed system clipboard.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, EngineError> {
        let inner = arboard::Clipboard::new()
            .map_err(|e| EngineError::Other(format!("clipboard unavailable: {e}")))?;
        Ok(Self { inner })
    }
}

impl ClipboardBackend for SystemClipboard {
    fn get_text(&mut self) -> Option<String> {
        self.inner.get_text().ok()
    }

    fn set_text(&mut self, text: &str) -> Result<(), EngineError> {
        self.inner
            .set_text(text.to_owned())
            .map_err(|e| EngineError::Other(format!("clipboard write failed: {e}")))
    }
}

/// Backend for environments without a clipboard (headless hosts).
/// Reads nothing, swallows writes.
pub struct NullClipboard;

impl ClipboardBackend for NullClipboard {
    fn get_text(&mut self) -> Option<String> {
        None
    }

    fn set_text(&mut self, _text: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

// ── ClipboardSync ────────────────────────────────────────────────

/// Shared clipboard state for one peer.
pub struct ClipboardSync {
    backend: Mutex<Box<dyn ClipboardBackend>>,
    /// The last text written by the network; the watcher suppresses it.
    last_text: Mutex<Option<String>>,
    sink: Mutex<Option<Sink>>,
}

impl ClipboardSync {
    pub fn new(backend: Box<dyn ClipboardBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend: Mutex::new(backend),
            last_text: Mutex::new(None),
            sink: Mutex::new(None),
        })
    }

    /// Install the emission sink (a data-channel handle, usually).
    pub fn set_sink(&self, sink: impl Fn(String) + Send + Sync + 'static) {
        *lock(&self.sink) = Some(Box::new(sink));
    }

    /// Text arrived from the peer: remember it first, then write the
    /// OS clipboard, so the watcher cannot bounce it back.
    pub fn apply_remote(&self, text: &str) -> Result<(), EngineError> {
        *lock(&self.last_text) = Some(text.to_owned());
        lock(&self.backend).set_text(text)
    }

    /// One watcher poll. `last_seen` is the watcher's own change
    /// detector, distinct from the echo token.
    pub fn poll_once(&self, last_seen: &mut Option<String>) {
        let current = match lock(&self.backend).get_text() {
            Some(text) => text,
            None => return,
        };

        if last_seen.as_deref() == Some(current.as_str()) {
            return; // unchanged since last poll
        }
        *last_seen = Some(current.clone());

        {
            let mut last_text = lock(&self.last_text);
            if last_text.as_deref() == Some(current.as_str()) {
                return; // our own network write echoing back
            }
            *last_text = Some(current.clone());
        }

        match lock(&self.sink).as_ref() {
            Some(sink) => {
                debug!(len = current.len(), "clipboard changed, emitting");
                sink(current);
            }
            None => {} // no sink installed: observation discarded
        }
    }

    /// Poll the clipboard until the stop token fires. The contents at
    /// startup are primed, not emitted.
    pub async fn watch(self: Arc<Self>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(CLIPBOARD_POLL);
        let mut last_seen = lock(&self.backend).get_text();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once(&mut last_seen);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
