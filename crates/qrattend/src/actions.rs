//! Side effects of an accepted detection: bell, clipboard, browser.

use std::io::Write;
use std::sync::LazyLock;

use clipboard_rs::{Clipboard, ClipboardContext};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("Invalid regex pattern"));

/// Whether `text` looks like an `http` or `https` URL.
#[must_use]
pub fn is_url(text: &str) -> bool {
    URL_PATTERN.is_match(text)
}

/// Errors raised by side effects. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The clipboard could not be opened or written.
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    /// The browser could not be launched.
    #[error("failed to open browser: {0}")]
    Browser(#[source] std::io::Error),

    /// The terminal bell could not be written.
    #[error("failed to ring bell: {0}")]
    Bell(#[source] std::io::Error),
}

/// Side effects the engine triggers after a detection is logged.
pub trait Actions {
    /// Audible alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert cannot be played.
    fn alert(&mut self) -> Result<(), ActionError>;

    /// Copy the payload to the clipboard.
    ///
    /// # Errors
    ///
    /// Returns an error if the clipboard is unavailable.
    fn copy_text(&mut self, text: &str) -> Result<(), ActionError>;

    /// Open a URL payload.
    ///
    /// # Errors
    ///
    /// Returns an error if no browser could be launched.
    fn open_url(&mut self, url: &str) -> Result<(), ActionError>;
}

/// Actions backed by the terminal, the system clipboard and the default browser.
#[derive(Default)]
pub struct SystemActions {
    clipboard: Option<ClipboardContext>,
}

impl std::fmt::Debug for SystemActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemActions")
            .field("clipboard_ready", &self.clipboard.is_some())
            .finish()
    }
}

impl SystemActions {
    /// Create the actions; the clipboard is opened on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clipboard(&mut self) -> Result<&ClipboardContext, ActionError> {
        if self.clipboard.is_none() {
            let ctx = ClipboardContext::new().map_err(|e| {
                error!(error = %e, "failed to initialize clipboard");
                ActionError::Clipboard(e.to_string())
            })?;
            self.clipboard = Some(ctx);
        }
        self.clipboard
            .as_ref()
            .ok_or_else(|| ActionError::Clipboard("clipboard not initialized".to_string()))
    }
}

impl Actions for SystemActions {
    fn alert(&mut self) -> Result<(), ActionError> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07").map_err(ActionError::Bell)?;
        stderr.flush().map_err(ActionError::Bell)
    }

    fn copy_text(&mut self, text: &str) -> Result<(), ActionError> {
        self.clipboard()?
            .set_text(text.to_string())
            .map_err(|e| ActionError::Clipboard(e.to_string()))?;
        debug!(len = text.len(), "Copied payload to clipboard");
        Ok(())
    }

    fn open_url(&mut self, url: &str) -> Result<(), ActionError> {
        webbrowser::open(url).map_err(ActionError::Browser)?;
        debug!(%url, "Opened payload in browser");
        Ok(())
    }
}
