//! Boundary to the browser page.
//!
//! Everything the bridge needs from the browser session is expressed through
//! the [`Page`] trait so the locator, injector, trigger, and sync loop can be
//! exercised against a scripted fake. The real implementation lives in
//! `chrome` and drives a CDP session.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("timed out waiting for selector `{0}`")]
    SelectorTimeout(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("page interaction failed: {0}")]
    Interaction(String),
}

/// Keyboard modifiers for simulated shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Control,
    Alt,
    Shift,
    Meta,
}

/// A ready, navigated browser page.
///
/// The bridge does not manage browser lifecycle or navigation; it only
/// queries and mutates an existing page through these operations.
pub trait Page {
    /// Calls a JavaScript function in the page with JSON-serializable
    /// arguments and returns its (JSON-serializable) result.
    fn call_function(&self, function: &str, args: &[Value]) -> Result<Value, PageError>;

    /// Blocks until `selector` matches an element, up to `timeout`.
    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    /// Clicks the first element matching `selector`.
    fn click(&self, selector: &str) -> Result<(), PageError>;

    /// Sends a key chord (for example Ctrl+Enter) to the focused element.
    fn press_chord(&self, modifiers: &[Modifier], key: &str) -> Result<(), PageError>;
}
