//! Replaces the in-page document with the watched file's content.
//!
//! The transactional path dispatches a single full-document replacement
//! through the editor's own update primitive, keeping the host application's
//! internal bookkeeping (undo history, incremental highlighting) consistent.
//! When no editor state could be located, the fallback mutates the
//! content-editable node directly and fires a synthetic input event: best
//! effort, reported as a degraded outcome.

use std::time::Duration;

use serde_json::Value;

use crate::locate::{self, EditorHandle};
use crate::page::Page;

/// How long to wait for the content-editable node before giving up.
pub const CONTENT_EDITABLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after injection before evaluation, so the host's asynchronous
/// parse/highlight work can settle.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Content applied through the editor's own dispatch.
    Transactional,
    /// Content applied by raw DOM mutation plus a synthetic input event.
    /// The host's internal state may not fully reflect the change.
    DomFallback,
    /// Content could not be applied at all this cycle.
    Failed(String),
}

impl InjectionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, InjectionOutcome::Failed(_))
    }
}

impl std::fmt::Display for InjectionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectionOutcome::Transactional => write!(f, "transactional"),
            InjectionOutcome::DomFallback => write!(f, "dom-fallback"),
            InjectionOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Applies `content` as the page's full document.
///
/// Never panics and never returns an error type: every failure mode folds
/// into an [`InjectionOutcome`] the sync loop can log and move past.
pub fn inject<P: Page>(
    page: &P,
    handle: Option<&EditorHandle>,
    content: &str,
) -> InjectionOutcome {
    // Both paths need the editor to be mounted and editable first.
    if let Err(err) = page.wait_for_selector(locate::CONTENT_SELECTOR, CONTENT_EDITABLE_TIMEOUT) {
        return InjectionOutcome::Failed(format!("content-editable region never appeared: {err}"));
    }

    let content_arg = [Value::String(content.to_owned())];

    if let Some(handle) = handle {
        match page.call_function(TRANSACTIONAL_FN, &content_arg) {
            Ok(value) if parse_ok(&value) => {
                log::trace!(
                    "dispatched {} chars through handle from {}",
                    content.len(),
                    handle.strategy.name()
                );
                return InjectionOutcome::Transactional;
            }
            Ok(_) => {
                log::warn!("transactional dispatch rejected the update, falling back to DOM mutation");
            }
            Err(err) => {
                log::warn!("transactional dispatch failed ({err}), falling back to DOM mutation");
            }
        }
    }

    match page.call_function(DOM_FALLBACK_FN, &content_arg) {
        Ok(value) if parse_ok(&value) => InjectionOutcome::DomFallback,
        Ok(_) => {
            InjectionOutcome::Failed("content-editable node vanished during DOM fallback".to_owned())
        }
        Err(err) => InjectionOutcome::Failed(format!("DOM fallback failed: {err}")),
    }
}

fn parse_ok(value: &Value) -> bool {
    value
        .get("ok")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Single atomic replacement of the entire document range through the
/// editor's dispatch, using the reference stashed by discovery.
pub(crate) const TRANSACTIONAL_FN: &str = r#"(text) => {
  const view = window.__tetherEditorView;
  if (!(view && view.state && view.state.doc && typeof view.dispatch === 'function')) {
    return { ok: false };
  }
  view.dispatch({ changes: { from: 0, to: view.state.doc.length, insert: text } });
  return { ok: true };
}"#;

/// Degraded path: overwrite the content-editable node and fire a synthetic
/// input event so the host's own input listeners can pick up the change.
pub(crate) const DOM_FALLBACK_FN: &str = r#"(text) => {
  const node = document.querySelector('.cm-content');
  if (!node) return { ok: false };
  node.focus();
  node.textContent = text;
  node.dispatchEvent(new InputEvent('input', {
    bubbles: true,
    inputType: 'insertReplacementText',
    data: text,
  }));
  return { ok: true };
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::Strategy;
    use crate::page::fake::{Behavior, FakePage};

    fn handle() -> EditorHandle {
        EditorHandle {
            strategy: Strategy::AttachedProperty,
            doc_length: 1,
        }
    }

    #[test]
    fn valid_handle_uses_the_transactional_path() {
        let page = FakePage::with_behavior(Behavior::healthy());

        let outcome = inject(&page, Some(&handle()), "note(\"c3\")");
        assert_eq!(outcome, InjectionOutcome::Transactional);

        let log = page.log.lock().unwrap();
        assert_eq!(log.dispatched, vec!["note(\"c3\")".to_owned()]);
        assert!(log.dom_injected.is_empty(), "degraded path must not run");
    }

    #[test]
    fn missing_handle_degrades_to_dom_fallback() {
        let page = FakePage::with_behavior(Behavior {
            content_editable: true,
            ..Behavior::default()
        });

        let outcome = inject(&page, None, "b");
        assert_eq!(outcome, InjectionOutcome::DomFallback);

        let log = page.log.lock().unwrap();
        assert!(log.dispatched.is_empty());
        assert_eq!(log.dom_injected, vec!["b".to_owned()]);
    }

    #[test]
    fn rejected_dispatch_falls_back_instead_of_failing() {
        let page = FakePage::with_behavior(Behavior {
            dispatch_ok: false,
            content_editable: true,
            ..Behavior::default()
        });

        let outcome = inject(&page, Some(&handle()), "b");
        assert_eq!(outcome, InjectionOutcome::DomFallback);
    }

    #[test]
    fn missing_content_editable_fails_without_panicking() {
        let page = FakePage::with_behavior(Behavior::default());

        let outcome = inject(&page, None, "b");
        assert!(outcome.is_failed());

        let log = page.log.lock().unwrap();
        assert_eq!(log.waits, vec![locate::CONTENT_SELECTOR.to_owned()]);
        assert!(log.dom_injected.is_empty());
    }
}
