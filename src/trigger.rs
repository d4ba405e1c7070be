//! Triggers the host application's "evaluate" action after injection.
//!
//! Like discovery, this has no stable contract to lean on: the evaluate
//! control's markup varies between application versions. Two search passes
//! run in order (attribute/text selector patterns, then a linear scan of
//! clickable controls) and if neither matches, the documented keyboard
//! shortcut is simulated against the focused editor. The keyboard fallback
//! is always attempted when search fails; a sync never silently skips
//! evaluation.

use serde_json::json;

use crate::inject::InjectionOutcome;
use crate::locate;
use crate::page::{Modifier, Page, PageError};

/// Selector patterns likely to match an "evaluate" control, most specific
/// first. Attribute matches are case-insensitive (`i` flag).
pub const EVAL_CONTROL_SELECTORS: &[&str] = &[
    "button[title*='evaluate' i]",
    "[aria-label*='evaluate' i]",
    "button[title*='ctrl+enter' i]",
    "button[title*='ctrl + enter' i]",
    "button .fa-play",
    "button[class*='play' i]",
];

/// Keywords matched against visible text, title, and aria-label in the
/// linear scan pass.
const SCAN_KEYWORDS: &[&str] = &["play", "eval", "ctrl"];

/// The host's documented shortcut for "evaluate current buffer".
const EVAL_KEY: &str = "Enter";
const EVAL_MODIFIERS: &[Modifier] = &[Modifier::Control];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A control matched by a selector pattern was clicked.
    Control(String),
    /// A control found by the clickable-control scan was clicked in-page.
    Scan(String),
    /// The keyboard shortcut was sent to the focused editor.
    Keyboard,
    /// Every path failed; the content is applied but not evaluated.
    Failed(String),
}

impl std::fmt::Display for TriggerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerOutcome::Control(selector) => write!(f, "control `{selector}`"),
            TriggerOutcome::Scan(label) => write!(f, "scanned control \"{label}\""),
            TriggerOutcome::Keyboard => write!(f, "keyboard shortcut"),
            TriggerOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Finds and activates the evaluate action.
pub fn trigger<P: Page>(page: &P, injection: &InjectionOutcome) -> TriggerOutcome {
    match find_and_click_control(page) {
        Ok(Some(outcome)) => return outcome,
        Ok(None) => {
            log::debug!("no evaluate control matched either search pass, using keyboard shortcut");
        }
        Err(err) => {
            log::debug!("evaluate control search failed ({err}), using keyboard shortcut");
        }
    }

    keyboard_fallback(page, injection)
}

/// Both search passes. The first matching, clickable control wins; no
/// further scanning happens after a match.
fn find_and_click_control<P: Page>(page: &P) -> Result<Option<TriggerOutcome>, PageError> {
    let selectors = json!(EVAL_CONTROL_SELECTORS);
    let value = page.call_function(SELECT_FN, &[selectors])?;
    let matched = value
        .as_i64()
        .filter(|index| *index >= 0)
        .and_then(|index| EVAL_CONTROL_SELECTORS.get(index as usize));
    if let Some(selector) = matched {
        page.click(selector)?;
        return Ok(Some(TriggerOutcome::Control((*selector).to_owned())));
    }

    let keywords = json!(SCAN_KEYWORDS);
    let value = page.call_function(SCAN_FN, &[keywords])?;
    if let Some(label) = value.as_str() {
        return Ok(Some(TriggerOutcome::Scan(label.to_owned())));
    }

    Ok(None)
}

fn keyboard_fallback<P: Page>(page: &P, injection: &InjectionOutcome) -> TriggerOutcome {
    // The DOM fallback already focused the content-editable node while
    // injecting; after a transactional update we have to put focus there
    // ourselves before the shortcut can land.
    if !matches!(injection, InjectionOutcome::DomFallback) {
        if let Err(err) = page.click(locate::CONTENT_SELECTOR) {
            log::debug!("could not focus editor before keyboard shortcut: {err}");
        }
    }

    match page.press_chord(EVAL_MODIFIERS, EVAL_KEY) {
        Ok(()) => TriggerOutcome::Keyboard,
        Err(err) => {
            log::warn!("evaluation could not be triggered: {err}");
            TriggerOutcome::Failed(err.to_string())
        }
    }
}

/// Returns the index of the first selector matching a visible, enabled
/// element, or -1. Invalid selectors are skipped rather than aborting. The
/// visibility check uses client rects; `offsetParent` would wrongly exclude
/// `position: fixed` controls.
pub(crate) const SELECT_FN: &str = r#"(selectors) => {
  for (let i = 0; i < selectors.length; i += 1) {
    let el;
    try { el = document.querySelector(selectors[i]); } catch (err) { continue; }
    if (el && !el.disabled && el.getClientRects().length > 0) return i;
  }
  return -1;
}"#;

/// Linear scan of clickable controls. Clicks the first match in-page (there
/// is no stable selector to hand back) and returns its label, or null.
pub(crate) const SCAN_FN: &str = r#"(keywords) => {
  const controls = document.querySelectorAll(
    'button, [role="button"], a, input[type="button"], input[type="submit"]');
  for (const el of controls) {
    const label = ((el.innerText || '') + ' ' + (el.title || '') + ' '
      + (el.getAttribute('aria-label') || '')).toLowerCase();
    for (const keyword of keywords) {
      if (label.includes(keyword)) {
        el.click();
        return label.trim().slice(0, 80);
      }
    }
  }
  return null;
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fake::{Behavior, FakePage};

    #[test]
    fn selector_pass_wins_when_a_control_matches() {
        let page = FakePage::with_behavior(Behavior {
            control_index: Some(1),
            press_ok: true,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::Transactional);
        assert_eq!(
            outcome,
            TriggerOutcome::Control(EVAL_CONTROL_SELECTORS[1].to_owned())
        );

        let log = page.log.lock().unwrap();
        assert_eq!(log.clicks, vec![EVAL_CONTROL_SELECTORS[1].to_owned()]);
        assert_eq!(log.control_scans, 0, "scan pass must not run after a match");
        assert!(log.chords.is_empty(), "keyboard fallback must not run");
    }

    #[test]
    fn scan_pass_runs_when_selectors_miss() {
        let page = FakePage::with_behavior(Behavior {
            control_index: None,
            scan_label: Some("play ctrl+enter"),
            press_ok: true,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::Transactional);
        assert_eq!(outcome, TriggerOutcome::Scan("play ctrl+enter".to_owned()));
        assert!(page.log.lock().unwrap().chords.is_empty());
    }

    #[test]
    fn erroring_control_search_falls_through_to_keyboard() {
        let page = FakePage::with_behavior(Behavior {
            control_search_errors: true,
            press_ok: true,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::Transactional);
        assert_eq!(outcome, TriggerOutcome::Keyboard);

        let log = page.log.lock().unwrap();
        assert_eq!(log.control_searches, 1);
        assert_eq!(log.chords.len(), 1);
    }

    #[test]
    fn keyboard_fallback_is_always_attempted_when_search_misses() {
        let page = FakePage::with_behavior(Behavior {
            control_index: None,
            scan_label: None,
            press_ok: true,
            content_editable: true,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::Transactional);
        assert_eq!(outcome, TriggerOutcome::Keyboard);

        let log = page.log.lock().unwrap();
        // Focus lands in the editor first, then the chord is sent.
        assert_eq!(log.clicks, vec![locate::CONTENT_SELECTOR.to_owned()]);
        assert_eq!(
            log.chords,
            vec![(vec![Modifier::Control], "Enter".to_owned())]
        );
    }

    #[test]
    fn degraded_injection_skips_the_focus_click() {
        let page = FakePage::with_behavior(Behavior {
            press_ok: true,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::DomFallback);
        assert_eq!(outcome, TriggerOutcome::Keyboard);
        assert!(page.log.lock().unwrap().clicks.is_empty());
    }

    #[test]
    fn total_failure_is_reported_not_panicked() {
        let page = FakePage::with_behavior(Behavior {
            press_ok: false,
            ..Behavior::default()
        });

        let outcome = trigger(&page, &InjectionOutcome::Transactional);
        assert!(matches!(outcome, TriggerOutcome::Failed(_)));
        // The chord was still attempted before failing.
        assert_eq!(page.log.lock().unwrap().chords.len(), 1);
    }
}
