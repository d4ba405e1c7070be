//! Discovery of the in-page editor state.
//!
//! The target application is an unversioned third party: it exports nothing,
//! and its internal object names, DOM structure, and component framework can
//! all change between deploys. Discovery is therefore an ordered ladder of
//! independent strategies, from most specific to least, composed
//! first-success-wins. Each strategy is a small script evaluated in the page
//! that checks candidates against a minimal structural capability test (does
//! the object expose a document and a callable dispatch) instead of any
//! class or type check, and touches nothing unless it succeeds, so a failed
//! strategy never spoils the ones after it.
//!
//! A successful strategy stashes the live reference on a window global; the
//! Rust side only ever holds an opaque [`EditorHandle`] describing how the
//! reference was found. The stash can be invalidated at any time by the page
//! hot-reloading its editor, so handles are revalidated on every sync and
//! never trusted across attempts.

use serde_json::Value;

use crate::page::Page;

/// The content-editable node holding the document text.
pub const CONTENT_SELECTOR: &str = ".cm-content";

/// Discovery strategies, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// A property some versions of the rendering library attach directly to
    /// the editor's DOM nodes.
    AttachedProperty,
    /// Upward walk from the content-editable node over back-reference
    /// properties frameworks hang on DOM nodes.
    ViewBackReference,
    /// Structural duck-typing scan of the editor root's own properties.
    PropertyScan,
    /// Walk of component-internals (fiber-style) trees reachable from the
    /// editor root.
    ComponentInternals,
    /// Bounded recursive structural search from the editor's container.
    RecursiveSearch,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::AttachedProperty,
        Strategy::ViewBackReference,
        Strategy::PropertyScan,
        Strategy::ComponentInternals,
        Strategy::RecursiveSearch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::AttachedProperty => "attached-property",
            Strategy::ViewBackReference => "view-backref-walk",
            Strategy::PropertyScan => "structural-scan",
            Strategy::ComponentInternals => "component-internals",
            Strategy::RecursiveSearch => "recursive-search",
        }
    }

    pub(crate) fn script(self) -> &'static str {
        match self {
            Strategy::AttachedProperty => ATTACHED_PROPERTY_FN,
            Strategy::ViewBackReference => VIEW_BACKREF_FN,
            Strategy::PropertyScan => PROPERTY_SCAN_FN,
            Strategy::ComponentInternals => COMPONENT_INTERNALS_FN,
            Strategy::RecursiveSearch => RECURSIVE_SEARCH_FN,
        }
    }
}

/// Opaque reference to the located editor state. Scoped to one sync attempt.
#[derive(Debug, Clone)]
pub struct EditorHandle {
    /// Which strategy produced the handle, for diagnostics.
    pub strategy: Strategy,
    /// Document length reported by the capability check at discovery time.
    pub doc_length: u64,
}

/// Resolves an editor handle for one sync attempt.
///
/// A handle from a previous attempt is revalidated first (a cheap capability
/// re-check of the stashed in-page reference) before falling back to the
/// full strategy ladder. A stale stash never short-circuits to failure.
pub fn resolve<P: Page>(page: &P, previous: Option<EditorHandle>) -> Option<EditorHandle> {
    if let Some(handle) = previous {
        match revalidate(page) {
            Some(doc_length) => {
                log::trace!("reusing editor handle from {}", handle.strategy.name());
                return Some(EditorHandle {
                    doc_length,
                    ..handle
                });
            }
            None => {
                log::debug!("stashed editor handle is stale, rerunning discovery");
            }
        }
    }

    locate(page)
}

/// Runs the strategy ladder. `None` is an expected outcome, not an error: it
/// feeds the degraded injection path.
pub fn locate<P: Page>(page: &P) -> Option<EditorHandle> {
    for strategy in Strategy::ALL {
        match page.call_function(strategy.script(), &[]) {
            Ok(value) => {
                if let Some(doc_length) = parse_found(&value) {
                    log::debug!(
                        "located editor state via {} ({} chars)",
                        strategy.name(),
                        doc_length
                    );
                    return Some(EditorHandle {
                        strategy,
                        doc_length,
                    });
                }
                log::trace!("strategy {} found nothing", strategy.name());
            }
            Err(err) => {
                // Strategies are side-effect-free on failure; an error from
                // one must not stop the next from running.
                log::debug!("strategy {} errored: {err}", strategy.name());
            }
        }
    }

    log::warn!("no editor state found by any discovery strategy");
    None
}

fn revalidate<P: Page>(page: &P) -> Option<u64> {
    match page.call_function(REVALIDATE_FN, &[]) {
        Ok(value) => parse_found(&value),
        Err(err) => {
            log::debug!("handle revalidation errored: {err}");
            None
        }
    }
}

/// Parses the `{ found, docLength }` result every discovery script returns.
fn parse_found(value: &Value) -> Option<u64> {
    if value.get("found")?.as_bool()? {
        Some(value.get("docLength").and_then(Value::as_u64).unwrap_or(0))
    } else {
        None
    }
}

// Every script below returns `{ found: false }` without touching the page on
// failure, and stashes the live reference on `window.__tetherEditorView`
// only on success. The capability check is structural: the candidate must
// expose `state.doc` and a callable `dispatch`.

pub(crate) const REVALIDATE_FN: &str = r#"() => {
  const view = window.__tetherEditorView;
  if (view && view.state && view.state.doc && typeof view.dispatch === 'function') {
    return { found: true, docLength: view.state.doc.length };
  }
  return { found: false };
}"#;

const ATTACHED_PROPERTY_FN: &str = r#"() => {
  const ok = (v) => v && v.state && v.state.doc && typeof v.dispatch === 'function';
  for (const selector of ['.cm-content', '.cm-editor']) {
    const node = document.querySelector(selector);
    if (!node || !node.cmView) continue;
    const candidate = ok(node.cmView) ? node.cmView : node.cmView.view;
    if (ok(candidate)) {
      window.__tetherEditorView = candidate;
      return { found: true, docLength: candidate.state.doc.length };
    }
  }
  return { found: false };
}"#;

const VIEW_BACKREF_FN: &str = r#"() => {
  const ok = (v) => v && v.state && v.state.doc && typeof v.dispatch === 'function';
  let node = document.querySelector('.cm-content');
  for (let depth = 0; node && depth < 10; depth += 1) {
    for (const key of Object.getOwnPropertyNames(node)) {
      let value;
      try { value = node[key]; } catch (err) { continue; }
      if (!value) continue;
      const candidate = ok(value) ? value : (ok(value.view) ? value.view : null);
      if (candidate) {
        window.__tetherEditorView = candidate;
        return { found: true, docLength: candidate.state.doc.length };
      }
    }
    node = node.parentElement;
  }
  return { found: false };
}"#;

const PROPERTY_SCAN_FN: &str = r#"() => {
  const ok = (v) => v && v.state && v.state.doc && typeof v.dispatch === 'function';
  const root = document.querySelector('.cm-editor') || document.querySelector('.cm-content');
  if (!root) return { found: false };
  for (const key of Object.getOwnPropertyNames(root)) {
    let value;
    try { value = root[key]; } catch (err) { continue; }
    if (ok(value)) {
      window.__tetherEditorView = value;
      return { found: true, docLength: value.state.doc.length };
    }
  }
  return { found: false };
}"#;

const COMPONENT_INTERNALS_FN: &str = r#"() => {
  const ok = (v) => v && v.state && v.state.doc && typeof v.dispatch === 'function';
  const SLOTS = ['view', 'editorView', 'editor', 'cm'];
  const root = document.querySelector('.cm-editor') || document.querySelector('.cm-content');
  if (!root) return { found: false };
  const keys = Object.getOwnPropertyNames(root).filter((key) =>
    key.startsWith('__reactFiber$') || key.startsWith('__reactInternalInstance$'));
  const hit = (candidate) => {
    window.__tetherEditorView = candidate;
    return { found: true, docLength: candidate.state.doc.length };
  };
  for (const key of keys) {
    let fiber = root[key];
    for (let depth = 0; fiber && depth < 30; depth += 1) {
      for (const spot of [fiber.stateNode, fiber.memoizedProps, fiber.memoizedState]) {
        if (!spot || typeof spot !== 'object') continue;
        if (ok(spot)) return hit(spot);
        for (const slot of SLOTS) {
          let value;
          try { value = spot[slot]; } catch (err) { continue; }
          if (ok(value)) return hit(value);
          if (value && ok(value.current)) return hit(value.current);
        }
      }
      fiber = fiber.return;
    }
  }
  return { found: false };
}"#;

const RECURSIVE_SEARCH_FN: &str = r#"() => {
  const ok = (v) => v && v.state && v.state.doc && typeof v.dispatch === 'function';
  const visit = (value, depth) => {
    if (!value || typeof value !== 'object' || depth > 3) return null;
    if (ok(value)) return value;
    for (const key of Object.keys(value)) {
      if (key.startsWith('_') || key.startsWith('$')) continue;
      let child;
      try { child = value[key]; } catch (err) { continue; }
      const found = visit(child, depth + 1);
      if (found) return found;
    }
    return null;
  };
  const container = document.querySelector('.cm-editor')
    || document.querySelector('.cm-content')
    || document.body;
  for (const key of Object.getOwnPropertyNames(container)) {
    let seed;
    try { seed = container[key]; } catch (err) { continue; }
    const candidate = visit(seed, 0);
    if (candidate) {
      window.__tetherEditorView = candidate;
      return { found: true, docLength: candidate.state.doc.length };
    }
  }
  return { found: false };
}"#;
