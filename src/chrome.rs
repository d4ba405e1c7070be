//! Chrome-backed implementation of the page boundary.
//!
//! Bootstrapping only: launch the browser, navigate, wait for the editor to
//! mount, then hand the tab to the core as a [`Page`]. The bridge itself
//! never manages navigation or browser lifecycle beyond this module.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use headless_chrome::browser::tab::ModifierKey;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;

use crate::page::{Modifier, Page, PageError};

/// How long to wait for the page to mount its editor after navigation.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// A launched, navigated, ready browser session.
///
/// Holds the `Browser` alive for the lifetime of the sync session; dropping
/// the session closes the browser.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    /// Launches Chrome, navigates to `url`, and waits for `ready_selector`
    /// to appear.
    ///
    /// The browser is headful by default: the whole point of the bridge is
    /// to keep a session with a live audio/runtime context, which a headless
    /// browser will not sustain. Autoplay gating is disabled so the page's
    /// audio context can start without a user gesture.
    pub fn launch(url: &str, headless: bool, ready_selector: &str) -> anyhow::Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .args(vec![OsStr::new("--autoplay-policy=no-user-gesture-required")])
            // The session idles between saves; never let the CDP connection
            // time out underneath us.
            .idle_browser_timeout(Duration::from_secs(86_400 * 365))
            .build()
            .map_err(|err| anyhow!("invalid browser launch options: {err}"))?;

        let browser = Browser::new(options).context("failed to launch browser")?;
        let tab = browser.new_tab().context("failed to open a tab")?;

        log::info!("navigating to {url}");
        tab.navigate_to(url)
            .with_context(|| format!("failed to navigate to {url}"))?;
        tab.wait_until_navigated()
            .context("page never finished loading")?;

        tab.wait_for_element_with_custom_timeout(ready_selector, READY_TIMEOUT)
            .with_context(|| {
                format!("editor (`{ready_selector}`) did not appear within {READY_TIMEOUT:?}")
            })?;
        log::info!("page is ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

impl Page for ChromeSession {
    fn call_function(&self, function: &str, args: &[Value]) -> Result<Value, PageError> {
        // Runtime.evaluate takes no arguments, so render the call as an
        // IIFE with JSON-encoded argument literals.
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            rendered.push(
                serde_json::to_string(arg)
                    .map_err(|err| PageError::Evaluation(err.to_string()))?,
            );
        }
        let expression = format!("({})({})", function, rendered.join(", "));

        let result = self
            .tab
            .evaluate(&expression, true)
            .map_err(|err| PageError::Evaluation(err.to_string()))?;

        Ok(result.value.unwrap_or(Value::Null))
    }

    fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|_| PageError::SelectorTimeout(selector.to_owned()))
    }

    fn click(&self, selector: &str) -> Result<(), PageError> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|err| PageError::Interaction(err.to_string()))?;
        element
            .click()
            .map(|_| ())
            .map_err(|err| PageError::Interaction(err.to_string()))
    }

    fn press_chord(&self, modifiers: &[Modifier], key: &str) -> Result<(), PageError> {
        let modifiers: Vec<ModifierKey> = modifiers.iter().map(|m| (*m).into()).collect();
        self.tab
            .press_key_with_modifiers(key, Some(&modifiers))
            .map(|_| ())
            .map_err(|err| PageError::Interaction(err.to_string()))
    }
}

impl From<Modifier> for ModifierKey {
    fn from(value: Modifier) -> Self {
        match value {
            Modifier::Control => ModifierKey::Ctrl,
            Modifier::Alt => ModifierKey::Alt,
            Modifier::Shift => ModifierKey::Shift,
            Modifier::Meta => ModifierKey::Meta,
        }
    }
}
