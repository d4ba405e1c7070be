//! The sync loop: composes discovery, injection, and evaluation per change.
//!
//! One session owns the page, the watcher's event channel, and the
//! last-known-good editor handle. All state is explicit, no globals, so the
//! design stays portable to a multi-session future. The loop processes changes in
//! arrival order with at most one sync in flight: events that queue up while
//! a sync runs are drained afterwards and only the newest content is applied
//! in a single follow-up sync, so stale content is never applied after newer
//! content.

use std::fmt;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};

use crate::inject::{self, InjectionOutcome};
use crate::locate::{self, EditorHandle};
use crate::page::Page;
use crate::trigger::{self, TriggerOutcome};
use crate::watch::{ChangeEvent, WatchError, WatchMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Content applied transactionally.
    Success,
    /// Content applied through the DOM fallback; host-internal state may lag.
    Degraded,
    /// Content could not be applied this cycle. No automatic retry; the next
    /// file change starts a fresh cycle.
    Failed,
}

/// Combined result of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub outcome: SyncOutcome,
    pub injection: InjectionOutcome,
    /// `None` when injection failed and evaluation was skipped.
    pub trigger: Option<TriggerOutcome>,
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injection: {}", self.injection)?;
        match &self.trigger {
            Some(trigger) => write!(f, ", evaluation: {trigger}"),
            None => write!(f, ", evaluation skipped"),
        }
    }
}

pub struct SyncSession<P: Page> {
    page: P,
    events: Receiver<WatchMessage>,
    shutdown: Receiver<()>,
    last_handle: Option<EditorHandle>,
    settle_delay: Duration,
}

impl<P: Page> SyncSession<P> {
    pub fn new(page: P, events: Receiver<WatchMessage>, shutdown: Receiver<()>) -> Self {
        SyncSession {
            page,
            events,
            shutdown,
            last_handle: None,
            settle_delay: inject::SETTLE_DELAY,
        }
    }

    /// Overrides the post-injection settle delay. Tests set this to zero.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Runs one sync immediately, outside the event loop. Used to mirror the
    /// file's current content right after startup.
    pub fn sync_now(&mut self, content: &str) -> SyncResult {
        let result = self.sync_once(content);
        self.log_result(&result, content.len());
        result
    }

    /// Blocks on the event loop until shutdown is requested, the watcher
    /// reports a fatal error, or every sender hangs up.
    ///
    /// Borrows rather than consumes the session: the page (and whatever
    /// browser it owns) stays alive after the loop exits, so the caller
    /// controls teardown order.
    pub fn run(&mut self) -> Result<(), WatchError> {
        log::info!("watching for changes; save the file to sync");

        loop {
            select! {
                recv(self.events) -> message => match message {
                    Ok(WatchMessage::Changed(event)) => {
                        if let Some(fatal) = self.handle_change(event) {
                            return Err(fatal);
                        }
                    }
                    Ok(WatchMessage::Fatal(err)) => return Err(err),
                    // Watcher dropped; nothing more will ever arrive.
                    Err(_) => return Ok(()),
                },
                recv(self.shutdown) -> _ => {
                    log::info!("shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Coalesces queued changes down to the newest one, syncs it, and
    /// reports any fatal watcher error encountered while draining.
    fn handle_change(&mut self, first: ChangeEvent) -> Option<WatchError> {
        let (event, fatal) = self.coalesce(first);

        let result = self.sync_once(&event.content);
        self.log_result(&result, event.content.len());

        fatal
    }

    /// Drains every change already queued, keeping only the latest content.
    /// Changes that arrive during the upcoming sync are handled the same way
    /// by the next loop iteration, which yields exactly one follow-up sync.
    fn coalesce(&self, first: ChangeEvent) -> (ChangeEvent, Option<WatchError>) {
        let mut latest = first;
        let mut skipped = 0;

        loop {
            match self.events.try_recv() {
                Ok(WatchMessage::Changed(next)) => {
                    latest = next;
                    skipped += 1;
                }
                Ok(WatchMessage::Fatal(err)) => return (latest, Some(err)),
                Err(_) => break,
            }
        }

        if skipped > 0 {
            log::debug!("coalesced {skipped} queued change(s), applying only the newest");
        }

        (latest, None)
    }

    fn sync_once(&mut self, content: &str) -> SyncResult {
        // Never trust a handle across attempts: the page can hot-reload its
        // editor at any time. Revalidate, then fall back to full discovery.
        let handle = locate::resolve(&self.page, self.last_handle.take());

        let injection = inject::inject(&self.page, handle.as_ref(), content);

        if injection == InjectionOutcome::Transactional {
            // Keep the handle for an opportunistic revalidation next time.
            self.last_handle = handle;
        }

        let trigger = if injection.is_failed() {
            None
        } else {
            if !self.settle_delay.is_zero() {
                thread::sleep(self.settle_delay);
            }
            Some(trigger::trigger(&self.page, &injection))
        };

        let outcome = match injection {
            InjectionOutcome::Transactional => SyncOutcome::Success,
            InjectionOutcome::DomFallback => SyncOutcome::Degraded,
            InjectionOutcome::Failed(_) => SyncOutcome::Failed,
        };

        SyncResult {
            outcome,
            injection,
            trigger,
        }
    }

    fn log_result(&self, result: &SyncResult, content_len: usize) {
        match result.outcome {
            SyncOutcome::Success => {
                log::info!("synced {content_len} chars ({result})");
            }
            SyncOutcome::Degraded => {
                log::warn!("synced {content_len} chars degraded ({result})");
            }
            SyncOutcome::Failed => {
                log::error!("sync failed ({result}); waiting for the next change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Instant, SystemTime};

    use crate::page::fake::{Behavior, FakePage};

    fn change(content: &str) -> ChangeEvent {
        ChangeEvent {
            content: content.to_owned(),
            modified: SystemTime::now(),
            observed_at: Instant::now(),
        }
    }

    #[allow(clippy::type_complexity)]
    fn session_for(
        page: &FakePage,
    ) -> (
        SyncSession<FakePage>,
        crossbeam_channel::Sender<WatchMessage>,
        crossbeam_channel::Sender<()>,
    ) {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let session =
            SyncSession::new(page.clone(), event_rx, shutdown_rx).with_settle_delay(Duration::ZERO);
        (session, event_tx, shutdown_tx)
    }

    #[test]
    fn edit_syncs_new_content_and_triggers_evaluation() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, _events, _shutdown) = session_for(&page);

        let result = session.sync_now("b");
        assert_eq!(result.outcome, SyncOutcome::Success);
        assert!(result.trigger.is_some());

        let log = page.log.lock().unwrap();
        assert_eq!(log.dispatched, vec!["b".to_owned()]);
    }

    #[test]
    fn queued_changes_coalesce_to_exactly_one_sync_of_the_newest() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, events, _shutdown) = session_for(&page);

        // A and B arrive while Z is still the change being picked up.
        events.send(WatchMessage::Changed(change("a"))).unwrap();
        events.send(WatchMessage::Changed(change("b"))).unwrap();

        let fatal = session.handle_change(change("z"));
        assert!(fatal.is_none());

        let log = page.log.lock().unwrap();
        assert_eq!(
            log.dispatched,
            vec!["b".to_owned()],
            "exactly one sync, applying only the newest content"
        );
    }

    #[test]
    fn fatal_error_found_while_draining_is_propagated_after_the_sync() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, events, _shutdown) = session_for(&page);

        events.send(WatchMessage::Changed(change("a"))).unwrap();
        events
            .send(WatchMessage::Fatal(WatchError("boom".to_owned())))
            .unwrap();

        let fatal = session.handle_change(change("z"));
        assert!(fatal.is_some());

        // The content that arrived before the failure was still applied.
        assert_eq!(page.log.lock().unwrap().dispatched, vec!["a".to_owned()]);
    }

    #[test]
    fn unlocatable_editor_degrades_but_keeps_running() {
        let page = FakePage::with_behavior(Behavior {
            locate_via: None,
            content_editable: true,
            press_ok: true,
            ..Behavior::default()
        });
        let (mut session, _events, _shutdown) = session_for(&page);

        let result = session.sync_now("b");
        assert_eq!(result.outcome, SyncOutcome::Degraded);
        assert_eq!(result.injection, InjectionOutcome::DomFallback);
        // Control search missed too, so the keyboard fallback fired.
        assert_eq!(result.trigger, Some(TriggerOutcome::Keyboard));

        let log = page.log.lock().unwrap();
        assert_eq!(log.dom_injected, vec!["b".to_owned()]);
        assert_eq!(log.chords.len(), 1);
    }

    #[test]
    fn failed_injection_skips_evaluation() {
        let page = FakePage::with_behavior(Behavior::default());
        let (mut session, _events, _shutdown) = session_for(&page);

        let result = session.sync_now("b");
        assert_eq!(result.outcome, SyncOutcome::Failed);
        assert_eq!(result.trigger, None);

        let log = page.log.lock().unwrap();
        assert!(log.chords.is_empty());
        assert_eq!(log.control_searches, 0);
    }

    #[test]
    fn successful_transactional_sync_reuses_the_handle_next_time() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, _events, _shutdown) = session_for(&page);

        session.sync_now("first");
        session.sync_now("second");

        let log = page.log.lock().unwrap();
        // Full discovery ran once; the second sync only revalidated.
        assert_eq!(log.strategies.len(), 1);
        assert_eq!(log.revalidations, 1);
        assert_eq!(
            log.dispatched,
            vec!["first".to_owned(), "second".to_owned()]
        );
    }

    #[test]
    fn run_exits_cleanly_on_shutdown_signal() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, events, shutdown) = session_for(&page);

        let worker = std::thread::spawn(move || session.run());

        events.send(WatchMessage::Changed(change("b"))).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        shutdown.send(()).unwrap();

        let result = worker.join().unwrap();
        assert!(result.is_ok());
        assert_eq!(page.log.lock().unwrap().dispatched, vec!["b".to_owned()]);
    }

    #[test]
    fn run_propagates_fatal_watcher_errors() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, events, _shutdown) = session_for(&page);

        let worker = std::thread::spawn(move || session.run());
        events
            .send(WatchMessage::Fatal(WatchError("unwatchable".to_owned())))
            .unwrap();

        let result = worker.join().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn session_outlives_the_event_loop() {
        let page = FakePage::with_behavior(Behavior::healthy());
        let (mut session, _events, shutdown) = session_for(&page);

        shutdown.send(()).unwrap();
        assert!(session.run().is_ok());

        // The page is still owned and usable after the loop exits, so the
        // caller decides when it (and any browser behind it) goes down.
        let result = session.sync_now("after shutdown");
        assert_eq!(result.outcome, SyncOutcome::Success);
        assert_eq!(
            page.log.lock().unwrap().dispatched,
            vec!["after shutdown".to_owned()]
        );
    }
}
