//! tether keeps a browser-hosted live-coding editor in sync with a file you
//! edit locally: it watches the file, and on every settled save replaces the
//! in-page document and triggers evaluation without reloading the page, so
//! the session's audio/runtime context survives.

pub mod cli;
pub mod logging;

mod chrome;
mod inject;
mod locate;
mod page;
mod sync_session;
mod trigger;
mod watch;

pub use chrome::ChromeSession;
pub use inject::InjectionOutcome;
pub use locate::{EditorHandle, Strategy};
pub use page::{Modifier, Page, PageError};
pub use sync_session::{SyncOutcome, SyncResult, SyncSession};
pub use trigger::TriggerOutcome;
pub use watch::{ChangeEvent, FileWatcher, TargetError, WatchError, WatchMessage, WatchTarget};
