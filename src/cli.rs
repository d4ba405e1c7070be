//! Defines tether's CLI through clap types.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use thiserror::Error;

use crate::chrome::ChromeSession;
use crate::locate;
use crate::sync_session::SyncSession;
use crate::watch::{FileWatcher, WatchTarget};

/// Default live-coding page to drive.
pub const DEFAULT_URL: &str = "https://strudel.cc/";

/// Command line options that tether accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "tether", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Path to the file to watch and mirror into the page.
    pub file: PathBuf,

    /// URL of the live-coding page to drive.
    #[clap(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// Run the browser headless. Headless sessions have no audio output;
    /// mostly useful for debugging the bridge itself.
    #[clap(long)]
    pub headless: bool,
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        let target = WatchTarget::new(&self.file)?;
        log::info!("watching {}", target.absolute_path().display());

        let session = ChromeSession::launch(&self.url, self.headless, locate::CONTENT_SELECTOR)
            .with_context(|| format!("could not open a browser session for {}", self.url))?;

        let (watcher, events) = FileWatcher::start(&target)?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        ctrlc::set_handler(move || {
            let _ = shutdown_tx.send(());
        })
        .context("failed to install signal handler")?;

        let mut sync = SyncSession::new(session, events, shutdown_rx);

        // Mirror the file's current content immediately so the page and the
        // file agree before the first save.
        let initial = fs_err::read_to_string(target.absolute_path())?;
        sync.sync_now(&initial);

        let result = sync.run();

        // Orderly teardown: stop the watcher first, then close the session
        // and the browser it owns.
        drop(watcher);
        drop(sync);

        result.map_err(Into::into)
    }
}
