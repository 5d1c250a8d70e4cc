//! Logging utilities.
//!
//! The enrollment agent is usually run from a terminal on a freshly provisioned host, but may also
//! be started from a systemd unit during first boot.
//! Log records are sent to the journal in the latter case and to stderr otherwise, so that stdout
//! stays reserved for operator prompts.

use log::{LevelFilter, Log};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use systemd_journal_logger::{JournalLog, connected_to_journal};

/// Logging setup error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Journal initialization error.
    #[error("Journal initialization error: {0}")]
    Journal(std::io::Error),

    /// Logger initialization error.
    #[error("Logger initialization error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

/// Returns the [`LevelFilter`] for the `debug` setting of the agent.
///
/// Debug output is the default for enrollment runs, turning it off only silences debug records.
///
/// # Examples
///
/// ```
/// use enroll_common::logging::level_for_debug;
/// use log::LevelFilter;
///
/// assert_eq!(level_for_debug(true), LevelFilter::Debug);
/// assert_eq!(level_for_debug(false), LevelFilter::Info);
/// ```
pub fn level_for_debug(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Sets up logging facilities.
///
/// Uses the systemd journal if the process is connected to it and falls back to a terminal logger
/// writing to stderr.
///
/// # Errors
///
/// An error is returned if a logger has already been set.
pub fn setup_logging(max_level: impl Into<LevelFilter>) -> Result<(), Error> {
    let max_level = max_level.into();

    if connected_to_journal() {
        if let Ok(log) = JournalLog::new().map(|log| {
            Box::new(log.with_extra_fields(vec![("VERSION", env!("CARGO_PKG_VERSION"))]))
                as Box<dyn Log>
        }) {
            log::set_boxed_logger(log)?;
            log::set_max_level(max_level);
            return Ok(());
        }
    }

    TermLogger::init(
        max_level,
        Default::default(),
        // simplelog needs to be explicitly instructed to always use stderr
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;
    Ok(())
}
