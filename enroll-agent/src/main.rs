#![doc = include_str!("../README.md")]

use std::process::ExitCode;

use clap::Parser;
use enroll_agent::{
    Enrollment,
    Error,
    ErrorExitCode,
    Outcome,
    Settings,
    cli::Cli,
    mode::TerminalPrompt,
    sshd::AtomicEditor,
    utils::{ensure_root, get_hostname, get_os_id},
};
use enroll_common::logging::{level_for_debug, setup_logging};

fn run_command(cli: Cli) -> Result<Outcome, Error> {
    ensure_root()?;

    let mut settings = Settings::from_cli(cli, get_hostname()?)?;
    if settings.get_os_type().is_empty() {
        settings = settings.os_type(get_os_id()?);
    }

    Enrollment::new(&settings).run(AtomicEditor, &mut TerminalPrompt)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = setup_logging(level_for_debug(cli.debug)) {
        eprintln!("{error}");
        return ErrorExitCode::from(Error::from(error)).into();
    }

    match run_command(cli) {
        Ok(outcome) => {
            log::info!("Successfully enrolled {}", outcome.target);
            ExitCode::SUCCESS
        }
        Err(error) => {
            log::error!("{error}");
            ErrorExitCode::from(error).into()
        }
    }
}
