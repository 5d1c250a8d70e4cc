//! The enrollment of a host.
//!
//! An [`Enrollment`] runs through the following [`State`]s:
//!
//! ```text
//! Start → BackedUp → Validated → TargetResolved → KeyInstalled → Enrolled → CleanedUp
//! ```
//!
//! Any failure after the backup has been created leads to [`State::Aborted`], followed by
//! [`State::CleanedUp`].
//! Only a failure to correct the sshd_config restores the backup, the corrected sshd_config is kept
//! if a later step fails.

use ureq::Agent;

use crate::{
    Error,
    client::{EnrollmentClient, new_agent},
    keys::KeyInstaller,
    mode::{Mode, ModeResolver, Prompt},
    settings::Settings,
    sshd::{ConfigBackup, ConfigEditor, ConfigGuard, Fix},
    target::{EnrollmentTarget, Selection},
};

/// The states of an [`Enrollment`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum State {
    /// Nothing has happened yet.
    Start,
    /// The sshd_config has been backed up.
    BackedUp,
    /// Public key authentication is enabled in the sshd_config.
    Validated,
    /// Environment and applications are selected.
    TargetResolved,
    /// The management public key is installed.
    KeyInstalled,
    /// The host is enrolled.
    Enrolled,
    /// The enrollment failed.
    Aborted,
    /// The backup of the sshd_config is removed.
    CleanedUp,
}

/// The result of a successful [`Enrollment`].
#[derive(Clone, Debug)]
pub struct Outcome {
    /// The correction applied to the sshd_config.
    pub fix: Fix,
    /// The enrolled target.
    pub target: EnrollmentTarget,
    /// The number of lines added to the authorized_keys file.
    pub added_keys: usize,
    /// The message returned by the enrollment service.
    pub message: String,
    /// The states the enrollment went through.
    pub states: Vec<State>,
}

/// Tracks and logs the [`State`]s of an [`Enrollment`].
#[derive(Debug)]
struct Transitions(Vec<State>);

impl Transitions {
    fn new() -> Self {
        Self(vec![State::Start])
    }

    fn advance(&mut self, next: State) {
        let current = self.0.last().copied().unwrap_or(State::Start);
        log::debug!("Enrollment state: {current} → {next}");
        self.0.push(next);
    }
}

/// An enrollment run for a host.
#[derive(Debug)]
pub struct Enrollment<'a> {
    settings: &'a Settings,
    agent: Agent,
}

impl<'a> Enrollment<'a> {
    /// Creates a new [`Enrollment`] based on `settings`.
    pub fn new(settings: &'a Settings) -> Self {
        Self::with_agent(settings, new_agent())
    }

    /// Creates a new [`Enrollment`] that uses `agent` for requests to the enrollment service.
    pub fn with_agent(settings: &'a Settings, agent: Agent) -> Self {
        Self { settings, agent }
    }

    /// Enrolls the host.
    ///
    /// Backs up the sshd_config, enables public key authentication in it using `editor`, resolves
    /// the environment and applications (asking the operator using `prompt` in interactive mode),
    /// installs the management public key of the environment and enrolls the host.
    /// The backup of the sshd_config is removed in any case.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the sshd_config can not be backed up,
    /// - the sshd_config can not be corrected (after restoring the backup),
    /// - no environment and applications can be selected,
    /// - the management public key can not be fetched or installed,
    /// - or the enrollment request fails.
    pub fn run<E, P>(&self, editor: E, prompt: &mut P) -> Result<Outcome, Error>
    where
        E: ConfigEditor,
        P: Prompt,
    {
        let mut transitions = Transitions::new();
        let mut guard = ConfigGuard::with_editor(
            self.settings.get_sshd_config().to_path_buf(),
            self.settings.get_backup_dir(),
            editor,
        );

        let backup = guard.backup().inspect_err(|_| {
            transitions.advance(State::Aborted);
        })?;
        transitions.advance(State::BackedUp);

        let result = self.run_with_backup(&mut guard, &backup, prompt, &mut transitions);
        if let Err(error) = result.as_ref() {
            log::debug!("Enrollment failed: {error}");
            transitions.advance(State::Aborted);
        }

        drop(backup);
        transitions.advance(State::CleanedUp);

        result.map(|mut outcome| {
            outcome.states = transitions.0;
            outcome
        })
    }

    /// Runs all steps that require a backup of the sshd_config.
    fn run_with_backup<E, P>(
        &self,
        guard: &mut ConfigGuard<E>,
        backup: &ConfigBackup,
        prompt: &mut P,
        transitions: &mut Transitions,
    ) -> Result<Outcome, Error>
    where
        E: ConfigEditor,
        P: Prompt,
    {
        let fix = guard.validate_and_fix(backup)?;
        transitions.advance(State::Validated);

        let installer = KeyInstaller::new(
            self.agent.clone(),
            self.settings.get_pubkey_url().clone(),
            self.settings.get_authorized_keys().to_path_buf(),
        );

        let mode = Mode::from(self.settings.is_automated());
        let environments = match (mode, self.settings.get_environments()) {
            (Mode::Interactive, []) => {
                log::debug!("No valid environments configured, asking the enrollment service");
                installer.fetch_environments()?
            }
            (_, environments) => environments.to_vec(),
        };
        log::info!("Selecting environment and applications ({mode})");
        let selection = ModeResolver::new(mode, &environments).resolve(
            Selection::new(
                self.settings.get_environment().to_string(),
                self.settings.get_applications().to_vec(),
            ),
            prompt,
        )?;
        let target = EnrollmentTarget::new(self.settings.get_hostname().to_string(), selection);
        transitions.advance(State::TargetResolved);

        let pubkey = installer.fetch_pubkey(target.get_environment())?;
        let added_keys = installer.install_pubkey(&pubkey)?;
        transitions.advance(State::KeyInstalled);

        let message = EnrollmentClient::new(
            self.agent.clone(),
            self.settings.get_enroll_url().clone(),
            self.settings.get_os_type().to_string(),
            self.settings.get_user().to_string(),
        )
        .enroll(&target)?;
        log::info!("Enrolled {target}: {}", message.trim());
        transitions.advance(State::Enrolled);

        Ok(Outcome {
            fix,
            target,
            added_keys,
            message,
            states: Vec::new(),
        })
    }
}
