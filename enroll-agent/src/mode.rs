//! Resolution of the environment and applications of a host.
//!
//! In automated mode the pre-supplied values are used as is.
//! In interactive mode the operator is asked for an environment out of the valid set and may
//! change the list of applications.

use std::{collections::VecDeque, io::ErrorKind};

use rprompt::prompt_reply;

use crate::target::{Selection, parse_applications};

/// An error that may occur when resolving a [`Selection`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operator input ended before a selection has been made.
    #[error("The input ended before an environment and applications have been selected")]
    InputClosed,

    /// Interactive selection is not possible, because there are no valid environments.
    #[error("No valid environments are known, unable to select one interactively")]
    NoEnvironments,

    /// Reading operator input failed.
    #[error("Unable to read operator input:\n{0}")]
    Read(std::io::Error),
}

/// A way of communicating with an operator.
pub trait Prompt {
    /// Shows `message` to the operator.
    fn show(&mut self, message: &str);

    /// Asks the operator for a line of input using `prompt`.
    ///
    /// The returned line has no trailing line break.
    /// Returns [`None`] if the input has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the input fails.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>, Error>;
}

/// A [`Prompt`] on the terminal of the operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn show(&mut self, message: &str) {
        println!("{message}");
    }

    fn read_line(&mut self, prompt: &str) -> Result<Option<String>, Error> {
        match prompt_reply(prompt) {
            Ok(reply) => Ok(Some(reply)),
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(error) => Err(Error::Read(error)),
        }
    }
}

/// A [`Prompt`] replaying prepared answers.
///
/// Useful for driving interactive mode without a terminal.
/// Shown messages and asked prompts are recorded.
///
/// # Examples
///
/// ```
/// use enroll_agent::mode::{Prompt, ScriptedPrompt};
///
/// # fn main() -> testresult::TestResult {
/// let mut prompt = ScriptedPrompt::new(["prod"]);
/// assert_eq!(prompt.read_line("Environment: ")?, Some("prod".to_string()));
/// assert_eq!(prompt.read_line("Environment: ")?, None);
/// assert_eq!(prompt.prompts(), ["Environment: ", "Environment: "]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    messages: Vec<String>,
    prompts: Vec<String>,
}

impl ScriptedPrompt {
    /// Creates a new [`ScriptedPrompt`] answering with `answers` in order.
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Returns all messages shown so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Returns all prompts asked so far.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Returns the answers that have not been consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompt for ScriptedPrompt {
    fn show(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn read_line(&mut self, prompt: &str) -> Result<Option<String>, Error> {
        self.prompts.push(prompt.to_string());
        Ok(self.answers.pop_front())
    }
}

/// The prompt asking for an environment.
pub const ENVIRONMENT_PROMPT: &str = "Environment: ";

/// The prompt asking whether applications should be set.
pub const SET_APPLICATIONS_PROMPT: &str = "Set applications? [y/N]: ";

/// The prompt asking for a list of applications.
pub const APPLICATIONS_PROMPT: &str = "Applications (separated by commas or spaces): ";

/// The prompt asking for confirmation of a list of applications.
pub const CONFIRM_PROMPT: &str = "Is this correct? [y/N]: ";

/// The way a [`Selection`] is resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum Mode {
    /// Pre-supplied values are used without validation.
    #[strum(serialize = "automated")]
    Automated,

    /// The operator is asked for values.
    #[strum(serialize = "interactive")]
    Interactive,
}

impl From<bool> for Mode {
    /// Returns [`Mode::Automated`] if `automated` is `true` and [`Mode::Interactive`] otherwise.
    fn from(automated: bool) -> Self {
        if automated {
            Self::Automated
        } else {
            Self::Interactive
        }
    }
}

/// Resolves the [`Selection`] for a host.
#[derive(Debug)]
pub struct ModeResolver<'a> {
    mode: Mode,
    environments: &'a [String],
}

impl<'a> ModeResolver<'a> {
    /// Creates a new [`ModeResolver`].
    ///
    /// In interactive mode the selected environment must match one of `environments`.
    pub fn new(mode: Mode, environments: &'a [String]) -> Self {
        Self { mode, environments }
    }

    /// Returns the [`Mode`].
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Resolves the [`Selection`], starting from `preset`.
    ///
    /// In [`Mode::Automated`] `preset` is returned unchanged and `prompt` is not used.
    /// In [`Mode::Interactive`] the operator is asked for an environment until one matches the
    /// valid set (ignoring case) and may then replace the applications of `preset`.
    /// The environment is kept in the casing the operator typed it in.
    ///
    /// # Examples
    ///
    /// ```
    /// use enroll_agent::{
    ///     mode::{Mode, ModeResolver, ScriptedPrompt},
    ///     target::Selection,
    /// };
    ///
    /// # fn main() -> testresult::TestResult {
    /// let environments = vec!["prod".to_string(), "staging".to_string()];
    /// let mut prompt = ScriptedPrompt::new(["qa", "PROD", "y", "web, cache", "y"]);
    ///
    /// let selection = ModeResolver::new(Mode::Interactive, &environments)
    ///     .resolve(Selection::default(), &mut prompt)?;
    /// assert_eq!(selection.get_environment(), "PROD");
    /// assert_eq!(selection.get_applications(), ["web", "cache"]);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - interactive mode is used without valid environments,
    /// - or reading operator input fails or ends prematurely.
    pub fn resolve(
        &self,
        preset: Selection,
        prompt: &mut impl Prompt,
    ) -> Result<Selection, Error> {
        match self.mode {
            Mode::Automated => {
                log::debug!(
                    "Using pre-supplied environment \"{}\" and applications {:?}",
                    preset.get_environment(),
                    preset.get_applications()
                );
                Ok(preset)
            }
            Mode::Interactive => {
                if self.environments.is_empty() {
                    return Err(Error::NoEnvironments);
                }
                let environment = self.select_environment(preset.get_environment(), prompt)?;
                let applications =
                    select_applications(preset.get_applications().to_vec(), prompt)?;
                Ok(Selection::new(environment, applications))
            }
        }
    }

    /// Returns whether `candidate` matches one of the valid environments, ignoring case.
    fn is_valid(&self, candidate: &str) -> bool {
        self.environments
            .iter()
            .any(|environment| environment.eq_ignore_ascii_case(candidate))
    }

    /// Asks for an environment until a valid one is provided.
    fn select_environment(
        &self,
        current: &str,
        prompt: &mut impl Prompt,
    ) -> Result<String, Error> {
        loop {
            prompt.show(&format!("Current environment: \"{current}\""));
            prompt.show(&format!(
                "Valid environments: {}",
                self.environments.join(", ")
            ));

            let candidate = read_line(prompt, ENVIRONMENT_PROMPT)?;
            if self.is_valid(&candidate) {
                log::debug!("Selected environment \"{candidate}\"");
                return Ok(candidate);
            }
            prompt.show(&format!("\"{candidate}\" is not a valid environment."));
        }
    }
}

/// Reads a trimmed line from `prompt`, failing if the input has ended.
fn read_line(prompt: &mut impl Prompt, message: &str) -> Result<String, Error> {
    prompt
        .read_line(message)?
        .map(|line| line.trim().to_string())
        .ok_or(Error::InputClosed)
}

/// Returns whether `answer` is a yes.
fn is_yes(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

/// Returns whether `answer` declines, which a blank answer does as well.
fn is_no(answer: &str) -> bool {
    answer.is_empty() || answer.eq_ignore_ascii_case("n") || answer.eq_ignore_ascii_case("no")
}

/// Offers to replace the `current` applications.
///
/// A list of applications is asked for until the operator confirms it.
fn select_applications(
    current: Vec<String>,
    prompt: &mut impl Prompt,
) -> Result<Vec<String>, Error> {
    prompt.show(&format!("Current applications: {}", current.join(" ")));
    if is_no(&read_line(prompt, SET_APPLICATIONS_PROMPT)?) {
        return Ok(current);
    }

    loop {
        let applications = parse_applications(&read_line(prompt, APPLICATIONS_PROMPT)?);
        prompt.show(&format!("Applications: {}", applications.join(" ")));
        if is_yes(&read_line(prompt, CONFIRM_PROMPT)?) {
            log::debug!("Selected applications {applications:?}");
            return Ok(applications);
        }
    }
}
