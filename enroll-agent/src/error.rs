//! Common, top-level error type for all components of enroll-agent.

use std::process::ExitCode;

use crate::sshd::FixRule;

/// An error that may occur when enrolling a host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error with the enrollment request.
    #[error(transparent)]
    Client(#[from] crate::client::Error),

    /// An error with fetching or installing the management public key.
    #[error(transparent)]
    Keys(#[from] crate::keys::Error),

    /// An error with setting up logging.
    #[error(transparent)]
    Logging(#[from] enroll_common::logging::Error),

    /// An error with selecting environment and applications.
    #[error(transparent)]
    Mode(#[from] crate::mode::Error),

    /// An error with the settings of the run.
    #[error(transparent)]
    Settings(#[from] crate::settings::Error),

    /// An error with modifying the sshd_config.
    #[error(transparent)]
    Sshd(#[from] crate::sshd::Error),

    /// An error with inspecting the local system.
    #[error(transparent)]
    Utils(#[from] crate::utils::Error),
}

/// Mapping for relevant [`Error`] variants to an [`ExitCode`].
///
/// Each way of failing to correct the sshd_config has a dedicated exit code.
#[derive(Clone, Copy, Debug, Eq, num_enum::IntoPrimitive, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum ErrorExitCode {
    /// Mapping for all errors without a dedicated exit code.
    Failure = 1,

    /// Mapping for [`crate::utils::Error::NotRoot`] wrapped in [`Error::Utils`].
    UtilsNotRoot = 2,

    /// Mapping for [`crate::sshd::Error::ConfigWrite`] of [`FixRule::Commented`] wrapped in
    /// [`Error::Sshd`].
    SshdConfigWriteCommented = 10,

    /// Mapping for [`crate::sshd::Error::ConfigWrite`] of [`FixRule::Disabled`] wrapped in
    /// [`Error::Sshd`].
    SshdConfigWriteDisabled = 11,

    /// Mapping for [`crate::sshd::Error::ConfigWrite`] of [`FixRule::Missing`] wrapped in
    /// [`Error::Sshd`].
    SshdConfigWriteMissing = 12,

    /// Mapping for [`crate::sshd::Error::BackupDestination`] and
    /// [`crate::sshd::Error::BackupSource`] wrapped in [`Error::Sshd`].
    SshdBackup = 13,

    /// Mapping for [`crate::sshd::Error::Revert`] wrapped in [`Error::Sshd`].
    SshdRevert = 14,

    /// Mapping for [`crate::sshd::Error::Read`] wrapped in [`Error::Sshd`].
    SshdRead = 15,

    /// Mapping for errors fetching public keys or environments wrapped in [`Error::Keys`].
    KeysFetch = 20,

    /// Mapping for errors installing a public key wrapped in [`Error::Keys`].
    KeysInstall = 21,

    /// Mapping for [`Error::Client`].
    ClientEnrollment = 30,

    /// Mapping for [`Error::Mode`].
    Mode = 40,

    /// Mapping for [`Error::Settings`].
    Settings = 50,

    /// Mapping for [`Error::Logging`].
    Logging = 51,

    /// Mapping for hostname lookup errors wrapped in [`Error::Utils`].
    UtilsHostname = 52,

    /// Mapping for [`crate::utils::Error::OsRelease`] wrapped in [`Error::Utils`].
    UtilsOsRelease = 53,
}

impl From<&Error> for ErrorExitCode {
    fn from(value: &Error) -> Self {
        match value {
            Error::Client(_) => Self::ClientEnrollment,
            Error::Keys(error) => match error {
                crate::keys::Error::AuthorizedKeys { .. }
                | crate::keys::Error::CreateDirectory { .. } => Self::KeysInstall,
                crate::keys::Error::EmptyPubkey { .. }
                | crate::keys::Error::EnvironmentsFetch { .. }
                | crate::keys::Error::EnvironmentsRead { .. }
                | crate::keys::Error::InvalidEnvironment { .. }
                | crate::keys::Error::InvalidPubkey { .. }
                | crate::keys::Error::KeyFetch { .. }
                | crate::keys::Error::KeyRead { .. }
                | crate::keys::Error::UrlCannotBeABase { .. } => Self::KeysFetch,
            },
            Error::Logging(_) => Self::Logging,
            Error::Mode(_) => Self::Mode,
            Error::Settings(_) => Self::Settings,
            Error::Sshd(error) => match error {
                crate::sshd::Error::BackupDestination { .. }
                | crate::sshd::Error::BackupSource { .. } => Self::SshdBackup,
                crate::sshd::Error::ConfigWrite { rule, .. } => match rule {
                    FixRule::Commented => Self::SshdConfigWriteCommented,
                    FixRule::Disabled => Self::SshdConfigWriteDisabled,
                    FixRule::Missing => Self::SshdConfigWriteMissing,
                },
                crate::sshd::Error::Read { .. } => Self::SshdRead,
                crate::sshd::Error::Revert { .. } => Self::SshdRevert,
            },
            Error::Utils(error) => match error {
                crate::utils::Error::NotRoot { .. } => Self::UtilsNotRoot,
                crate::utils::Error::OsRelease { .. } => Self::UtilsOsRelease,
                crate::utils::Error::Hostname(_) | crate::utils::Error::HostnameEncoding(_) => {
                    Self::UtilsHostname
                }
            },
        }
    }
}

impl From<Error> for ErrorExitCode {
    fn from(value: Error) -> Self {
        Self::from(&value)
    }
}

impl From<ErrorExitCode> for ExitCode {
    fn from(value: ErrorExitCode) -> Self {
        Self::from(std::convert::Into::<u8>::into(value))
    }
}

impl From<ErrorExitCode> for i32 {
    fn from(value: ErrorExitCode) -> Self {
        Self::from(std::convert::Into::<u8>::into(value))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    fn config_write(rule: FixRule) -> Error {
        crate::sshd::Error::ConfigWrite {
            rule,
            path: PathBuf::from("/etc/ssh/sshd_config"),
            source: std::io::Error::other("disk full"),
        }
        .into()
    }

    #[rstest]
    #[case(FixRule::Commented, 10)]
    #[case(FixRule::Disabled, 11)]
    #[case(FixRule::Missing, 12)]
    fn config_write_exit_code_per_rule(#[case] rule: FixRule, #[case] code: i32) {
        assert_eq!(i32::from(ErrorExitCode::from(config_write(rule))), code);
    }

    #[rstest]
    fn not_root_has_dedicated_exit_code() {
        let error: Error = crate::utils::Error::NotRoot {
            user: "nobody".to_string(),
        }
        .into();
        assert_eq!(ErrorExitCode::from(&error), ErrorExitCode::UtilsNotRoot);
        assert_ne!(i32::from(ErrorExitCode::UtilsNotRoot), 0);
    }

    #[rstest]
    fn input_errors_map_to_mode() {
        let error: Error = crate::mode::Error::InputClosed.into();
        assert_eq!(ErrorExitCode::from(error), ErrorExitCode::Mode);
    }
}
