//! Utilities for inspecting the local system.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use enroll_common::ssh::{get_authorized_keys_path_for_home, get_default_authorized_keys_path};
use nix::unistd::{User, geteuid, gethostname};

/// The name of the system user whose authorized_keys file receives the management key.
const ROOT_USER: &str = "root";

/// The [os-release] files, sorted by precedence.
///
/// [os-release]: https://man.archlinux.org/man/os-release.5
const OS_RELEASE_FILES: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// The operating system identifier if [os-release] does not provide one.
///
/// [os-release]: https://man.archlinux.org/man/os-release.5
const DEFAULT_OS_ID: &str = "linux";

/// An error that may occur when inspecting the local system.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The hostname of the system can not be retrieved.
    #[error("Unable to retrieve the hostname of the system:\n{0}")]
    Hostname(nix::errno::Errno),

    /// The hostname of the system is not valid UTF-8.
    #[error("The hostname {0:?} of the system is not valid UTF-8")]
    HostnameEncoding(String),

    /// None of the os-release files can be read.
    #[error("Unable to read the operating system identification from {path}:\n{source}")]
    OsRelease {
        /// The path of the last os-release file tried.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// The current user is an unprivileged user, but should be root.
    #[error("This application must be run as root, but is running as \"{user}\"")]
    NotRoot {
        /// The name (or uid) of the calling system user.
        user: String,
    },
}

/// Checks whether the current process is run by root.
///
/// Evaluates the effective user ID of the current process.
///
/// # Errors
///
/// Returns an error if the effective user ID is not that of root.
pub fn ensure_root() -> Result<(), Error> {
    let euid = geteuid();
    if euid.is_root() {
        return Ok(());
    }

    let user = match User::from_uid(euid) {
        Ok(Some(user)) => user.name,
        _ => euid.to_string(),
    };
    Err(Error::NotRoot { user })
}

/// Returns the hostname of the system.
///
/// # Errors
///
/// Returns an error if
/// - the hostname can not be retrieved,
/// - or the hostname is not valid UTF-8.
pub fn get_hostname() -> Result<String, Error> {
    gethostname()
        .map_err(Error::Hostname)?
        .into_string()
        .map_err(|name| Error::HostnameEncoding(name.to_string_lossy().into_owned()))
}

/// Returns the path of root's authorized_keys file.
///
/// The home directory of root is looked up in the user database.
/// If the lookup fails, the default home directory of root is assumed.
pub fn get_root_authorized_keys_path() -> PathBuf {
    match User::from_name(ROOT_USER) {
        Ok(Some(user)) => get_authorized_keys_path_for_home(user.dir),
        _ => {
            log::debug!("Unable to look up user {ROOT_USER}, assuming default home directory");
            get_default_authorized_keys_path()
        }
    }
}

/// Returns the value of the `ID` field of the [os-release] `contents`.
///
/// Surrounding quotes are removed.
/// Returns `linux` if the field is missing or empty.
///
/// # Examples
///
/// ```
/// use enroll_agent::utils::parse_os_id;
///
/// assert_eq!(parse_os_id("NAME=\"Arch Linux\"\nID=arch\n"), "arch");
/// assert_eq!(parse_os_id("ID=\"debian\"\n"), "debian");
/// assert_eq!(parse_os_id("NAME=Custom\n"), "linux");
/// ```
///
/// [os-release]: https://man.archlinux.org/man/os-release.5
pub fn parse_os_id(contents: &str) -> String {
    contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("ID="))
        .map(|value| value.trim().trim_matches(|c: char| c == '"' || c == '\''))
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_OS_ID)
        .to_string()
}

/// Returns the operating system identifier from the first readable file of `paths`.
///
/// # Errors
///
/// Returns an error if none of `paths` can be read.
pub fn get_os_id_from<P: AsRef<Path>>(paths: &[P]) -> Result<String, Error> {
    let mut last_error = None;
    for path in paths {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(contents) => return Ok(parse_os_id(&contents)),
            Err(source) => {
                log::debug!("Unable to read {}: {source}", path.display());
                last_error = Some(Error::OsRelease {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::OsRelease {
        path: PathBuf::new(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    }))
}

/// Returns the identifier of the operating system (e.g. `arch` or `debian`).
///
/// Reads `/etc/os-release` and falls back to `/usr/lib/os-release`.
///
/// # Errors
///
/// Returns an error if none of the os-release files can be read.
pub fn get_os_id() -> Result<String, Error> {
    get_os_id_from(OS_RELEASE_FILES)
}
