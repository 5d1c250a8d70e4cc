//! Default locations for the enrollment agent configuration file.
//!
//! The configuration file carries the values provided by the enrollment service at deployment
//! time (e.g. the URLs of its endpoints and the list of valid environments).
//!
//! # Examples
//!
//! ```
//! use enroll_common::config::{get_config_file, get_config_file_paths};
//!
//! // Get the first config file found, according to directory precedence.
//! println!("{:?}", get_config_file());
//!
//! // Get all configuration file paths, sorted by directory precedence.
//! let paths = get_config_file_paths();
//! assert_eq!(paths.len(), 4);
//! assert_eq!(
//!     paths.first().map(|path| path.as_path()),
//!     Some(std::path::Path::new("/etc/enroll-agent/config.toml"))
//! );
//! ```

use std::path::{Path, PathBuf};

/// The default config directory below "/usr".
const DEFAULT_CONFIG_DIR: &str = "/usr/share/enroll-agent/";

/// The override config directory below "/etc".
const ETC_OVERRIDE_CONFIG_DIR: &str = "/etc/enroll-agent/";

/// The override config directory below "/run".
const RUN_OVERRIDE_CONFIG_DIR: &str = "/run/enroll-agent/";

/// The override config directory below "/usr/local".
const USR_LOCAL_OVERRIDE_CONFIG_DIR: &str = "/usr/local/share/enroll-agent/";

/// The filename of an enrollment agent configuration file.
const CONFIG_FILE: &str = "config.toml";

/// Returns the first configuration file available, or [`None`] if none found.
///
/// Considers files named `config.toml` in the following directories in descending priority:
/// - `/etc/enroll-agent`
/// - `/run/enroll-agent`
/// - `/usr/local/share/enroll-agent`
/// - `/usr/share/enroll-agent`
///
/// The first existing file is returned.
/// If no file is found [`None`] is returned.
pub fn get_config_file() -> Option<PathBuf> {
    find_first_file(get_config_file_paths())
}

/// Returns a list of all configuration file locations, sorted by precedence.
pub fn get_config_file_paths() -> Vec<PathBuf> {
    vec![
        get_etc_override_config_file_path(),
        get_run_override_config_file_path(),
        get_usr_local_override_config_file_path(),
        get_default_config_file_path(),
    ]
}

/// Returns the file path of the configuration file override below /etc.
fn get_etc_override_config_file_path() -> PathBuf {
    PathBuf::from([ETC_OVERRIDE_CONFIG_DIR, CONFIG_FILE].concat())
}

/// Returns the file path of the configuration file override below /run.
fn get_run_override_config_file_path() -> PathBuf {
    PathBuf::from([RUN_OVERRIDE_CONFIG_DIR, CONFIG_FILE].concat())
}

/// Returns the file path of the configuration file override below /usr/local.
fn get_usr_local_override_config_file_path() -> PathBuf {
    PathBuf::from([USR_LOCAL_OVERRIDE_CONFIG_DIR, CONFIG_FILE].concat())
}

/// Returns the file path of the default configuration file below /usr.
fn get_default_config_file_path() -> PathBuf {
    PathBuf::from([DEFAULT_CONFIG_DIR, CONFIG_FILE].concat())
}

/// Returns the first path in `paths` that is an existing file.
fn find_first_file<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Option<PathBuf> {
    paths
        .into_iter()
        .map(|path| path.as_ref().to_path_buf())
        .find(|file| file.is_file())
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use rstest::rstest;
    use testdir::testdir;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    fn first_existing_file_wins() -> TestResult {
        let dir = testdir!();
        let missing = dir.join("missing.toml");
        let second = dir.join("second.toml");
        let third = dir.join("third.toml");
        File::create(&second)?;
        File::create(&third)?;

        assert_eq!(
            find_first_file([&missing, &second, &third]),
            Some(second.clone())
        );
        Ok(())
    }

    #[rstest]
    fn directories_are_not_config_files() -> TestResult {
        let dir = testdir!();
        assert_eq!(find_first_file([&dir]), None);
        Ok(())
    }

    #[rstest]
    fn config_file_paths_are_sorted_by_precedence() {
        assert_eq!(
            get_config_file_paths(),
            [
                "/etc/enroll-agent/config.toml",
                "/run/enroll-agent/config.toml",
                "/usr/local/share/enroll-agent/config.toml",
                "/usr/share/enroll-agent/config.toml",
            ]
            .map(PathBuf::from)
        );
    }
}
