//! Guarded modification of the [sshd_config].
//!
//! Enrolled hosts are managed over SSH using public key authentication, which therefore has to be
//! enabled in the SSH daemon configuration.
//! A [`ConfigGuard`] creates a [`ConfigBackup`] of the configuration before touching it, enables
//! the [PubkeyAuthentication] directive and restores the backup if writing the modified
//! configuration fails.
//! The backup file is removed when the [`ConfigBackup`] is dropped.
//!
//! [sshd_config]: https://man.archlinux.org/man/sshd_config.5
//! [PubkeyAuthentication]: https://man.archlinux.org/man/sshd_config.5#PubkeyAuthentication

use std::{
    fs::{File, OpenOptions, read_to_string, remove_file, rename, set_permissions},
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use chrono::Local;
use tempfile::NamedTempFile;

/// The directive enabling public key authentication.
pub const PUBKEY_AUTHENTICATION: &str = "PubkeyAuthentication";

/// The line enabling public key authentication.
const PUBKEY_AUTHENTICATION_YES: &str = "PubkeyAuthentication yes";

/// The keyword starting a conditional block.
const MATCH_KEYWORD: &str = "Match";

/// The file mode of a newly created backup, before the source permissions are applied.
const BACKUP_FILE_MODE: u32 = 0o600;

/// An error that may occur when modifying the sshd_config.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backup file can not be created or written to.
    #[error("Unable to create backup {path} of the SSH daemon configuration:\n{source}")]
    BackupDestination {
        /// The path of the backup file.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// The SSH daemon configuration can not be read for creating a backup.
    #[error("Unable to read SSH daemon configuration {path} for backup:\n{source}")]
    BackupSource {
        /// The path of the SSH daemon configuration.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// Writing the corrected SSH daemon configuration failed.
    ///
    /// The backup has been restored when this error is returned.
    #[error("Unable to {rule} in SSH daemon configuration {path}, the backup has been restored:\n{source}")]
    ConfigWrite {
        /// The rule that failed to apply.
        rule: FixRule,
        /// The path of the SSH daemon configuration.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// The SSH daemon configuration can not be read.
    #[error("Unable to read SSH daemon configuration {path}:\n{source}")]
    Read {
        /// The path of the SSH daemon configuration.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// Restoring the backup failed after writing the corrected configuration failed.
    #[error(
        "Unable to {rule} in SSH daemon configuration {path} and restoring backup {backup} failed:\n{source}"
    )]
    Revert {
        /// The rule that failed to apply.
        rule: FixRule,
        /// The path of the SSH daemon configuration.
        path: PathBuf,
        /// The path of the backup file.
        backup: PathBuf,
        /// The source error.
        source: std::io::Error,
    },
}

/// A correction applied to the sshd_config.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::IntoStaticStr)]
pub enum FixRule {
    /// A commented-out `#PubkeyAuthentication` line is replaced by `PubkeyAuthentication yes`.
    #[strum(serialize = "enable commented-out PubkeyAuthentication")]
    Commented,

    /// An active `PubkeyAuthentication no` line is replaced by `PubkeyAuthentication yes`.
    #[strum(serialize = "enable disabled PubkeyAuthentication")]
    Disabled,

    /// `PubkeyAuthentication yes` is added, because the directive is missing.
    #[strum(serialize = "add missing PubkeyAuthentication")]
    Missing,
}

/// The result of [`ConfigGuard::validate_and_fix`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fix {
    /// Public key authentication is enabled already, nothing has been written.
    Unchanged,

    /// The configuration has been corrected using a [`FixRule`].
    Applied(FixRule),
}

/// A capability for replacing the contents of a configuration file.
pub trait ConfigEditor {
    /// Replaces the contents of the file at `path` with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can not be written.
    fn rewrite(&mut self, path: &Path, contents: &str) -> std::io::Result<()>;
}

/// A [`ConfigEditor`] that atomically replaces a file.
///
/// The new contents are written to a temporary file next to the target, which receives the
/// permissions of the target and is then renamed over it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AtomicEditor;

impl ConfigEditor for AtomicEditor {
    fn rewrite(&mut self, path: &Path, contents: &str) -> std::io::Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let permissions = path.metadata()?.permissions();

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        set_permissions(file.path(), permissions)?;
        file.persist(path).map_err(|error| error.error)?;

        Ok(())
    }
}

/// A backup of the sshd_config.
///
/// The backup file is removed when the [`ConfigBackup`] is dropped.
#[derive(Debug)]
pub struct ConfigBackup {
    config: PathBuf,
    path: PathBuf,
}

impl ConfigBackup {
    /// Returns the path of the backup file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Moves the backup over the live configuration.
    ///
    /// Falls back to copying if the backup can not be renamed (e.g. because it is located on a
    /// different file system).
    fn revert(&self) -> std::io::Result<()> {
        log::warn!(
            "Restoring SSH daemon configuration {} from backup {}",
            self.config.display(),
            self.path.display()
        );
        if let Err(error) = rename(&self.path, &self.config) {
            log::debug!("Renaming backup failed ({error}), copying it instead");
            std::fs::copy(&self.path, &self.config)?;
        }
        Ok(())
    }
}

impl Drop for ConfigBackup {
    fn drop(&mut self) {
        match remove_file(&self.path) {
            Ok(()) => log::debug!("Removed backup {}", self.path.display()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => log::warn!("Unable to remove backup {}: {error}", self.path.display()),
        }
    }
}

/// Backs up, corrects and restores the sshd_config.
#[derive(Debug)]
pub struct ConfigGuard<E = AtomicEditor> {
    config: PathBuf,
    backup_dir: PathBuf,
    editor: E,
}

impl ConfigGuard<AtomicEditor> {
    /// Creates a new [`ConfigGuard`] for the sshd_config at `config`.
    ///
    /// Backups are created in `backup_dir`.
    pub fn new(config: PathBuf, backup_dir: PathBuf) -> Self {
        Self::with_editor(config, backup_dir, AtomicEditor)
    }
}

impl<E: ConfigEditor> ConfigGuard<E> {
    /// Creates a new [`ConfigGuard`] that writes corrections using `editor`.
    pub fn with_editor(config: PathBuf, backup_dir: PathBuf, editor: E) -> Self {
        Self {
            config,
            backup_dir,
            editor,
        }
    }

    /// Returns the path of the sshd_config.
    pub fn config_path(&self) -> &Path {
        self.config.as_path()
    }

    /// Creates a timestamped backup of the sshd_config.
    ///
    /// The backup is named after the configuration file and located in the backup directory.
    /// It receives the permissions of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the sshd_config can not be read,
    /// - or the backup file can not be created (also if it exists already) or written to.
    pub fn backup(&self) -> Result<ConfigBackup, Error> {
        let file_name = self
            .config
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sshd_config".to_string());
        let path = self.backup_dir.join(format!(
            "{file_name}.{}.bak",
            Local::now().format("%Y%m%d%H%M%S%9f")
        ));

        let mut source = File::open(&self.config).map_err(|source| Error::BackupSource {
            path: self.config.clone(),
            source,
        })?;
        let permissions = source
            .metadata()
            .map_err(|source| Error::BackupSource {
                path: self.config.clone(),
                source,
            })?
            .permissions();

        let mut destination = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(BACKUP_FILE_MODE)
            .open(&path)
            .map_err(|source| Error::BackupDestination {
                path: path.clone(),
                source,
            })?;
        // from here on the backup file exists and is removed when the guard is dropped
        let backup = ConfigBackup {
            config: self.config.clone(),
            path,
        };

        std::io::copy(&mut source, &mut destination)
            .and_then(|_| destination.sync_all())
            .and_then(|_| set_permissions(&backup.path, permissions))
            .map_err(|source| Error::BackupDestination {
                path: backup.path.clone(),
                source,
            })?;

        log::debug!(
            "Backed up {} to {}",
            self.config.display(),
            backup.path.display()
        );
        Ok(backup)
    }

    /// Ensures that public key authentication is enabled in the sshd_config.
    ///
    /// Nothing is written if the first active `PubkeyAuthentication` directive is set to `yes`.
    /// Otherwise the following rules are tried in order and only the first applicable one is
    /// applied:
    ///
    /// 1. the first line starting with `#PubkeyAuthentication` is replaced by
    ///    `PubkeyAuthentication yes`, unless an active directive precedes it,
    /// 2. the first active `PubkeyAuthentication` line (e.g. `PubkeyAuthentication no`) is
    ///    replaced by `PubkeyAuthentication yes`,
    /// 3. `PubkeyAuthentication yes` is inserted before the first `Match` block or appended to
    ///    the file.
    ///
    /// All other lines are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the sshd_config can not be read,
    /// - or writing the corrected sshd_config fails, in which case `backup` is moved back over the
    ///   sshd_config before returning.
    pub fn validate_and_fix(&mut self, backup: &ConfigBackup) -> Result<Fix, Error> {
        let contents = read_to_string(&self.config).map_err(|source| Error::Read {
            path: self.config.clone(),
            source,
        })?;

        let Some((rule, corrected)) = plan_fix(&contents) else {
            log::debug!(
                "{PUBKEY_AUTHENTICATION} is enabled in {} already",
                self.config.display()
            );
            return Ok(Fix::Unchanged);
        };

        log::info!("Applying \"{rule}\" to {}", self.config.display());
        if let Err(source) = self.editor.rewrite(&self.config, &corrected) {
            return Err(match backup.revert() {
                Ok(()) => Error::ConfigWrite {
                    rule,
                    path: self.config.clone(),
                    source,
                },
                Err(revert_error) => {
                    log::error!("Writing the corrected configuration failed: {source}");
                    Error::Revert {
                        rule,
                        path: self.config.clone(),
                        backup: backup.path.clone(),
                        source: revert_error,
                    }
                }
            });
        }

        Ok(Fix::Applied(rule))
    }
}

/// Returns the keyword and the value of an active directive line.
///
/// Keyword and value may be separated by whitespace or `=`.
/// Comments and empty lines yield [`None`].
fn directive(line: &str) -> Option<(&str, Option<&str>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut tokens = line
        .split(|c: char| c.is_whitespace() || c == '=')
        .filter(|token| !token.is_empty());
    tokens.next().map(|keyword| (keyword, tokens.next()))
}

/// Returns the value of `line` if it is an active `PubkeyAuthentication` directive.
fn pubkey_authentication(line: &str) -> Option<&str> {
    match directive(line) {
        Some((keyword, value)) if keyword.eq_ignore_ascii_case(PUBKEY_AUTHENTICATION) => {
            Some(value.unwrap_or_default())
        }
        _ => None,
    }
}

/// Returns the line ending of `line`.
fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Returns whether the first active `PubkeyAuthentication` directive of `lines` is set to `yes`.
fn is_enabled(lines: &[&str]) -> bool {
    lines
        .iter()
        .find_map(|line| pubkey_authentication(line))
        .is_some_and(|value| value.eq_ignore_ascii_case("yes"))
}

/// Returns the [`FixRule`] to apply to the sshd_config `contents` and the corrected contents.
///
/// Returns [`None`] if public key authentication is enabled already.
fn plan_fix(contents: &str) -> Option<(FixRule, String)> {
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();

    if is_enabled(&lines) {
        return None;
    }

    let replace = |index: usize| -> String {
        lines
            .iter()
            .enumerate()
            .map(|(current, line)| {
                if current == index {
                    format!("{PUBKEY_AUTHENTICATION_YES}{}", line_ending(line))
                } else {
                    line.to_string()
                }
            })
            .collect()
    };

    // an enabled commented-out line has no effect after an active directive
    let commented = format!("#{PUBKEY_AUTHENTICATION}");
    if let Some(index) = lines.iter().position(|line| line.starts_with(&commented)) {
        let corrected = replace(index);
        if is_enabled(&corrected.split_inclusive('\n').collect::<Vec<&str>>()) {
            return Some((FixRule::Commented, corrected));
        }
    }

    // the first active directive is in effect and it does not enable public key authentication
    if let Some(index) = lines
        .iter()
        .position(|line| pubkey_authentication(line).is_some())
    {
        return Some((FixRule::Disabled, replace(index)));
    }

    // the directive must not end up in a conditional block
    let insert_at = lines
        .iter()
        .position(|line| {
            directive(line).is_some_and(|(keyword, _)| keyword.eq_ignore_ascii_case(MATCH_KEYWORD))
        })
        .unwrap_or(lines.len());
    let mut corrected = lines[..insert_at].concat();
    if !corrected.is_empty() && !corrected.ends_with('\n') {
        corrected.push('\n');
    }
    corrected.push_str(PUBKEY_AUTHENTICATION_YES);
    corrected.push('\n');
    corrected.push_str(&lines[insert_at..].concat());

    Some((FixRule::Missing, corrected))
}

#[cfg(test)]
mod tests {
    use std::fs::{read, write};

    use rstest::rstest;
    use testdir::testdir;
    use testresult::TestResult;

    use super::*;

    const BASE_CONFIG: &str = "Port 22\nPermitRootLogin prohibit-password\n";

    /// A [`ConfigEditor`] counting its writes.
    #[derive(Debug, Default)]
    struct CountingEditor {
        writes: usize,
    }

    impl ConfigEditor for CountingEditor {
        fn rewrite(&mut self, path: &Path, contents: &str) -> std::io::Result<()> {
            self.writes += 1;
            AtomicEditor.rewrite(path, contents)
        }
    }

    /// A [`ConfigEditor`] that fails to write.
    #[derive(Debug)]
    struct FailingEditor;

    impl ConfigEditor for FailingEditor {
        fn rewrite(&mut self, _path: &Path, _contents: &str) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    fn write_config(contents: &str) -> TestResult<(PathBuf, PathBuf)> {
        let dir = testdir!();
        let config = dir.join("sshd_config");
        write(&config, contents)?;
        Ok((config, dir))
    }

    /// Returns all active directive lines of `contents`.
    fn directives(contents: &str) -> Vec<&str> {
        contents
            .lines()
            .filter(|line| directive(line).is_some())
            .collect()
    }

    #[rstest]
    #[case::missing(
        "Port 22\nPermitRootLogin prohibit-password\n",
        Some(FixRule::Missing)
    )]
    #[case::commented(
        "Port 22\n#PubkeyAuthentication yes\nPermitRootLogin prohibit-password\n",
        Some(FixRule::Commented)
    )]
    #[case::commented_no(
        "Port 22\n#PubkeyAuthentication no\nPermitRootLogin prohibit-password\n",
        Some(FixRule::Commented)
    )]
    #[case::disabled(
        "Port 22\nPubkeyAuthentication no\nPermitRootLogin prohibit-password\n",
        Some(FixRule::Disabled)
    )]
    #[case::disabled_mixed_case(
        "Port 22\npubkeyauthentication=No\nPermitRootLogin prohibit-password\n",
        Some(FixRule::Disabled)
    )]
    #[case::disabled_before_commented(
        "PubkeyAuthentication no\n#PubkeyAuthentication yes\n",
        Some(FixRule::Disabled)
    )]
    #[case::commented_before_disabled(
        "#PubkeyAuthentication yes\nPubkeyAuthentication no\n",
        Some(FixRule::Commented)
    )]
    #[case::enabled("Port 22\nPubkeyAuthentication yes\n", None)]
    #[case::enabled_with_comment("#PubkeyAuthentication no\nPubkeyAuthentication yes\n", None)]
    fn plan_fix_selects_rule(#[case] contents: &str, #[case] rule: Option<FixRule>) {
        assert_eq!(plan_fix(contents).map(|(rule, _)| rule), rule);
    }

    #[rstest]
    #[case::missing(BASE_CONFIG.to_string())]
    #[case::commented(
        "Port 22\n#PubkeyAuthentication yes\nPermitRootLogin prohibit-password\n".to_string()
    )]
    #[case::disabled(
        "Port 22\nPubkeyAuthentication no\nPermitRootLogin prohibit-password\n".to_string()
    )]
    fn fix_enables_pubkey_authentication(#[case] contents: String) -> TestResult {
        let (config, dir) = write_config(&contents)?;
        let mut guard = ConfigGuard::new(config.clone(), dir);
        let backup = guard.backup()?;

        assert!(matches!(guard.validate_and_fix(&backup)?, Fix::Applied(_)));

        let corrected = read_to_string(&config)?;
        assert!(corrected.lines().any(|line| line == PUBKEY_AUTHENTICATION_YES));
        let other_directives = |contents: &str| -> Vec<String> {
            directives(contents)
                .into_iter()
                .filter(|line| pubkey_authentication(line).is_none())
                .map(ToString::to_string)
                .collect()
        };
        assert_eq!(other_directives(&corrected), other_directives(&contents));
        Ok(())
    }

    #[rstest]
    fn missing_directive_is_added_before_match_block() {
        let contents = "Port 22\nMatch User backup\n    ForceCommand /usr/bin/false\n";
        let Some((FixRule::Missing, corrected)) = plan_fix(contents) else {
            panic!("Expected the missing directive to be added");
        };
        assert_eq!(
            corrected,
            "Port 22\nPubkeyAuthentication yes\nMatch User backup\n    ForceCommand /usr/bin/false\n"
        );
    }

    #[rstest]
    fn missing_directive_is_added_after_unterminated_line() {
        let Some((_, corrected)) = plan_fix("Port 22") else {
            panic!("Expected the missing directive to be added");
        };
        assert_eq!(corrected, "Port 22\nPubkeyAuthentication yes\n");
    }

    #[rstest]
    fn only_first_commented_line_is_replaced() {
        let contents = "#PubkeyAuthentication yes\r\n#PubkeyAuthentication no\r\n";
        let Some((FixRule::Commented, corrected)) = plan_fix(contents) else {
            panic!("Expected the commented-out directive to be enabled");
        };
        assert_eq!(
            corrected,
            "PubkeyAuthentication yes\r\n#PubkeyAuthentication no\r\n"
        );
    }

    #[rstest]
    fn fix_is_idempotent() -> TestResult {
        let (config, dir) = write_config("Port 22\nPubkeyAuthentication no\n")?;
        let mut guard = ConfigGuard::with_editor(config.clone(), dir, CountingEditor::default());

        let backup = guard.backup()?;
        assert_eq!(
            guard.validate_and_fix(&backup)?,
            Fix::Applied(FixRule::Disabled)
        );
        assert_eq!(guard.editor.writes, 1);

        assert_eq!(guard.validate_and_fix(&backup)?, Fix::Unchanged);
        assert_eq!(guard.editor.writes, 1);
        Ok(())
    }

    #[rstest]
    fn failed_fix_restores_backup() -> TestResult {
        let contents = "Port 22\n#PubkeyAuthentication yes\n";
        let (config, dir) = write_config(contents)?;
        let original = read(&config)?;
        let mut guard = ConfigGuard::with_editor(config.clone(), dir, FailingEditor);

        let backup = guard.backup()?;
        let backup_path = backup.path().to_path_buf();
        match guard.validate_and_fix(&backup) {
            Err(Error::ConfigWrite {
                rule: FixRule::Commented,
                ..
            }) => {}
            result => panic!("Expected a write error, got {result:?}"),
        }
        assert_eq!(read(&config)?, original);

        drop(backup);
        assert!(!backup_path.exists());
        Ok(())
    }

    #[rstest]
    fn active_directive_wins_over_commented_line() {
        let contents = "PubkeyAuthentication no\n#PubkeyAuthentication yes\n";
        let Some((FixRule::Disabled, corrected)) = plan_fix(contents) else {
            panic!("Expected the active directive to be replaced");
        };
        assert_eq!(
            corrected,
            "PubkeyAuthentication yes\n#PubkeyAuthentication yes\n"
        );
        assert_eq!(plan_fix(&corrected), None);
    }

    #[rstest]
    fn failed_fix_without_backup_fails_to_revert() -> TestResult {
        let (config, dir) = write_config("Port 22\nPubkeyAuthentication no\n")?;
        let mut guard = ConfigGuard::with_editor(config.clone(), dir, FailingEditor);

        let backup = guard.backup()?;
        remove_file(backup.path())?;

        let error = match guard.validate_and_fix(&backup) {
            Err(error @ Error::Revert { .. }) => error,
            result => panic!("Expected a revert error, got {result:?}"),
        };
        assert!(matches!(
            error,
            Error::Revert {
                rule: FixRule::Disabled,
                ..
            }
        ));
        assert_eq!(
            crate::ErrorExitCode::from(crate::Error::from(error)),
            crate::ErrorExitCode::SshdRevert
        );
        Ok(())
    }

    #[rstest]
    fn backup_is_removed_on_drop() -> TestResult {
        let (config, dir) = write_config(BASE_CONFIG)?;
        let guard = ConfigGuard::new(config.clone(), dir);

        let backup = guard.backup()?;
        let path = backup.path().to_path_buf();
        assert_eq!(read(&path)?, read(&config)?);
        assert!(
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("sshd_config."))
        );

        drop(backup);
        assert!(!path.exists());
        Ok(())
    }

    #[rstest]
    fn backup_of_missing_config_fails() {
        let dir = testdir!();
        let guard = ConfigGuard::new(dir.join("sshd_config"), dir);
        assert!(matches!(guard.backup(), Err(Error::BackupSource { .. })));
    }

    #[rstest]
    fn backup_into_missing_directory_fails() -> TestResult {
        let (config, dir) = write_config(BASE_CONFIG)?;
        let guard = ConfigGuard::new(config, dir.join("missing"));
        assert!(matches!(
            guard.backup(),
            Err(Error::BackupDestination { .. })
        ));
        Ok(())
    }
}
