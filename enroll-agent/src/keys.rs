//! Retrieval and installation of management public keys.
//!
//! The control plane uses one SSH key pair per environment.
//! The public key for the environment of a host is fetched from the enrollment service and added to
//! root's [authorized_keys] file, so that the control plane can connect to the host.
//!
//! [authorized_keys]: https://man.archlinux.org/man/sshd.8#AUTHORIZED_KEYS_FILE_FORMAT

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs::{DirBuilder, OpenOptions},
    io::{Read, Write},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use enroll_common::ssh::{AUTHORIZED_KEYS_FILE_MODE, SSH_USER_DIR_MODE};
use ureq::Agent;
use url::Url;

/// An error that may occur when fetching or installing a management public key.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The authorized_keys file can not be created, read or written to.
    #[error("Unable to update authorized_keys file {path}:\n{source}")]
    AuthorizedKeys {
        /// The path of the authorized_keys file.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// The directory of the authorized_keys file can not be created.
    #[error("Unable to create directory {path} for the authorized_keys file:\n{source}")]
    CreateDirectory {
        /// The path of the directory.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },

    /// The enrollment service returned an empty public key.
    #[error("The public key retrieved from {url} is empty")]
    EmptyPubkey {
        /// The URL the public key has been fetched from.
        url: Url,
    },

    /// The list of environments can not be fetched.
    #[error("Fetching the list of environments from {url} failed:\n{source}")]
    EnvironmentsFetch {
        /// The URL the environments have been fetched from.
        url: Url,
        /// The source error.
        source: Box<ureq::Error>,
    },

    /// The list of environments can not be read.
    #[error("Reading the list of environments from {url} failed:\n{source}")]
    EnvironmentsRead {
        /// The URL the environments have been fetched from.
        url: Url,
        /// The source error.
        source: std::io::Error,
    },

    /// The environment can not be used for fetching a public key.
    #[error("The environment \"{environment}\" can not be used for fetching a management public key")]
    InvalidEnvironment {
        /// The environment.
        environment: String,
    },

    /// The enrollment service returned something other than OpenSSH public keys.
    #[error("The response from {url} is not an OpenSSH public key")]
    InvalidPubkey {
        /// The URL the public key has been fetched from.
        url: Url,
    },

    /// The public key can not be fetched.
    #[error("Fetching the management public key for environment \"{environment}\" from {url} failed:\n{source}")]
    KeyFetch {
        /// The environment of the public key.
        environment: String,
        /// The URL the public key has been fetched from.
        url: Url,
        /// The source error.
        source: Box<ureq::Error>,
    },

    /// The public key can not be read from the response.
    #[error("Reading the management public key from {url} failed:\n{source}")]
    KeyRead {
        /// The URL the public key has been fetched from.
        url: Url,
        /// The source error.
        source: std::io::Error,
    },

    /// The public key URL can not be extended with an environment.
    #[error("The public key URL {url} can not be used as base for environment specific URLs")]
    UrlCannotBeABase {
        /// The public key URL.
        url: Url,
    },
}

/// The prefixes of OpenSSH public key types.
const KEY_TYPE_PREFIXES: &[&str] = &["ssh-", "ecdsa-sha2-", "sk-ssh-", "sk-ecdsa-sha2-"];

/// Returns whether `line` is an [authorized_keys] entry.
///
/// Options preceding the key type and a trailing comment are accepted.
///
/// [authorized_keys]: https://man.archlinux.org/man/sshd.8#AUTHORIZED_KEYS_FILE_FORMAT
fn is_public_key_line(line: &str) -> bool {
    let mut fields = line
        .split_whitespace()
        .skip_while(|field| !KEY_TYPE_PREFIXES.iter().any(|prefix| field.starts_with(prefix)));
    match (fields.next(), fields.next()) {
        (Some(_), Some(blob)) => blob
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')),
        _ => false,
    }
}

/// The public key used by the control plane to connect to hosts of an environment.
///
/// Wraps the trimmed response of the enrollment service.
/// The key is treated as opaque text: two differently formatted copies of the same key are
/// considered different keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManagementPubkey(String);

impl ManagementPubkey {
    /// Creates a new [`ManagementPubkey`] from `key`.
    ///
    /// Returns [`None`] if `key` is empty after trimming surrounding whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use enroll_agent::keys::ManagementPubkey;
    ///
    /// let key = ManagementPubkey::new("ssh-ed25519 AAAA ansible@control\n");
    /// assert_eq!(
    ///     key.as_ref().map(|key| key.as_ref()),
    ///     Some("ssh-ed25519 AAAA ansible@control")
    /// );
    /// assert!(ManagementPubkey::new(" \n").is_none());
    /// ```
    pub fn new(key: &str) -> Option<Self> {
        let key = key.trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    /// Returns the non-empty lines of the key.
    fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines().map(str::trim).filter(|line| !line.is_empty())
    }

    /// Returns whether all lines are OpenSSH public keys or comments.
    ///
    /// # Examples
    ///
    /// ```
    /// use enroll_agent::keys::ManagementPubkey;
    ///
    /// let key = ManagementPubkey::new("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ansible@control");
    /// assert!(key.is_some_and(|key| key.is_openssh()));
    ///
    /// let key = ManagementPubkey::new(r#"{"prod": "ssh-ed25519 AAAA prod"}"#);
    /// assert!(key.is_some_and(|key| !key.is_openssh()));
    /// ```
    pub fn is_openssh(&self) -> bool {
        self.lines()
            .all(|line| line.starts_with('#') || is_public_key_line(line))
    }
}

impl AsRef<str> for ManagementPubkey {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ManagementPubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetches management public keys and installs them for root.
#[derive(Debug)]
pub struct KeyInstaller {
    agent: Agent,
    pubkey_url: Url,
    authorized_keys: PathBuf,
}

impl KeyInstaller {
    /// Creates a new [`KeyInstaller`].
    ///
    /// Public keys are fetched below `pubkey_url` and installed in the `authorized_keys` file.
    pub fn new(agent: Agent, pubkey_url: Url, authorized_keys: PathBuf) -> Self {
        Self {
            agent,
            pubkey_url,
            authorized_keys,
        }
    }

    /// Returns the path of the authorized_keys file.
    pub fn authorized_keys_path(&self) -> &Path {
        self.authorized_keys.as_path()
    }

    /// Returns the URL of the public key for `environment`.
    ///
    /// The environment is appended as a single path segment to the public key URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use enroll_agent::{client::new_agent, keys::KeyInstaller};
    ///
    /// # fn main() -> testresult::TestResult {
    /// let installer = KeyInstaller::new(
    ///     new_agent(),
    ///     "https://enroll.example.org/pubkey/".parse()?,
    ///     "/root/.ssh/authorized_keys".into(),
    /// );
    /// assert_eq!(
    ///     installer.pubkey_url_for("staging")?.as_str(),
    ///     "https://enroll.example.org/pubkey/staging"
    /// );
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the public key URL can not have path segments.
    pub fn pubkey_url_for(&self, environment: &str) -> Result<Url, Error> {
        // the bare public key URL serves the list of environments
        if matches!(environment.trim(), "" | "." | "..") {
            return Err(Error::InvalidEnvironment {
                environment: environment.to_string(),
            });
        }

        let mut url = self.pubkey_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::UrlCannotBeABase {
                url: self.pubkey_url.clone(),
            })?
            .pop_if_empty()
            .push(environment);
        Ok(url)
    }

    /// Fetches the management public key for `environment`.
    ///
    /// A single request is issued, failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the URL for `environment` can not be created,
    /// - the request fails or the enrollment service responds with an error status,
    /// - the response can not be read,
    /// - or the response is empty.
    pub fn fetch_pubkey(&self, environment: &str) -> Result<ManagementPubkey, Error> {
        let url = self.pubkey_url_for(environment)?;
        log::debug!("Fetching management public key from {url}");

        let body = self
            .agent
            .request_url("GET", &url)
            .call()
            .map_err(|source| Error::KeyFetch {
                environment: environment.to_string(),
                url: url.clone(),
                source: Box::new(source),
            })?
            .into_string()
            .map_err(|source| Error::KeyRead {
                url: url.clone(),
                source,
            })?;

        let pubkey = ManagementPubkey::new(&body).ok_or(Error::EmptyPubkey { url: url.clone() })?;
        if !pubkey.is_openssh() {
            return Err(Error::InvalidPubkey { url });
        }
        Ok(pubkey)
    }

    /// Fetches the names of all environments known to the enrollment service.
    ///
    /// The public key URL returns a JSON object mapping environment names to public keys.
    /// The names are returned in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the request fails or the enrollment service responds with an error status,
    /// - or the response is not a JSON object of strings.
    pub fn fetch_environments(&self) -> Result<Vec<String>, Error> {
        let url = self.pubkey_url.clone();
        log::debug!("Fetching environments from {url}");

        let keys: BTreeMap<String, String> = self
            .agent
            .request_url("GET", &url)
            .call()
            .map_err(|source| Error::EnvironmentsFetch {
                url: url.clone(),
                source: Box::new(source),
            })?
            .into_json()
            .map_err(|source| Error::EnvironmentsRead { url, source })?;

        Ok(keys.into_keys().collect())
    }

    /// Adds `pubkey` to the authorized_keys file, unless it is present already.
    ///
    /// The directory of the authorized_keys file and the file itself are created if they don't
    /// exist, modes of existing ones are not changed.
    /// A line of the key is only appended, if no line in the file equals it exactly.
    ///
    /// Returns the number of added lines, which is `0` if the key is installed already.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the directory of the authorized_keys file can not be created,
    /// - or the authorized_keys file can not be created, read or written to.
    pub fn install_pubkey(&self, pubkey: &ManagementPubkey) -> Result<usize, Error> {
        let path = self.authorized_keys.as_path();
        let map_err = |source| Error::AuthorizedKeys {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                log::debug!("Creating directory {}", dir.display());
                DirBuilder::new()
                    .recursive(true)
                    .mode(SSH_USER_DIR_MODE)
                    .create(dir)
                    .map_err(|source| Error::CreateDirectory {
                        path: dir.to_path_buf(),
                        source,
                    })?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .mode(AUTHORIZED_KEYS_FILE_MODE)
            .open(path)
            .map_err(map_err)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(map_err)?;

        let missing: Vec<&str> = pubkey
            .lines()
            .filter(|key| !contents.lines().any(|line| line == *key))
            .collect();
        if missing.is_empty() {
            log::info!("The management public key is present in {} already", path.display());
            return Ok(0);
        }

        let mut entry = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            entry.push('\n');
        }
        for key in missing.iter() {
            entry.push_str(key);
            entry.push('\n');
        }
        file.write_all(entry.as_bytes()).map_err(map_err)?;

        log::info!("Added the management public key to {}", path.display());
        Ok(missing.len())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{read_to_string, write};

    use httpmock::prelude::*;
    use rstest::{fixture, rstest};
    use testdir::testdir;
    use testresult::TestResult;

    use super::*;
    use crate::client::new_agent;

    const PUBKEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIPkpXKiNhy39A3bZ1u19a5d4sFwYMBkWQyCbzgUfdKBm ansible@control";

    #[fixture]
    fn pubkey() -> ManagementPubkey {
        ManagementPubkey(PUBKEY.to_string())
    }

    fn installer(authorized_keys: PathBuf) -> TestResult<KeyInstaller> {
        Ok(KeyInstaller::new(
            new_agent(),
            "http://localhost/pubkey".parse()?,
            authorized_keys,
        ))
    }

    #[rstest]
    fn install_twice_keeps_single_copy(pubkey: ManagementPubkey) -> TestResult {
        let path = testdir!().join(".ssh").join("authorized_keys");
        let installer = installer(path.clone())?;

        assert_eq!(installer.install_pubkey(&pubkey)?, 1);
        assert_eq!(installer.install_pubkey(&pubkey)?, 0);

        let contents = read_to_string(&path)?;
        assert_eq!(contents.lines().filter(|line| *line == PUBKEY).count(), 1);
        Ok(())
    }

    #[rstest]
    fn install_creates_directory_and_file_with_restrictive_modes(
        pubkey: ManagementPubkey,
    ) -> TestResult {
        use std::os::unix::fs::PermissionsExt;

        let dir = testdir!().join(".ssh");
        let path = dir.join("authorized_keys");
        installer(path.clone())?.install_pubkey(&pubkey)?;

        assert_eq!(dir.metadata()?.permissions().mode() & 0o777, SSH_USER_DIR_MODE);
        assert_eq!(
            path.metadata()?.permissions().mode() & 0o777,
            AUTHORIZED_KEYS_FILE_MODE
        );
        Ok(())
    }

    #[rstest]
    fn install_keeps_existing_keys(pubkey: ManagementPubkey) -> TestResult {
        let path = testdir!().join("authorized_keys");
        write(&path, "ssh-ed25519 AAAAother user@host")?;

        installer(path.clone())?.install_pubkey(&pubkey)?;

        assert_eq!(
            read_to_string(&path)?,
            format!("ssh-ed25519 AAAAother user@host\n{PUBKEY}\n")
        );
        Ok(())
    }

    #[rstest]
    fn differently_formatted_key_is_a_different_key(pubkey: ManagementPubkey) -> TestResult {
        let path = testdir!().join("authorized_keys");
        write(&path, format!("{}\n", PUBKEY.replace(' ', "  ")))?;

        assert_eq!(installer(path.clone())?.install_pubkey(&pubkey)?, 1);
        Ok(())
    }

    #[rstest]
    fn fetch_pubkey_trims_response() -> TestResult {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/pubkey/staging");
            then.status(200).body(format!("{PUBKEY}\n"));
        });
        let installer = KeyInstaller::new(
            new_agent(),
            server.url("/pubkey").parse()?,
            testdir!().join("authorized_keys"),
        );

        assert_eq!(installer.fetch_pubkey("staging")?.as_ref(), PUBKEY);
        mock.assert();
        Ok(())
    }

    #[rstest]
    #[case::error_status(400, "Environment `nope` does not have a pubkey available.")]
    #[case::empty_body(200, "\n")]
    #[case::environment_list(200, r#"{"prod": "ssh-ed25519 AAAA prod"}"#)]
    #[case::html(200, "<html><body>Maintenance</body></html>")]
    fn fetch_pubkey_fails(#[case] status: u16, #[case] body: &str) -> TestResult {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/pubkey/nope");
            then.status(status).body(body);
        });
        let installer = KeyInstaller::new(
            new_agent(),
            server.url("/pubkey").parse()?,
            testdir!().join("authorized_keys"),
        );

        assert!(installer.fetch_pubkey("nope").is_err());
        Ok(())
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("  ")]
    #[case::current_dir(".")]
    #[case::parent_dir("..")]
    fn unusable_environment_is_rejected(#[case] environment: &str) -> TestResult {
        let installer = installer(testdir!().join("authorized_keys"))?;
        assert!(matches!(
            installer.pubkey_url_for(environment),
            Err(Error::InvalidEnvironment { .. })
        ));
        assert!(matches!(
            installer.fetch_pubkey(environment),
            Err(Error::InvalidEnvironment { .. })
        ));
        Ok(())
    }

    #[rstest]
    #[case::plain(PUBKEY, true)]
    #[case::with_options(&format!("restrict,from=\"10.0.0.0/8\" {PUBKEY}"), true)]
    #[case::with_comment_line(&format!("# control plane\n{PUBKEY}"), true)]
    #[case::ecdsa("ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTY=", true)]
    #[case::key_type_only("ssh-ed25519", false)]
    #[case::json(r#"{"prod": "ssh-ed25519 AAAA prod"}"#, false)]
    #[case::second_line_invalid(&format!("{PUBKEY}\nnot a key"), false)]
    fn openssh_public_keys_are_recognized(#[case] body: &str, #[case] valid: bool) {
        assert_eq!(
            ManagementPubkey::new(body).is_some_and(|key| key.is_openssh()),
            valid
        );
    }

    #[rstest]
    fn fetch_environments_returns_sorted_names() -> TestResult {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/pubkey");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"STAGING": "ssh-ed25519 AAAA1", "PROD": "ssh-ed25519 AAAA2"}"#);
        });
        let installer = KeyInstaller::new(
            new_agent(),
            server.url("/pubkey").parse()?,
            testdir!().join("authorized_keys"),
        );

        assert_eq!(installer.fetch_environments()?, vec!["PROD", "STAGING"]);
        Ok(())
    }
}
