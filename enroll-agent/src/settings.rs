//! The settings of an enrollment run.
//!
//! Values provided by the enrollment service at deployment time (its URLs and the valid
//! environments) are read from a TOML configuration file and may be overridden on the command
//! line or using environment variables.
//! All other values originate from the command line, environment variables or the local system.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use enroll_common::{config::get_config_file, ssh::get_sshd_config_path};
use serde::Deserialize;
use url::Url;

use crate::{cli::Cli, target::parse_applications, utils::get_root_authorized_keys_path};

/// An error that may occur when assembling [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration file can not be deserialized.
    #[error("Unable to deserialize configuration file {path}:\n{source}")]
    Deserialize {
        /// The path of the configuration file.
        path: PathBuf,
        /// The source error.
        source: toml::de::Error,
    },

    /// A required setting is neither provided by the configuration file nor the command line.
    #[error("The setting \"{0}\" is missing, provide it in the configuration file or on the command line")]
    Missing(&'static str),

    /// The configuration file can not be read.
    #[error("Unable to read configuration file {path}:\n{source}")]
    Read {
        /// The path of the configuration file.
        path: PathBuf,
        /// The source error.
        source: std::io::Error,
    },
}

/// The values provided by the enrollment service.
///
/// # Examples
///
/// ```
/// use std::io::Write;
///
/// use enroll_agent::settings::ServerConfig;
///
/// # fn main() -> testresult::TestResult {
/// let config_file = testdir::testdir!().join("enroll_agent_config.toml");
/// {
///     let config_string = r#"
/// pubkey_url = "https://enroll.example.org/pubkey"
/// enroll_url = "https://enroll.example.org/do_enroll"
/// environments = ["prod", "staging"]
/// "#;
///     let mut buffer = std::fs::File::create(&config_file)?;
///     buffer.write_all(config_string.as_bytes())?;
/// }
/// let config = ServerConfig::new_from_file(&config_file)?;
/// assert_eq!(config.environments, ["prod", "staging"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The URL below which management public keys are provided per environment.
    pub pubkey_url: Option<Url>,

    /// The URL of the enrollment endpoint.
    pub enroll_url: Option<Url>,

    /// The valid environments.
    pub environments: Vec<String>,
}

impl ServerConfig {
    /// Creates a new [`ServerConfig`] from the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the file can not be read,
    /// - or the contents of the file can not be deserialized.
    pub fn new_from_file(path: &Path) -> Result<Self, Error> {
        let contents = read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| Error::Deserialize {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The immutable settings of an enrollment run.
///
/// Created once at the start of a run and passed to all components.
#[derive(Clone, Debug)]
pub struct Settings {
    hostname: String,
    pubkey_url: Url,
    enroll_url: Url,
    environments: Vec<String>,
    environment: String,
    applications: Vec<String>,
    automated: bool,
    sshd_config: PathBuf,
    backup_dir: Option<PathBuf>,
    authorized_keys: PathBuf,
    os_type: String,
    user: String,
}

impl Settings {
    /// Creates new [`Settings`] for the host `hostname`.
    ///
    /// Public keys are fetched below `pubkey_url` and the host is enrolled using `enroll_url`.
    /// Uses interactive mode without valid environments, an empty environment, no applications,
    /// the default sshd_config and authorized_keys locations, an empty operating system and `root`
    /// as user by default.
    pub fn new(hostname: String, pubkey_url: Url, enroll_url: Url) -> Self {
        Self {
            hostname,
            pubkey_url,
            enroll_url,
            environments: Vec::new(),
            environment: String::new(),
            applications: Vec::new(),
            automated: false,
            sshd_config: get_sshd_config_path(),
            backup_dir: None,
            authorized_keys: get_root_authorized_keys_path(),
            os_type: String::new(),
            user: "root".to_string(),
        }
    }

    /// Creates new [`Settings`] for `hostname` from command line arguments.
    ///
    /// The configuration file provided by [`Cli::config`] is read, or the first one found in the
    /// default locations (if any).
    /// Command line arguments take precedence over the values of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if
    /// - the configuration file can not be read,
    /// - or no public key URL or enrollment URL is provided.
    pub fn from_cli(cli: Cli, hostname: String) -> Result<Self, Error> {
        let config = match cli.config.or_else(get_config_file) {
            Some(path) => {
                log::debug!("Reading configuration file {}", path.display());
                ServerConfig::new_from_file(&path)?
            }
            None => {
                log::debug!("No configuration file found");
                ServerConfig::default()
            }
        };

        let pubkey_url = cli
            .pubkey_url
            .or(config.pubkey_url)
            .ok_or(Error::Missing("pubkey_url"))?;
        let enroll_url = cli
            .enroll_url
            .or(config.enroll_url)
            .ok_or(Error::Missing("enroll_url"))?;
        let environments = if cli.environments.is_empty() {
            config.environments
        } else {
            cli.environments
        };

        let mut settings = Self::new(hostname, pubkey_url, enroll_url)
            .environments(environments)
            .environment(cli.environment.unwrap_or_default())
            .applications(parse_applications(
                cli.applications.as_deref().unwrap_or_default(),
            ))
            .automated(cli.automated)
            .sshd_config(cli.sshd_config)
            .os_type(cli.os_type.unwrap_or_default())
            .user(cli.user);
        if let Some(backup_dir) = cli.backup_dir {
            settings = settings.backup_dir(backup_dir);
        }
        if let Some(authorized_keys) = cli.authorized_keys {
            settings = settings.authorized_keys(authorized_keys);
        }
        Ok(settings)
    }

    /// Sets the valid environments.
    ///
    /// Empty entries are dropped and surrounding whitespace is removed.
    pub fn environments(mut self, environments: Vec<String>) -> Self {
        self.environments = environments
            .into_iter()
            .map(|environment| environment.trim().to_string())
            .filter(|environment| !environment.is_empty())
            .collect();
        self
    }

    /// Sets the pre-supplied environment.
    pub fn environment(mut self, environment: String) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the pre-supplied applications.
    pub fn applications(mut self, applications: Vec<String>) -> Self {
        self.applications = applications;
        self
    }

    /// Sets whether the run is automated.
    pub fn automated(mut self, automated: bool) -> Self {
        self.automated = automated;
        self
    }

    /// Sets the path of the sshd_config.
    pub fn sshd_config(mut self, path: PathBuf) -> Self {
        self.sshd_config = path;
        self
    }

    /// Sets the directory for the backup of the sshd_config.
    pub fn backup_dir(mut self, path: PathBuf) -> Self {
        self.backup_dir = Some(path);
        self
    }

    /// Sets the path of root's authorized_keys file.
    pub fn authorized_keys(mut self, path: PathBuf) -> Self {
        self.authorized_keys = path;
        self
    }

    /// Sets the operating system of the host.
    pub fn os_type(mut self, os_type: String) -> Self {
        self.os_type = os_type.trim().to_string();
        self
    }

    /// Sets the system user the control plane connects as.
    pub fn user(mut self, user: String) -> Self {
        self.user = user;
        self
    }

    /// Returns the hostname.
    pub fn get_hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the URL below which management public keys are provided.
    pub fn get_pubkey_url(&self) -> &Url {
        &self.pubkey_url
    }

    /// Returns the URL of the enrollment endpoint.
    pub fn get_enroll_url(&self) -> &Url {
        &self.enroll_url
    }

    /// Returns the valid environments.
    pub fn get_environments(&self) -> &[String] {
        &self.environments
    }

    /// Returns the pre-supplied environment.
    pub fn get_environment(&self) -> &str {
        &self.environment
    }

    /// Returns the pre-supplied applications.
    pub fn get_applications(&self) -> &[String] {
        &self.applications
    }

    /// Returns whether the run is automated.
    pub fn is_automated(&self) -> bool {
        self.automated
    }

    /// Returns the path of the sshd_config.
    pub fn get_sshd_config(&self) -> &Path {
        &self.sshd_config
    }

    /// Returns the directory for the backup of the sshd_config.
    ///
    /// Defaults to the directory containing the sshd_config.
    pub fn get_backup_dir(&self) -> PathBuf {
        match (&self.backup_dir, self.sshd_config.parent()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            (None, _) => PathBuf::from("."),
        }
    }

    /// Returns the path of root's authorized_keys file.
    pub fn get_authorized_keys(&self) -> &Path {
        &self.authorized_keys
    }

    /// Returns the operating system of the host.
    ///
    /// An empty string if it is not known (yet).
    pub fn get_os_type(&self) -> &str {
        &self.os_type
    }

    /// Returns the system user the control plane connects as.
    pub fn get_user(&self) -> &str {
        &self.user
    }
}
