//! Command line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser, builder::FalseyValueParser, crate_name};
use enroll_common::{
    config::get_config_file_paths,
    ssh::{get_default_authorized_keys_path, get_sshd_config_path},
};
use url::Url;

/// The name of the executable.
pub const BIN_NAME: &str = crate_name!();

/// Command line arguments of the enrollment agent.
#[derive(Debug, Parser)]
#[command(
    about = "A command-line interface for enrolling hosts with an Ansible control plane",
    name = BIN_NAME,
    version,
    long_about = format!("A command-line interface for enrolling hosts with an Ansible control plane

NOTE: This command must be run as root!

The host is prepared for remote management over SSH and registered with the enrollment service:

- a backup of the SSH daemon configuration is created,

- public key authentication is enabled in the SSH daemon configuration (the backup is restored if this fails),

- the environment and applications of the host are selected (interactively, unless running automated),

- the management public key of the environment is added to root's authorized_keys file (by default \"{}\"),

- the host is enrolled with the enrollment service,

- the backup of the SSH daemon configuration is removed.

The URLs of the enrollment service and the valid environments are read from the first existing configuration file of: {:?}",
        get_default_authorized_keys_path().display(),
        get_config_file_paths(),
    ),
)]
pub struct Cli {
    /// The path to a custom configuration file.
    #[arg(env = "ENROLL_AGENT_CONFIG", long, short)]
    pub config: Option<PathBuf>,

    /// The URL below which management public keys are provided per environment.
    ///
    /// Overrides the "pubkey_url" of the configuration file.
    #[arg(env = "PUBKEY_URL", long)]
    pub pubkey_url: Option<Url>,

    /// The URL of the enrollment endpoint.
    ///
    /// Overrides the "enroll_url" of the configuration file.
    #[arg(env = "ENROLL_URL", long)]
    pub enroll_url: Option<Url>,

    /// The comma separated list of valid environments.
    ///
    /// Overrides the "environments" of the configuration file.
    #[arg(env = "ENVIRONMENTS", long, value_delimiter = ',')]
    pub environments: Vec<String>,

    /// The environment of the host.
    ///
    /// Used as is when running automated, shown as current selection otherwise.
    #[arg(env = "ENVIRONMENT", long, short)]
    pub environment: Option<String>,

    /// The applications of the host, separated by commas or whitespace.
    #[arg(env = "APPLICATIONS", long, short)]
    pub applications: Option<String>,

    /// Enroll using the provided environment and applications without asking.
    #[arg(env = "AUTOMATED", long, value_parser = FalseyValueParser::new())]
    pub automated: bool,

    /// Whether to emit debug output.
    #[arg(
        env = "DEBUG",
        long,
        action = ArgAction::Set,
        default_value_t = true,
        value_parser = FalseyValueParser::new()
    )]
    pub debug: bool,

    /// The path of the SSH daemon configuration.
    #[arg(long, default_value_os_t = get_sshd_config_path())]
    pub sshd_config: PathBuf,

    /// The path of root's authorized_keys file.
    ///
    /// Defaults to the authorized_keys file in the home directory of root.
    #[arg(long)]
    pub authorized_keys: Option<PathBuf>,

    /// The directory in which the backup of the SSH daemon configuration is created.
    ///
    /// Defaults to the directory of the SSH daemon configuration.
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// The operating system of the host, used as inventory group by the control plane.
    ///
    /// Defaults to the "ID" of the os-release file.
    #[arg(env = "OS_TYPE", long)]
    pub os_type: Option<String>,

    /// The system user the control plane connects as.
    #[arg(long, default_value = "root")]
    pub user: String,
}
