//! Defaults for SSH.
//!
//! # Examples
//!
//! ```
//! use enroll_common::ssh::{
//!     get_authorized_keys_path_for_home,
//!     get_default_authorized_keys_path,
//!     get_sshd_config_path,
//! };
//!
//! // Get the file path of the SSH daemon configuration.
//! println!("{:?}", get_sshd_config_path());
//!
//! // Get the file path of the authorized_keys file of root.
//! println!("{:?}", get_default_authorized_keys_path());
//!
//! // Get the file path of the authorized_keys file below an arbitrary home directory.
//! assert_eq!(
//!     get_authorized_keys_path_for_home("/home/ansible"),
//!     std::path::PathBuf::from("/home/ansible/.ssh/authorized_keys")
//! );
//! ```

use std::path::{Path, PathBuf};

/// The file path of the SSH daemon configuration.
const SSHD_CONFIG_FILE: &str = "/etc/ssh/sshd_config";

/// The home directory of root, if it can not be looked up in the user database.
const ROOT_HOME_DIR: &str = "/root";

/// The directory below a home directory, that contains SSH client data of a user.
const SSH_USER_DIR: &str = ".ssh";

/// The file name of a user's SSH authorized_keys file.
const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// The file mode of the SSH directory of a user.
pub const SSH_USER_DIR_MODE: u32 = 0o700;

/// The file mode of an authorized_keys file.
pub const AUTHORIZED_KEYS_FILE_MODE: u32 = 0o600;

/// Returns the file path of the SSH daemon configuration.
pub fn get_sshd_config_path() -> PathBuf {
    PathBuf::from(SSHD_CONFIG_FILE)
}

/// Returns the path of the [authorized_keys] file below the home directory `home`.
///
/// [authorized_keys]: https://man.archlinux.org/man/sshd.8#AUTHORIZED_KEYS_FILE_FORMAT
pub fn get_authorized_keys_path_for_home(home: impl AsRef<Path>) -> PathBuf {
    home.as_ref().join(SSH_USER_DIR).join(AUTHORIZED_KEYS_FILE)
}

/// Returns the path of root's authorized_keys file, assuming the default home of root.
pub fn get_default_authorized_keys_path() -> PathBuf {
    get_authorized_keys_path_for_home(ROOT_HOME_DIR)
}
