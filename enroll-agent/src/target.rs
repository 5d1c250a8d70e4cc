//! The target of an enrollment.

use std::fmt::Display;

/// Splits a raw list of applications into its entries.
///
/// Entries may be separated by commas and whitespace in any combination.
/// Empty entries are dropped, the order of the remaining ones is preserved and duplicates are
/// kept.
///
/// # Examples
///
/// ```
/// use enroll_agent::target::parse_applications;
///
/// assert_eq!(parse_applications("web,cache"), vec!["web", "cache"]);
/// assert_eq!(parse_applications(" web ,, cache  db "), vec!["web", "cache", "db"]);
/// assert!(parse_applications(" , ").is_empty());
/// ```
pub fn parse_applications(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// The environment and applications selected for a host.
///
/// Produced by a [`ModeResolver`](crate::mode::ModeResolver) from pre-supplied values or operator
/// input.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selection {
    environment: String,
    applications: Vec<String>,
}

impl Selection {
    /// Creates a new [`Selection`].
    pub fn new(environment: String, applications: Vec<String>) -> Self {
        Self {
            environment,
            applications,
        }
    }

    /// Returns the selected environment.
    pub fn get_environment(&self) -> &str {
        &self.environment
    }

    /// Returns the selected applications.
    pub fn get_applications(&self) -> &[String] {
        &self.applications
    }
}

/// The full set of data a host is enrolled with.
///
/// The hostname is read once from the local system and never changes during a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnrollmentTarget {
    hostname: String,
    environment: String,
    applications: Vec<String>,
}

impl EnrollmentTarget {
    /// Creates a new [`EnrollmentTarget`] for `hostname` from a [`Selection`].
    pub fn new(hostname: String, selection: Selection) -> Self {
        Self {
            hostname,
            environment: selection.environment,
            applications: selection.applications,
        }
    }

    /// Returns the hostname.
    pub fn get_hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the environment.
    pub fn get_environment(&self) -> &str {
        &self.environment
    }

    /// Returns the applications.
    pub fn get_applications(&self) -> &[String] {
        &self.applications
    }
}

impl Display for EnrollmentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (environment: \"{}\", applications: [{}])",
            self.hostname,
            self.environment,
            self.applications.join(", ")
        )
    }
}
